//! Business logic services for the materials inventory core

pub mod inventory_count;
pub mod ledger;
pub mod purchase_order;
pub mod transaction;

pub use inventory_count::InventoryCountService;
pub use ledger::LedgerService;
pub use purchase_order::PurchaseOrderService;
pub use transaction::TransactionService;
