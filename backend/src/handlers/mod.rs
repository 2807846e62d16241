//! HTTP handlers

pub mod health;
pub mod inventory_count;
pub mod item;
pub mod order;
pub mod transaction;

pub use health::*;
pub use inventory_count::*;
pub use item::*;
pub use order::*;
pub use transaction::*;
