//! Domain models for the materials inventory core

mod audit;
mod count;
mod item;
mod order;
mod transaction;

pub use audit::*;
pub use count::*;
pub use item::*;
pub use order::*;
pub use transaction::*;
