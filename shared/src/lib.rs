//! Shared domain types and rules for the materials inventory core
//!
//! This crate has no I/O. It holds the models, stock sign conventions and the
//! planning and state-machine rules that the backend applies inside database
//! transactions.

pub mod error;
pub mod models;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
