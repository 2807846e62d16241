//! Database models for the materials inventory server
//!
//! Re-exports the domain models from the shared crate

pub use shared::models::*;
