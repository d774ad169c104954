//! Database models for the back-office server
//!
//! Re-exports models from the shared crate

pub use shared::models::*;
