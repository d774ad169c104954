//! Shared types and bookkeeping rules for the retail back office
//!
//! This crate holds the stock ledger, price history and loan amortization
//! rules as pure functions over plain data. The backend persists the results
//! and the WASM module reuses the same arithmetic in the browser.

pub mod error;
pub mod models;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
