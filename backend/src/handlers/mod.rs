//! HTTP handlers

pub mod health;
pub mod loan;
pub mod payroll;
pub mod price;
pub mod purchase;
pub mod stock;

pub use health::*;
pub use loan::*;
pub use payroll::*;
pub use price::*;
pub use purchase::*;
pub use stock::*;
