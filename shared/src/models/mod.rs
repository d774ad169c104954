//! Domain models for the retail back office

mod loan;
mod payroll;
mod price;
mod purchase;
mod source;
mod stock;

pub use loan::*;
pub use payroll::*;
pub use price::*;
pub use purchase::*;
pub use source::*;
pub use stock::*;
