//! Bookkeeping services: stock ledger, price history, loans, purchases, payroll

pub mod loan;
pub mod payroll;
pub mod price_history;
pub mod purchase;
pub mod stock;

pub use loan::LoanService;
pub use payroll::PayrollService;
pub use price_history::PriceHistoryService;
pub use purchase::PurchaseService;
pub use stock::StockLedgerService;
