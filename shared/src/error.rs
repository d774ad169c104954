//! Domain errors raised by the pure bookkeeping rules

use rust_decimal::Decimal;
use thiserror::Error;

/// Failures of the ledger, price and loan rules.
///
/// These are deterministic business failures; persistence problems are the
/// backend's concern and never appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Cannot {action} {entity} in status {from}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("Insufficient stock: available {available}, requested {requested}")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Installments count must be at least 1")]
    ZeroInstallments,

    #[error("Payment has already been settled")]
    PaymentAlreadySettled,
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transition(entity: &'static str, from: impl ToString, action: &'static str) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }
}

/// Result type used by the pure domain layer
pub type DomainResult<T> = Result<T, DomainError>;
