//! Validation utilities for back-office input
//!
//! Field-level checks run before anything reaches the ledger or the database.

use rust_decimal::Decimal;

/// Decimal places stored for stock quantities
pub const QUANTITY_SCALE: u32 = 4;

/// Decimal places stored for prices and money amounts
pub const PRICE_SCALE: u32 = 2;

/// Decimal places stored for annual interest rates
pub const RATE_SCALE: u32 = 3;

/// True when `value` carries more significant decimal places than `places`
pub fn exceeds_scale(value: Decimal, places: u32) -> bool {
    value.normalize().scale() > places
}

// ============================================================================
// Stock & Price Validations
// ============================================================================

/// Validate a stock quantity moved in or out (must be positive)
pub fn validate_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    if exceeds_scale(quantity, QUANTITY_SCALE) {
        return Err("Quantity cannot have more than 4 decimal places");
    }
    Ok(())
}

/// Validate a unit price (zero allowed for free goods)
pub fn validate_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Price cannot be negative");
    }
    if exceeds_scale(price, PRICE_SCALE) {
        return Err("Price cannot have fractions of a cent");
    }
    Ok(())
}

/// Validate a free-text source reference such as an invoice number
pub fn validate_source_reference(reference: &str) -> Result<(), &'static str> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err("Reference cannot be blank");
    }
    if trimmed.len() > 64 {
        return Err("Reference must be at most 64 characters");
    }
    Ok(())
}

// ============================================================================
// Loan Validations
// ============================================================================

/// Maximum loan term in months
pub const MAX_INSTALLMENTS: i32 = 360;

/// Validate the annual interest rate in percent (0-100)
pub fn validate_interest_rate(rate: Decimal) -> Result<(), &'static str> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err("Interest rate must be between 0 and 100%");
    }
    if exceeds_scale(rate, RATE_SCALE) {
        return Err("Interest rate cannot have more than 3 decimal places");
    }
    Ok(())
}

/// Validate the number of monthly installments
pub fn validate_installments_count(count: i32) -> Result<(), &'static str> {
    if count < 1 {
        return Err("Installments count must be at least 1");
    }
    if count > MAX_INSTALLMENTS {
        return Err("Installments count exceeds the maximum loan term");
    }
    Ok(())
}

/// Validate a loan principal
pub fn validate_loan_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount <= Decimal::ZERO {
        return Err("Loan amount must be positive");
    }
    if exceeds_scale(amount, PRICE_SCALE) {
        return Err("Loan amount cannot have fractions of a cent");
    }
    Ok(())
}
