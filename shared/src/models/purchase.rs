//! Purchase invoice lines received into stock

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::price::PricePair;
use crate::error::{DomainError, DomainResult};
use crate::types::round_money;
use crate::validation::{validate_price, validate_quantity};

/// A line of a provider invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseInvoiceItem {
    pub product_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub quantity: Decimal,
    pub purchase_price: Decimal,
    pub sell_price: Option<Decimal>,
    /// Free goods: stocked, but no cost on the invoice
    #[serde(default)]
    pub is_bonus: bool,
}

impl PurchaseInvoiceItem {
    pub fn validate(&self) -> DomainResult<()> {
        validate_quantity(self.quantity).map_err(|msg| DomainError::validation("quantity", msg))?;
        validate_price(self.purchase_price)
            .map_err(|msg| DomainError::validation("purchase_price", msg))?;
        if let Some(sell_price) = self.sell_price {
            validate_price(sell_price).map_err(|msg| DomainError::validation("sell_price", msg))?;
        }
        Ok(())
    }

    pub fn line_total(&self) -> Decimal {
        if self.is_bonus {
            Decimal::ZERO
        } else {
            round_money(self.quantity * self.purchase_price)
        }
    }

    /// New prices implied by this line, or None when they match `current`.
    ///
    /// Bonus lines are priced like any other; only their line total is zero.
    pub fn price_update(&self, current: PricePair) -> Option<PricePair> {
        let proposed = PricePair {
            purchase_price: self.purchase_price,
            sell_price: self.sell_price.unwrap_or(current.sell_price),
        };
        (proposed != current).then_some(proposed)
    }
}

pub fn invoice_total(items: &[PurchaseInvoiceItem]) -> Decimal {
    items.iter().map(PurchaseInvoiceItem::line_total).sum()
}
