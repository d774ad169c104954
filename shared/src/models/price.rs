//! Product price history

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::source::SourceRef;
use crate::types::{format_money, round_money};

/// Why a product's prices changed. Chosen by the caller, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceChangeReason {
    ProductCreation,
    ManualUpdate,
    InvoiceUpdate,
    SystemUpdate,
    ProviderUpdate,
}

impl PriceChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceChangeReason::ProductCreation => "product_creation",
            PriceChangeReason::ManualUpdate => "manual_update",
            PriceChangeReason::InvoiceUpdate => "invoice_update",
            PriceChangeReason::SystemUpdate => "system_update",
            PriceChangeReason::ProviderUpdate => "provider_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product_creation" => Some(PriceChangeReason::ProductCreation),
            "manual_update" => Some(PriceChangeReason::ManualUpdate),
            "invoice_update" => Some(PriceChangeReason::InvoiceUpdate),
            "system_update" => Some(PriceChangeReason::SystemUpdate),
            "provider_update" => Some(PriceChangeReason::ProviderUpdate),
            _ => None,
        }
    }
}

/// Direction of a price move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Up,
    Down,
    Mixed,
    NoChange,
}

/// A purchase/sell price pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePair {
    pub purchase_price: Decimal,
    pub sell_price: Decimal,
}

/// One immutable price-change record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub old_purchase_price: Decimal,
    pub new_purchase_price: Decimal,
    pub old_sell_price: Decimal,
    pub new_sell_price: Decimal,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Uuid,
    pub reason: PriceChangeReason,
    pub source: Option<SourceRef>,
    pub notes: Option<String>,
}

/// Derived view of an entry; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeSummary {
    pub purchase_change_percent: Decimal,
    pub sell_change_percent: Decimal,
    pub purchase_direction: PriceDirection,
    pub sell_direction: PriceDirection,
    pub overall_direction: PriceDirection,
    pub description: String,
}

/// Percentage change from `old` to `new`, rounded to 2 places.
///
/// A zero old price reports 100 when the new price is positive, otherwise 0.
pub fn percentage_change(old: Decimal, new: Decimal) -> Decimal {
    if old.is_zero() {
        return if new > Decimal::ZERO {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
    }
    round_money((new - old) / old * Decimal::ONE_HUNDRED)
}

pub fn direction(old: Decimal, new: Decimal) -> PriceDirection {
    match new.cmp(&old) {
        std::cmp::Ordering::Greater => PriceDirection::Up,
        std::cmp::Ordering::Less => PriceDirection::Down,
        std::cmp::Ordering::Equal => PriceDirection::NoChange,
    }
}

/// Combine the purchase and sell directions into one.
///
/// Only a move shared by both prices carries through; a single moved price
/// is `Mixed`.
pub fn overall_direction(purchase: PriceDirection, sell: PriceDirection) -> PriceDirection {
    if purchase == sell {
        purchase
    } else {
        PriceDirection::Mixed
    }
}

impl PriceHistoryEntry {
    /// Build an entry for a change from `old` to `new` prices.
    ///
    /// Always yields an entry, even when nothing moved.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        product_id: Uuid,
        unit_id: Option<Uuid>,
        old: PricePair,
        new: PricePair,
        reason: PriceChangeReason,
        changed_by: Uuid,
        source: Option<SourceRef>,
        notes: Option<String>,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            unit_id,
            old_purchase_price: old.purchase_price,
            new_purchase_price: new.purchase_price,
            old_sell_price: old.sell_price,
            new_sell_price: new.sell_price,
            changed_at,
            changed_by,
            reason,
            source,
            notes,
        }
    }

    pub fn purchase_changed(&self) -> bool {
        self.old_purchase_price != self.new_purchase_price
    }

    pub fn sell_changed(&self) -> bool {
        self.old_sell_price != self.new_sell_price
    }

    pub fn new_prices(&self) -> PricePair {
        PricePair {
            purchase_price: self.new_purchase_price,
            sell_price: self.new_sell_price,
        }
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.purchase_changed() {
            parts.push(format!(
                "Purchase price {} → {}",
                format_money(self.old_purchase_price),
                format_money(self.new_purchase_price)
            ));
        }
        if self.sell_changed() {
            parts.push(format!(
                "Sell price {} → {}",
                format_money(self.old_sell_price),
                format_money(self.new_sell_price)
            ));
        }
        if parts.is_empty() {
            "No price change".to_string()
        } else {
            parts.join(", ")
        }
    }

    pub fn summary(&self) -> PriceChangeSummary {
        let purchase_direction = direction(self.old_purchase_price, self.new_purchase_price);
        let sell_direction = direction(self.old_sell_price, self.new_sell_price);
        PriceChangeSummary {
            purchase_change_percent: percentage_change(
                self.old_purchase_price,
                self.new_purchase_price,
            ),
            sell_change_percent: percentage_change(self.old_sell_price, self.new_sell_price),
            purchase_direction,
            sell_direction,
            overall_direction: overall_direction(purchase_direction, sell_direction),
            description: self.describe(),
        }
    }
}

/// Prices in effect at `at`, from history sorted oldest first
pub fn price_at(history: &[PriceHistoryEntry], at: DateTime<Utc>) -> Option<PricePair> {
    history
        .iter()
        .take_while(|entry| entry.changed_at <= at)
        .last()
        .map(PriceHistoryEntry::new_prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn pair(purchase: &str, sell: &str) -> PricePair {
        PricePair {
            purchase_price: dec(purchase),
            sell_price: dec(sell),
        }
    }

    fn entry(old: PricePair, new: PricePair, at: DateTime<Utc>) -> PriceHistoryEntry {
        PriceHistoryEntry::record(
            Uuid::new_v4(),
            None,
            old,
            new,
            PriceChangeReason::ManualUpdate,
            Uuid::new_v4(),
            None,
            None,
            at,
        )
    }

    #[test]
    fn test_percentage_change() {
        assert_eq!(percentage_change(dec("10"), dec("12")), dec("20"));
        assert_eq!(percentage_change(dec("12"), dec("9")), dec("-25"));
        assert_eq!(percentage_change(dec("3"), dec("4")), dec("33.33"));
    }

    #[test]
    fn test_percentage_change_from_zero() {
        assert_eq!(percentage_change(Decimal::ZERO, dec("50")), dec("100"));
        assert_eq!(percentage_change(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_overall_direction() {
        use PriceDirection::*;
        assert_eq!(overall_direction(Up, Up), Up);
        assert_eq!(overall_direction(Down, Down), Down);
        assert_eq!(overall_direction(Up, Down), Mixed);
        assert_eq!(overall_direction(NoChange, NoChange), NoChange);
        assert_eq!(overall_direction(NoChange, Down), Mixed);
        assert_eq!(overall_direction(Up, NoChange), Mixed);
    }

    #[test]
    fn test_no_change_serializes_as_no_change() {
        let json = serde_json::to_string(&PriceDirection::NoChange).unwrap();
        assert_eq!(json, "\"no_change\"");
    }

    #[test]
    fn test_describe_only_changed_fields() {
        let e = entry(pair("10", "15"), pair("12", "15"), Utc::now());
        assert_eq!(e.describe(), "Purchase price 10.00 → 12.00");

        let same = entry(pair("10", "15"), pair("10", "15"), Utc::now());
        assert_eq!(same.describe(), "No price change");
        assert_eq!(same.summary().overall_direction, PriceDirection::NoChange);
    }

    #[test]
    fn test_summary_mixed() {
        let e = entry(pair("10", "20"), pair("11", "18"), Utc::now());
        let summary = e.summary();
        assert_eq!(summary.purchase_change_percent, dec("10"));
        assert_eq!(summary.sell_change_percent, dec("-10"));
        assert_eq!(summary.overall_direction, PriceDirection::Mixed);
    }

    #[test]
    fn test_price_at() {
        let start = Utc::now();
        let history = vec![
            entry(pair("0", "0"), pair("10", "15"), start),
            entry(pair("10", "15"), pair("12", "18"), start + Duration::days(10)),
        ];

        assert_eq!(price_at(&history, start - Duration::days(1)), None);
        assert_eq!(price_at(&history, start + Duration::days(5)), Some(pair("10", "15")));
        assert_eq!(price_at(&history, start + Duration::days(10)), Some(pair("12", "18")));
    }

    #[test]
    fn test_reason_parse() {
        for reason in [
            PriceChangeReason::ProductCreation,
            PriceChangeReason::ManualUpdate,
            PriceChangeReason::InvoiceUpdate,
            PriceChangeReason::SystemUpdate,
            PriceChangeReason::ProviderUpdate,
        ] {
            assert_eq!(PriceChangeReason::parse(reason.as_str()), Some(reason));
        }
    }
}
