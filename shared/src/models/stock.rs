//! Stock ledger: per-location balances and their immutable movement log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::source::{SourceKind, SourceRef};
use crate::error::{DomainError, DomainResult};
use crate::validation::{exceeds_scale, validate_quantity, QUANTITY_SCALE};

/// Where a quantity of a product is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLocation {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub branch_id: Uuid,
    pub unit_id: Option<Uuid>,
}

impl StockLocation {
    /// Same product and unit, held somewhere else
    pub fn relocated(&self, warehouse_id: Uuid, branch_id: Uuid) -> Self {
        Self {
            warehouse_id,
            branch_id,
            ..*self
        }
    }
}

/// Movement type. Descriptive only; the signed `quantity` carries the arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementType::In),
            "out" => Some(MovementType::Out),
            "adjustment" => Some(MovementType::Adjustment),
            _ => None,
        }
    }
}

/// Whether stock may go below zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPolicy {
    pub allow_negative: bool,
}

impl Default for StockPolicy {
    fn default() -> Self {
        Self {
            allow_negative: true,
        }
    }
}

impl StockPolicy {
    pub const STRICT: StockPolicy = StockPolicy {
        allow_negative: false,
    };

    fn check(&self, available: Decimal, requested: Decimal, resulting: Decimal) -> DomainResult<()> {
        if !self.allow_negative && resulting < Decimal::ZERO {
            return Err(DomainError::InsufficientStock {
                available,
                requested,
            });
        }
        Ok(())
    }
}

/// Who, why and when for a balance mutation
#[derive(Debug, Clone)]
pub struct MovementContext {
    pub actor: Uuid,
    pub source: Option<SourceRef>,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

impl MovementContext {
    pub fn new(actor: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            actor,
            source: None,
            notes: None,
            at,
        }
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Current quantity of a product at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockBalance {
    pub id: Uuid,
    #[serde(flatten)]
    pub location: StockLocation,
    pub quantity: Decimal,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub last_source: Option<SourceRef>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub stock_balance_id: Uuid,
    pub movement_type: MovementType,
    /// Signed delta applied to the balance
    pub quantity: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub source: Option<SourceRef>,
    pub created_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The two ledger rows written by a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMovements {
    pub transfer_id: Uuid,
    pub outgoing: StockMovement,
    pub incoming: StockMovement,
}

fn require_positive(quantity: Decimal) -> DomainResult<()> {
    validate_quantity(quantity).map_err(|msg| DomainError::validation("quantity", msg))
}

impl StockBalance {
    /// A zero balance, as created on first stock entry for a location
    pub fn open(location: StockLocation, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            location,
            quantity: Decimal::ZERO,
            last_updated_at: None,
            last_source: None,
            notes: None,
            created_at: at,
        }
    }

    /// Apply a signed delta and produce the matching ledger row.
    ///
    /// Every other mutation goes through here, so a balance change and its
    /// movement can never diverge.
    pub fn record_movement(
        &mut self,
        movement_type: MovementType,
        delta: Decimal,
        ctx: &MovementContext,
    ) -> StockMovement {
        let before = self.quantity;
        let after = before + delta;

        self.quantity = after;
        self.last_updated_at = Some(ctx.at);
        if ctx.source.is_some() {
            self.last_source = ctx.source.clone();
        }
        if ctx.notes.is_some() {
            self.notes = ctx.notes.clone();
        }

        StockMovement {
            id: Uuid::new_v4(),
            stock_balance_id: self.id,
            movement_type,
            quantity: delta,
            quantity_before: before,
            quantity_after: after,
            source: ctx.source.clone(),
            created_by: ctx.actor,
            notes: ctx.notes.clone(),
            created_at: ctx.at,
        }
    }

    pub fn add_stock(&mut self, quantity: Decimal, ctx: &MovementContext) -> DomainResult<StockMovement> {
        require_positive(quantity)?;
        Ok(self.record_movement(MovementType::In, quantity, ctx))
    }

    pub fn remove_stock(
        &mut self,
        quantity: Decimal,
        policy: StockPolicy,
        ctx: &MovementContext,
    ) -> DomainResult<StockMovement> {
        require_positive(quantity)?;
        policy.check(self.quantity, quantity, self.quantity - quantity)?;
        Ok(self.record_movement(MovementType::Out, -quantity, ctx))
    }

    /// Set the quantity outright (recount, write-off). A zero delta is still recorded.
    pub fn adjust_stock(
        &mut self,
        new_quantity: Decimal,
        policy: StockPolicy,
        ctx: &MovementContext,
    ) -> DomainResult<StockMovement> {
        if !policy.allow_negative && new_quantity < Decimal::ZERO {
            return Err(DomainError::validation(
                "new_quantity",
                "Quantity cannot be negative",
            ));
        }
        if exceeds_scale(new_quantity, QUANTITY_SCALE) {
            return Err(DomainError::validation(
                "new_quantity",
                "Quantity cannot have more than 4 decimal places",
            ));
        }
        let delta = new_quantity - self.quantity;
        Ok(self.record_movement(MovementType::Adjustment, delta, ctx))
    }
}

/// Move `quantity` from `source` to `target` (same product and unit).
///
/// Both balances are checked before either is touched, so a rejected
/// transfer leaves them unchanged.
pub fn plan_transfer(
    source: &mut StockBalance,
    target: &mut StockBalance,
    quantity: Decimal,
    policy: StockPolicy,
    transfer_id: Uuid,
    ctx: &MovementContext,
) -> DomainResult<TransferMovements> {
    require_positive(quantity)?;
    if source.id == target.id || source.location == target.location {
        return Err(DomainError::validation(
            "target",
            "Transfer target must differ from the source location",
        ));
    }
    if source.location.product_id != target.location.product_id
        || source.location.unit_id != target.location.unit_id
    {
        return Err(DomainError::validation(
            "target",
            "Transfer target must hold the same product and unit",
        ));
    }
    policy.check(source.quantity, quantity, source.quantity - quantity)?;

    let reference = ctx.source.as_ref().and_then(|s| s.reference.clone());
    let ctx = MovementContext {
        source: Some(SourceRef {
            kind: SourceKind::Transfer(transfer_id),
            reference,
        }),
        ..ctx.clone()
    };

    let outgoing = source.remove_stock(quantity, policy, &ctx)?;
    let incoming = target.add_stock(quantity, &ctx)?;

    Ok(TransferMovements {
        transfer_id,
        outgoing,
        incoming,
    })
}

/// Check a balance against its full movement history (oldest first).
///
/// Holds when every row satisfies `after = before + quantity`, the rows
/// chain without gaps starting from zero, and the balance equals the sum
/// of all deltas.
pub fn verify_ledger(quantity: Decimal, movements: &[StockMovement]) -> bool {
    let mut running = Decimal::ZERO;
    for movement in movements {
        if movement.quantity_before != running
            || movement.quantity_after != movement.quantity_before + movement.quantity
        {
            return false;
        }
        running = movement.quantity_after;
    }
    running == quantity
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn location() -> StockLocation {
        StockLocation {
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            unit_id: None,
        }
    }

    fn ctx() -> MovementContext {
        MovementContext::new(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_add_stock_records_in_movement() {
        let mut balance = StockBalance::open(location(), Utc::now());
        let movement = balance.add_stock(dec("12.5"), &ctx()).unwrap();

        assert_eq!(balance.quantity, dec("12.5"));
        assert_eq!(movement.movement_type, MovementType::In);
        assert_eq!(movement.quantity, dec("12.5"));
        assert_eq!(movement.quantity_before, Decimal::ZERO);
        assert_eq!(movement.quantity_after, dec("12.5"));
        assert_eq!(movement.stock_balance_id, balance.id);
    }

    #[test]
    fn test_add_stock_rejects_non_positive() {
        let mut balance = StockBalance::open(location(), Utc::now());
        assert!(balance.add_stock(Decimal::ZERO, &ctx()).is_err());
        assert!(balance.add_stock(dec("-1"), &ctx()).is_err());
        assert_eq!(balance.quantity, Decimal::ZERO);
        assert!(balance.last_updated_at.is_none());
    }

    #[test]
    fn test_remove_stock_stores_negative_delta() {
        let mut balance = StockBalance::open(location(), Utc::now());
        balance.add_stock(dec("10"), &ctx()).unwrap();
        let movement = balance
            .remove_stock(dec("4"), StockPolicy::default(), &ctx())
            .unwrap();

        assert_eq!(movement.movement_type, MovementType::Out);
        assert_eq!(movement.quantity, dec("-4"));
        assert_eq!(balance.quantity, dec("6"));
    }

    #[test]
    fn test_remove_stock_permissive_goes_negative() {
        let mut balance = StockBalance::open(location(), Utc::now());
        balance
            .remove_stock(dec("3"), StockPolicy::default(), &ctx())
            .unwrap();
        assert_eq!(balance.quantity, dec("-3"));
    }

    #[test]
    fn test_remove_stock_strict_refuses_negative() {
        let mut balance = StockBalance::open(location(), Utc::now());
        balance.add_stock(dec("2"), &ctx()).unwrap();
        let err = balance
            .remove_stock(dec("3"), StockPolicy::STRICT, &ctx())
            .unwrap_err();

        assert_eq!(
            err,
            DomainError::InsufficientStock {
                available: dec("2"),
                requested: dec("3"),
            }
        );
        assert_eq!(balance.quantity, dec("2"));
    }

    #[test]
    fn test_adjust_stock_records_delta() {
        let mut balance = StockBalance::open(location(), Utc::now());
        balance.add_stock(dec("10"), &ctx()).unwrap();
        let movement = balance
            .adjust_stock(dec("7"), StockPolicy::default(), &ctx())
            .unwrap();

        assert_eq!(movement.movement_type, MovementType::Adjustment);
        assert_eq!(movement.quantity, dec("-3"));
        assert_eq!(balance.quantity, dec("7"));

        let recount = balance
            .adjust_stock(dec("7"), StockPolicy::default(), &ctx())
            .unwrap();
        assert_eq!(recount.quantity, Decimal::ZERO);
    }

    #[test]
    fn test_movement_updates_last_source_and_notes() {
        let mut balance = StockBalance::open(location(), Utc::now());
        let provider = Uuid::new_v4();
        let ctx = ctx()
            .with_source(SourceRef::with_reference(SourceKind::Provider(provider), "INV-001"))
            .with_notes(Some("first delivery".to_string()));
        balance.add_stock(dec("5"), &ctx).unwrap();

        let source = balance.last_source.clone().unwrap();
        assert_eq!(source.kind, SourceKind::Provider(provider));
        assert_eq!(source.reference.as_deref(), Some("INV-001"));
        assert_eq!(balance.notes.as_deref(), Some("first delivery"));
    }

    #[test]
    fn test_transfer_moves_quantity() {
        let loc = location();
        let mut source = StockBalance::open(loc, Utc::now());
        let mut target = StockBalance::open(loc.relocated(Uuid::new_v4(), Uuid::new_v4()), Utc::now());
        source.add_stock(dec("20"), &ctx()).unwrap();

        let transfer_id = Uuid::new_v4();
        let moves = plan_transfer(
            &mut source,
            &mut target,
            dec("8"),
            StockPolicy::default(),
            transfer_id,
            &ctx(),
        )
        .unwrap();

        assert_eq!(source.quantity, dec("12"));
        assert_eq!(target.quantity, dec("8"));
        assert_eq!(moves.outgoing.quantity, dec("-8"));
        assert_eq!(moves.incoming.quantity, dec("8"));
        assert_eq!(
            moves.incoming.source.as_ref().map(|s| s.kind),
            Some(SourceKind::Transfer(transfer_id))
        );
    }

    #[test]
    fn test_transfer_to_same_location_rejected() {
        let loc = location();
        let mut source = StockBalance::open(loc, Utc::now());
        let mut target = StockBalance::open(loc, Utc::now());
        source.add_stock(dec("5"), &ctx()).unwrap();

        let result = plan_transfer(
            &mut source,
            &mut target,
            dec("1"),
            StockPolicy::default(),
            Uuid::new_v4(),
            &ctx(),
        );
        assert!(result.is_err());
        assert_eq!(source.quantity, dec("5"));
        assert_eq!(target.quantity, Decimal::ZERO);
    }

    #[test]
    fn test_transfer_strict_leaves_both_untouched() {
        let loc = location();
        let mut source = StockBalance::open(loc, Utc::now());
        let mut target = StockBalance::open(loc.relocated(Uuid::new_v4(), loc.branch_id), Utc::now());
        source.add_stock(dec("1"), &ctx()).unwrap();

        let result = plan_transfer(
            &mut source,
            &mut target,
            dec("2"),
            StockPolicy::STRICT,
            Uuid::new_v4(),
            &ctx(),
        );
        assert!(matches!(result, Err(DomainError::InsufficientStock { .. })));
        assert_eq!(source.quantity, dec("1"));
        assert!(target.last_updated_at.is_none());
    }

    #[test]
    fn test_verify_ledger_detects_tampering() {
        let mut balance = StockBalance::open(location(), Utc::now());
        let mut movements = vec![
            balance.add_stock(dec("10"), &ctx()).unwrap(),
            balance.remove_stock(dec("4"), StockPolicy::default(), &ctx()).unwrap(),
        ];
        assert!(verify_ledger(balance.quantity, &movements));

        movements[1].quantity = dec("-5");
        assert!(!verify_ledger(balance.quantity, &movements));
    }

    #[test]
    fn test_movement_type_parse() {
        for t in [MovementType::In, MovementType::Out, MovementType::Adjustment] {
            assert_eq!(MovementType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MovementType::parse("transfer"), None);
    }
}
