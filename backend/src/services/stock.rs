//! Stock ledger service: balances per location and their movement log
//!
//! Every mutation locks the balance row, applies the ledger rule from
//! `shared`, writes the new quantity and its movement, and commits both
//! together.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{reference_error, AppError, AppResult};
use crate::models::{
    plan_transfer, verify_ledger, MovementContext, MovementType, SourceKind, SourceRef,
    StockBalance, StockLocation, StockMovement, StockPolicy, TransferMovements,
};
use shared::{exceeds_scale, validate_source_reference, PaginatedResponse, Pagination, QUANTITY_SCALE};

/// Stock ledger service
#[derive(Clone)]
pub struct StockLedgerService {
    db: PgPool,
    policy: StockPolicy,
}

/// Input for adding or removing stock on an existing balance
#[derive(Debug, Deserialize)]
pub struct StockChangeInput {
    pub quantity: Decimal,
    pub notes: Option<String>,
    pub source: Option<SourceRef>,
}

/// Input for receiving stock at a location, creating its balance if needed
#[derive(Debug, Deserialize)]
pub struct ReceiveStockInput {
    #[serde(flatten)]
    pub location: StockLocation,
    pub quantity: Decimal,
    pub notes: Option<String>,
    pub source: Option<SourceRef>,
}

/// Input for setting a balance to a counted quantity
#[derive(Debug, Deserialize)]
pub struct AdjustStockInput {
    pub new_quantity: Decimal,
    pub notes: Option<String>,
    pub source: Option<SourceRef>,
}

/// Input for moving stock to another warehouse/branch
#[derive(Debug, Deserialize)]
pub struct TransferStockInput {
    pub quantity: Decimal,
    pub target_warehouse_id: Uuid,
    pub target_branch_id: Uuid,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Input for a raw signed movement
#[derive(Debug, Deserialize)]
pub struct RecordMovementInput {
    pub movement_type: MovementType,
    /// Signed delta
    pub quantity: Decimal,
    pub notes: Option<String>,
    pub source: Option<SourceRef>,
}

/// Filter for listing balances
#[derive(Debug, Default, Deserialize)]
pub struct BalanceFilter {
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

/// A balance after a mutation, with the movement that produced it
#[derive(Debug, Clone, Serialize)]
pub struct StockChangeResult {
    pub balance: StockBalance,
    pub movement: StockMovement,
}

/// Both balances after a transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub source: StockBalance,
    pub target: StockBalance,
    #[serde(flatten)]
    pub movements: TransferMovements,
}

/// Result of replaying a balance's movement log
#[derive(Debug, Clone, Serialize)]
pub struct LedgerCheck {
    pub balance_id: Uuid,
    pub quantity: Decimal,
    pub movement_total: Decimal,
    pub movement_count: usize,
    pub consistent: bool,
}

const BALANCE_COLUMNS: &str = "id, product_id, warehouse_id, branch_id, unit_id, quantity, \
     last_updated_at, source_type, source_id, source_reference, notes, created_at";

const MOVEMENT_COLUMNS: &str = "id, stock_balance_id, movement_type, quantity, quantity_before, \
     quantity_after, source_type, source_id, source_reference, created_by, notes, created_at";

/// Row for stock balance queries
#[derive(Debug, FromRow)]
struct BalanceRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    branch_id: Uuid,
    unit_id: Option<Uuid>,
    quantity: Decimal,
    last_updated_at: Option<DateTime<Utc>>,
    source_type: Option<String>,
    source_id: Option<Uuid>,
    source_reference: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BalanceRow> for StockBalance {
    type Error = AppError;

    fn try_from(row: BalanceRow) -> Result<Self, Self::Error> {
        let last_source =
            SourceRef::from_columns(row.source_type.as_deref(), row.source_id, row.source_reference)
                .map_err(|e| AppError::Internal(format!("stock balance {}: {}", row.id, e)))?;
        Ok(StockBalance {
            id: row.id,
            location: StockLocation {
                product_id: row.product_id,
                warehouse_id: row.warehouse_id,
                branch_id: row.branch_id,
                unit_id: row.unit_id,
            },
            quantity: row.quantity,
            last_updated_at: row.last_updated_at,
            last_source,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

/// Row for stock movement queries
#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    stock_balance_id: Uuid,
    movement_type: String,
    quantity: Decimal,
    quantity_before: Decimal,
    quantity_after: Decimal,
    source_type: Option<String>,
    source_id: Option<Uuid>,
    source_reference: Option<String>,
    created_by: Uuid,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::parse(&row.movement_type).ok_or_else(|| {
            AppError::Internal(format!("unknown movement type '{}'", row.movement_type))
        })?;
        let source =
            SourceRef::from_columns(row.source_type.as_deref(), row.source_id, row.source_reference)
                .map_err(|e| AppError::Internal(format!("stock movement {}: {}", row.id, e)))?;
        Ok(StockMovement {
            id: row.id,
            stock_balance_id: row.stock_balance_id,
            movement_type,
            quantity: row.quantity,
            quantity_before: row.quantity_before,
            quantity_after: row.quantity_after,
            source,
            created_by: row.created_by,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

/// Split a source into its `source_type`, `source_id`, `source_reference` columns
pub(crate) fn source_columns(
    source: Option<&SourceRef>,
) -> (Option<&'static str>, Option<Uuid>, Option<String>) {
    match source {
        Some(s) => (Some(s.kind.type_name()), s.kind.id(), s.reference.clone()),
        None => (None, None, None),
    }
}

fn check_source(source: Option<&SourceRef>) -> AppResult<()> {
    if let Some(reference) = source.and_then(|s| s.reference.as_deref()) {
        validate_source_reference(reference).map_err(|msg| AppError::validation("source.reference", msg))?;
    }
    Ok(())
}

// ============================================================================
// Connection-level ledger primitives
// ============================================================================

/// Lock a balance row for the rest of the transaction
pub(crate) async fn lock_balance(conn: &mut PgConnection, balance_id: Uuid) -> AppResult<StockBalance> {
    let sql = format!("SELECT {BALANCE_COLUMNS} FROM stock_balances WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, BalanceRow>(&sql)
        .bind(balance_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock balance".to_string()))?
        .try_into()
}

/// Make sure a balance row exists for a location and return its id.
///
/// Takes no row lock, so callers can lock in their own order afterwards.
pub(crate) async fn ensure_balance(
    conn: &mut PgConnection,
    location: &StockLocation,
    at: DateTime<Utc>,
) -> AppResult<Uuid> {
    let fresh = StockBalance::open(*location, at);
    sqlx::query(
        r#"
        INSERT INTO stock_balances (id, product_id, warehouse_id, branch_id, unit_id, quantity, created_at)
        VALUES ($1, $2, $3, $4, $5, 0, $6)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(fresh.id)
    .bind(location.product_id)
    .bind(location.warehouse_id)
    .bind(location.branch_id)
    .bind(location.unit_id)
    .bind(at)
    .execute(&mut *conn)
    .await
    .map_err(|e| reference_error(e, "product, warehouse, branch or unit"))?;

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM stock_balances
        WHERE product_id = $1 AND warehouse_id = $2 AND branch_id = $3
          AND unit_id IS NOT DISTINCT FROM $4
        "#,
    )
    .bind(location.product_id)
    .bind(location.warehouse_id)
    .bind(location.branch_id)
    .bind(location.unit_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Get-or-create the balance for a location and lock it
pub(crate) async fn lock_or_create_balance(
    conn: &mut PgConnection,
    location: &StockLocation,
    at: DateTime<Utc>,
) -> AppResult<StockBalance> {
    let id = ensure_balance(conn, location, at).await?;
    lock_balance(conn, id).await
}

/// Persist a mutated balance together with the movements that produced it
pub(crate) async fn save_balance(
    conn: &mut PgConnection,
    balance: &StockBalance,
    movements: &[&StockMovement],
) -> AppResult<()> {
    let (source_type, source_id, source_reference) = source_columns(balance.last_source.as_ref());
    sqlx::query(
        r#"
        UPDATE stock_balances
        SET quantity = $1, last_updated_at = $2, source_type = $3, source_id = $4,
            source_reference = $5, notes = $6
        WHERE id = $7
        "#,
    )
    .bind(balance.quantity)
    .bind(balance.last_updated_at)
    .bind(source_type)
    .bind(source_id)
    .bind(source_reference)
    .bind(&balance.notes)
    .bind(balance.id)
    .execute(&mut *conn)
    .await?;

    for movement in movements {
        let (source_type, source_id, source_reference) = source_columns(movement.source.as_ref());
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, stock_balance_id, movement_type, quantity, quantity_before, quantity_after,
                source_type, source_id, source_reference, created_by, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(movement.id)
        .bind(movement.stock_balance_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(source_type)
        .bind(source_id)
        .bind(source_reference)
        .bind(movement.created_by)
        .bind(&movement.notes)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        tracing::info!(
            balance_id = %movement.stock_balance_id,
            movement_type = movement.movement_type.as_str(),
            delta = %movement.quantity,
            after = %movement.quantity_after,
            "stock movement recorded"
        );
    }

    Ok(())
}

/// Add stock at a location inside the caller's transaction
pub(crate) async fn add_stock_in_tx(
    conn: &mut PgConnection,
    location: &StockLocation,
    quantity: Decimal,
    ctx: &MovementContext,
) -> AppResult<StockChangeResult> {
    let mut balance = lock_or_create_balance(conn, location, ctx.at).await?;
    let movement = balance.add_stock(quantity, ctx)?;
    save_balance(conn, &balance, &[&movement]).await?;
    Ok(StockChangeResult { balance, movement })
}

impl StockLedgerService {
    /// Create a new StockLedgerService instance
    pub fn new(db: PgPool, policy: StockPolicy) -> Self {
        Self { db, policy }
    }

    /// Get the balance for a location, creating an empty one on first use
    pub async fn get_or_create_balance(&self, location: StockLocation) -> AppResult<StockBalance> {
        let mut tx = self.db.begin().await?;
        let balance = lock_or_create_balance(&mut *tx, &location, Utc::now()).await?;
        tx.commit().await?;
        Ok(balance)
    }

    /// Receive stock at a location (get-or-create, then add)
    pub async fn receive_stock(&self, user_id: Uuid, input: ReceiveStockInput) -> AppResult<StockChangeResult> {
        check_source(input.source.as_ref())?;
        let ctx = context(user_id, input.source, input.notes);

        let mut tx = self.db.begin().await?;
        let result = add_stock_in_tx(&mut *tx, &input.location, input.quantity, &ctx).await?;
        tx.commit().await?;

        Ok(result)
    }

    /// Add stock to an existing balance
    pub async fn add_stock(
        &self,
        user_id: Uuid,
        balance_id: Uuid,
        input: StockChangeInput,
    ) -> AppResult<StockChangeResult> {
        check_source(input.source.as_ref())?;
        let ctx = context(user_id, input.source, input.notes);
        self.mutate(balance_id, |balance| balance.add_stock(input.quantity, &ctx).map_err(Into::into))
            .await
    }

    /// Remove stock from a balance
    pub async fn remove_stock(
        &self,
        user_id: Uuid,
        balance_id: Uuid,
        input: StockChangeInput,
    ) -> AppResult<StockChangeResult> {
        check_source(input.source.as_ref())?;
        let ctx = context(user_id, input.source, input.notes);
        let policy = self.policy;
        self.mutate(balance_id, |balance| {
            balance
                .remove_stock(input.quantity, policy, &ctx)
                .map_err(Into::into)
        })
        .await
    }

    /// Set a balance to a counted quantity
    pub async fn adjust_stock(
        &self,
        user_id: Uuid,
        balance_id: Uuid,
        input: AdjustStockInput,
    ) -> AppResult<StockChangeResult> {
        check_source(input.source.as_ref())?;
        let ctx = context(user_id, input.source, input.notes);
        let policy = self.policy;
        self.mutate(balance_id, |balance| {
            balance
                .adjust_stock(input.new_quantity, policy, &ctx)
                .map_err(Into::into)
        })
        .await
    }

    /// Apply a raw signed movement
    pub async fn record_movement(
        &self,
        user_id: Uuid,
        balance_id: Uuid,
        input: RecordMovementInput,
    ) -> AppResult<StockChangeResult> {
        check_source(input.source.as_ref())?;
        if input.quantity.is_zero() && input.movement_type != MovementType::Adjustment {
            return Err(AppError::validation("quantity", "Only adjustments may record a zero delta"));
        }
        if exceeds_scale(input.quantity, QUANTITY_SCALE) {
            return Err(AppError::validation(
                "quantity",
                "Quantity cannot have more than 4 decimal places",
            ));
        }
        let ctx = context(user_id, input.source, input.notes);
        let policy = self.policy;
        self.mutate(balance_id, |balance| {
            if !policy.allow_negative && balance.quantity + input.quantity < Decimal::ZERO {
                return Err(AppError::InsufficientInventory(format!(
                    "available {}, delta {}",
                    balance.quantity, input.quantity
                )));
            }
            Ok(balance.record_movement(input.movement_type, input.quantity, &ctx))
        })
        .await
    }

    async fn mutate<F>(&self, balance_id: Uuid, apply: F) -> AppResult<StockChangeResult>
    where
        F: FnOnce(&mut StockBalance) -> AppResult<StockMovement>,
    {
        let mut tx = self.db.begin().await?;
        let mut balance = lock_balance(&mut *tx, balance_id).await?;
        let movement = apply(&mut balance)?;
        save_balance(&mut *tx, &balance, &[&movement]).await?;
        tx.commit().await?;

        Ok(StockChangeResult { balance, movement })
    }

    /// Move stock to another warehouse/branch for the same product and unit
    pub async fn transfer_stock(
        &self,
        user_id: Uuid,
        balance_id: Uuid,
        input: TransferStockInput,
    ) -> AppResult<TransferResult> {
        let transfer_id = Uuid::new_v4();
        let mut ctx = context(user_id, None, input.notes);
        if let Some(reference) = input.reference {
            validate_source_reference(&reference).map_err(|msg| AppError::validation("reference", msg))?;
            ctx.source = Some(SourceRef::with_reference(SourceKind::Transfer(transfer_id), reference));
        }

        let mut tx = self.db.begin().await?;

        let source_location = self.get_balance_in(&mut *tx, balance_id).await?.location;
        let target_location = source_location.relocated(input.target_warehouse_id, input.target_branch_id);
        if target_location == source_location {
            return Err(AppError::validation(
                "target_warehouse_id",
                "Transfer target must differ from the source location",
            ));
        }

        // Create the target without locking it, then lock both in id order
        let target_id = ensure_balance(&mut *tx, &target_location, ctx.at).await?;
        let (mut source, mut target) = lock_pair(&mut *tx, balance_id, target_id).await?;

        let movements = plan_transfer(
            &mut source,
            &mut target,
            input.quantity,
            self.policy,
            transfer_id,
            &ctx,
        )?;

        save_balance(&mut *tx, &source, &[&movements.outgoing]).await?;
        save_balance(&mut *tx, &target, &[&movements.incoming]).await?;
        tx.commit().await?;

        tracing::info!(
            %transfer_id,
            source = %source.id,
            target = %target.id,
            quantity = %input.quantity,
            "stock transferred"
        );

        Ok(TransferResult {
            source,
            target,
            movements,
        })
    }

    async fn get_balance_in(&self, conn: &mut PgConnection, balance_id: Uuid) -> AppResult<StockBalance> {
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM stock_balances WHERE id = $1");
        sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(balance_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock balance".to_string()))?
            .try_into()
    }

    /// Get a balance by ID
    pub async fn get_balance(&self, balance_id: Uuid) -> AppResult<StockBalance> {
        let mut conn = self.db.acquire().await?;
        self.get_balance_in(&mut conn, balance_id).await
    }

    /// List balances, optionally narrowed to a product, warehouse or branch
    pub async fn list_balances(&self, filter: BalanceFilter) -> AppResult<Vec<StockBalance>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances \
             WHERE ($1::uuid IS NULL OR product_id = $1) \
             AND ($2::uuid IS NULL OR warehouse_id = $2) \
             AND ($3::uuid IS NULL OR branch_id = $3) \
             ORDER BY product_id, warehouse_id, branch_id"
        );
        sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(filter.product_id)
            .bind(filter.warehouse_id)
            .bind(filter.branch_id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(StockBalance::try_from)
            .collect()
    }

    /// Movements of a balance, newest first
    pub async fn list_movements(
        &self,
        balance_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<StockMovement>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE stock_balance_id = $1")
            .bind(balance_id)
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE stock_balance_id = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3"
        );
        let data = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(balance_id)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(StockMovement::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            pagination: pagination.meta(total as u64),
        })
    }

    /// Replay a balance's movement log and compare it with the stored quantity
    pub async fn verify_balance(&self, balance_id: Uuid) -> AppResult<LedgerCheck> {
        let balance = self.get_balance(balance_id).await?;
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE stock_balance_id = $1 ORDER BY seq ASC"
        );
        let movements = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(balance_id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(StockMovement::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        let consistent = verify_ledger(balance.quantity, &movements);
        if !consistent {
            tracing::warn!(%balance_id, "stock ledger does not match balance");
        }

        Ok(LedgerCheck {
            balance_id,
            quantity: balance.quantity,
            movement_total: movements.iter().map(|m| m.quantity).sum(),
            movement_count: movements.len(),
            consistent,
        })
    }
}

/// Order in which two balance rows are locked.
///
/// Every multi-row lock goes through this so concurrent transfers in
/// opposite directions queue instead of deadlocking.
fn lock_order(a: Uuid, b: Uuid) -> [Uuid; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

/// Lock two balances in id order and return them as (first, second)
async fn lock_pair(
    conn: &mut PgConnection,
    first: Uuid,
    second: Uuid,
) -> AppResult<(StockBalance, StockBalance)> {
    let [low, high] = lock_order(first, second);
    let low = lock_balance(conn, low).await?;
    let high = lock_balance(conn, high).await?;

    if low.id == first {
        Ok((low, high))
    } else {
        Ok((high, low))
    }
}

fn context(user_id: Uuid, source: Option<SourceRef>, notes: Option<String>) -> MovementContext {
    let ctx = MovementContext::new(user_id, Utc::now()).with_notes(notes);
    match source {
        Some(source) => ctx.with_source(source),
        None => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_is_independent_of_direction() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // A→B and B→A must request the same rows in the same sequence
        assert_eq!(lock_order(a, b), lock_order(b, a));
        let [low, high] = lock_order(a, b);
        assert!(low < high);
        assert_eq!(lock_order(a, a), [a, a]);
    }

    #[test]
    fn test_lock_order_follows_uuid_ordering() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        assert_eq!(lock_order(high, low), [low, high]);
        assert_eq!(lock_order(low, high), [low, high]);
    }
}
