//! Price history service for product and product-unit prices

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{reference_error, AppError, AppResult};
use crate::models::{
    PriceChangeReason, PriceChangeSummary, PriceHistoryEntry, PricePair, SourceRef,
};
use crate::services::stock::source_columns;
use shared::{validate_price, validate_source_reference};

/// Price history service
#[derive(Clone)]
pub struct PriceHistoryService {
    db: PgPool,
}

/// Input for recording a change that was already applied elsewhere
#[derive(Debug, Deserialize)]
pub struct RecordPriceChangeInput {
    pub product_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub old_purchase_price: Decimal,
    pub new_purchase_price: Decimal,
    pub old_sell_price: Decimal,
    pub new_sell_price: Decimal,
    pub reason: PriceChangeReason,
    pub source: Option<SourceRef>,
    pub notes: Option<String>,
}

/// Input for changing a product's current prices
#[derive(Debug, Deserialize)]
pub struct UpdatePricesInput {
    pub unit_id: Option<Uuid>,
    pub purchase_price: Option<Decimal>,
    pub sell_price: Option<Decimal>,
    pub reason: PriceChangeReason,
    pub source: Option<SourceRef>,
    pub notes: Option<String>,
}

/// History query parameters
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub unit_id: Option<Uuid>,
}

/// Point-in-time price query parameters
#[derive(Debug, Deserialize)]
pub struct PriceAtQuery {
    pub unit_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// History entry with its derived summary
#[derive(Debug, Clone, Serialize)]
pub struct PriceHistoryView {
    #[serde(flatten)]
    pub entry: PriceHistoryEntry,
    pub summary: PriceChangeSummary,
}

impl From<PriceHistoryEntry> for PriceHistoryView {
    fn from(entry: PriceHistoryEntry) -> Self {
        let summary = entry.summary();
        Self { entry, summary }
    }
}

/// Prices in effect at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct PointInTimePrices {
    pub product_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub prices: PricePair,
}

#[derive(Debug, FromRow)]
struct PriceRow {
    purchase_price: Decimal,
    sell_price: Decimal,
}

impl From<PriceRow> for PricePair {
    fn from(row: PriceRow) -> Self {
        PricePair {
            purchase_price: row.purchase_price,
            sell_price: row.sell_price,
        }
    }
}

#[derive(Debug, FromRow)]
struct PriceHistoryRow {
    id: Uuid,
    product_id: Uuid,
    unit_id: Option<Uuid>,
    old_purchase_price: Decimal,
    new_purchase_price: Decimal,
    old_sell_price: Decimal,
    new_sell_price: Decimal,
    changed_at: DateTime<Utc>,
    changed_by: Uuid,
    reason: String,
    source_type: Option<String>,
    source_id: Option<Uuid>,
    source_reference: Option<String>,
    notes: Option<String>,
}

impl TryFrom<PriceHistoryRow> for PriceHistoryEntry {
    type Error = AppError;

    fn try_from(row: PriceHistoryRow) -> Result<Self, Self::Error> {
        let reason = PriceChangeReason::parse(&row.reason)
            .ok_or_else(|| AppError::Internal(format!("unknown price change reason '{}'", row.reason)))?;
        let source =
            SourceRef::from_columns(row.source_type.as_deref(), row.source_id, row.source_reference)
                .map_err(|e| AppError::Internal(format!("price history {}: {}", row.id, e)))?;
        Ok(PriceHistoryEntry {
            id: row.id,
            product_id: row.product_id,
            unit_id: row.unit_id,
            old_purchase_price: row.old_purchase_price,
            new_purchase_price: row.new_purchase_price,
            old_sell_price: row.old_sell_price,
            new_sell_price: row.new_sell_price,
            changed_at: row.changed_at,
            changed_by: row.changed_by,
            reason,
            source,
            notes: row.notes,
        })
    }
}

const HISTORY_COLUMNS: &str = "id, product_id, unit_id, old_purchase_price, new_purchase_price, \
     old_sell_price, new_sell_price, changed_at, changed_by, reason, source_type, source_id, \
     source_reference, notes";

fn check_price(field: &str, price: Decimal) -> AppResult<()> {
    validate_price(price).map_err(|msg| AppError::validation(field, msg))
}

fn check_source(source: Option<&SourceRef>) -> AppResult<()> {
    if let Some(reference) = source.and_then(|s| s.reference.as_deref()) {
        validate_source_reference(reference).map_err(|msg| AppError::validation("source.reference", msg))?;
    }
    Ok(())
}

/// Lock the current price row of a product, or of one of its units
pub(crate) async fn lock_prices(
    conn: &mut PgConnection,
    product_id: Uuid,
    unit_id: Option<Uuid>,
) -> AppResult<PricePair> {
    let row = match unit_id {
        Some(unit_id) => {
            sqlx::query_as::<_, PriceRow>(
                r#"
                SELECT purchase_price, sell_price FROM product_units
                WHERE product_id = $1 AND unit_id = $2
                FOR UPDATE
                "#,
            )
            .bind(product_id)
            .bind(unit_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Product unit".to_string()))?
        }
        None => sqlx::query_as::<_, PriceRow>(
            "SELECT purchase_price, sell_price FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?,
    };
    Ok(row.into())
}

async fn write_prices(
    conn: &mut PgConnection,
    product_id: Uuid,
    unit_id: Option<Uuid>,
    prices: PricePair,
    at: DateTime<Utc>,
) -> AppResult<()> {
    match unit_id {
        Some(unit_id) => {
            sqlx::query(
                r#"
                UPDATE product_units SET purchase_price = $1, sell_price = $2, updated_at = $3
                WHERE product_id = $4 AND unit_id = $5
                "#,
            )
            .bind(prices.purchase_price)
            .bind(prices.sell_price)
            .bind(at)
            .bind(product_id)
            .bind(unit_id)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                "UPDATE products SET purchase_price = $1, sell_price = $2, updated_at = $3 WHERE id = $4",
            )
            .bind(prices.purchase_price)
            .bind(prices.sell_price)
            .bind(at)
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Insert one history entry
pub(crate) async fn insert_entry(conn: &mut PgConnection, entry: &PriceHistoryEntry) -> AppResult<()> {
    let (source_type, source_id, source_reference) = source_columns(entry.source.as_ref());
    sqlx::query(
        r#"
        INSERT INTO price_histories (
            id, product_id, unit_id, old_purchase_price, new_purchase_price,
            old_sell_price, new_sell_price, changed_at, changed_by, reason,
            source_type, source_id, source_reference, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(entry.id)
    .bind(entry.product_id)
    .bind(entry.unit_id)
    .bind(entry.old_purchase_price)
    .bind(entry.new_purchase_price)
    .bind(entry.old_sell_price)
    .bind(entry.new_sell_price)
    .bind(entry.changed_at)
    .bind(entry.changed_by)
    .bind(entry.reason.as_str())
    .bind(source_type)
    .bind(source_id)
    .bind(source_reference)
    .bind(&entry.notes)
    .execute(&mut *conn)
    .await
    .map_err(|e| reference_error(e, "Product or unit"))?;

    tracing::info!(
        product_id = %entry.product_id,
        reason = entry.reason.as_str(),
        change = %entry.describe(),
        "price change recorded"
    );
    Ok(())
}

/// Replace prices already locked with [`lock_prices`] and record the change,
/// inside the caller's transaction
#[allow(clippy::too_many_arguments)]
pub(crate) async fn change_prices_in_tx(
    conn: &mut PgConnection,
    product_id: Uuid,
    unit_id: Option<Uuid>,
    old: PricePair,
    new: PricePair,
    reason: PriceChangeReason,
    changed_by: Uuid,
    source: Option<SourceRef>,
    notes: Option<String>,
) -> AppResult<PriceHistoryEntry> {
    let now = Utc::now();
    write_prices(conn, product_id, unit_id, new, now).await?;

    let entry = PriceHistoryEntry::record(
        product_id, unit_id, old, new, reason, changed_by, source, notes, now,
    );
    insert_entry(conn, &entry).await?;
    Ok(entry)
}

impl PriceHistoryService {
    /// Create a new PriceHistoryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Record a price change. Always writes exactly one entry, even when
    /// old and new prices are equal.
    pub async fn record_price_change(
        &self,
        user_id: Uuid,
        input: RecordPriceChangeInput,
    ) -> AppResult<PriceHistoryView> {
        for (field, price) in [
            ("old_purchase_price", input.old_purchase_price),
            ("new_purchase_price", input.new_purchase_price),
            ("old_sell_price", input.old_sell_price),
            ("new_sell_price", input.new_sell_price),
        ] {
            check_price(field, price)?;
        }
        check_source(input.source.as_ref())?;

        let entry = PriceHistoryEntry::record(
            input.product_id,
            input.unit_id,
            PricePair {
                purchase_price: input.old_purchase_price,
                sell_price: input.old_sell_price,
            },
            PricePair {
                purchase_price: input.new_purchase_price,
                sell_price: input.new_sell_price,
            },
            input.reason,
            user_id,
            input.source,
            input.notes,
            Utc::now(),
        );

        let mut conn = self.db.acquire().await?;
        insert_entry(&mut conn, &entry).await?;

        Ok(entry.into())
    }

    /// Update a product's (or product unit's) prices and record the change
    pub async fn update_product_prices(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: UpdatePricesInput,
    ) -> AppResult<PriceHistoryView> {
        if input.purchase_price.is_none() && input.sell_price.is_none() {
            return Err(AppError::validation(
                "purchase_price",
                "At least one of purchase_price or sell_price is required",
            ));
        }
        if let Some(price) = input.purchase_price {
            check_price("purchase_price", price)?;
        }
        if let Some(price) = input.sell_price {
            check_price("sell_price", price)?;
        }
        check_source(input.source.as_ref())?;

        let mut tx = self.db.begin().await?;

        let current = lock_prices(&mut *tx, product_id, input.unit_id).await?;
        let new = PricePair {
            purchase_price: input.purchase_price.unwrap_or(current.purchase_price),
            sell_price: input.sell_price.unwrap_or(current.sell_price),
        };
        let entry = change_prices_in_tx(
            &mut *tx,
            product_id,
            input.unit_id,
            current,
            new,
            input.reason,
            user_id,
            input.source,
            input.notes,
        )
        .await?;

        tx.commit().await?;

        Ok(entry.into())
    }

    /// History of a product (or product unit), newest first
    pub async fn list_history(&self, product_id: Uuid, query: HistoryQuery) -> AppResult<Vec<PriceHistoryView>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM price_histories \
             WHERE product_id = $1 AND unit_id IS NOT DISTINCT FROM $2 \
             ORDER BY changed_at DESC"
        );
        sqlx::query_as::<_, PriceHistoryRow>(&sql)
            .bind(product_id)
            .bind(query.unit_id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(|row| PriceHistoryEntry::try_from(row).map(PriceHistoryView::from))
            .collect()
    }

    /// Prices in effect at a point in time
    pub async fn price_at(&self, product_id: Uuid, query: PriceAtQuery) -> AppResult<PointInTimePrices> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM price_histories \
             WHERE product_id = $1 AND unit_id IS NOT DISTINCT FROM $2 AND changed_at <= $3 \
             ORDER BY changed_at DESC LIMIT 1"
        );
        let latest: PriceHistoryEntry = sqlx::query_as::<_, PriceHistoryRow>(&sql)
            .bind(product_id)
            .bind(query.unit_id)
            .bind(query.at)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Price history".to_string()))?
            .try_into()?;
        let prices = latest.new_prices();

        Ok(PointInTimePrices {
            product_id,
            unit_id: query.unit_id,
            at: query.at,
            prices,
        })
    }
}
