//! Purchase receiving: books a provider invoice into stock and prices

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{reference_error, AppError, AppResult};
use crate::models::{
    invoice_total, MovementContext, PriceChangeReason, PriceHistoryEntry, PurchaseInvoiceItem,
    SourceKind, SourceRef, StockLocation, StockMovement,
};
use crate::services::price_history::{change_prices_in_tx, lock_prices};
use crate::services::stock::add_stock_in_tx;
use shared::validate_source_reference;

/// Purchase receiving service
#[derive(Clone)]
pub struct PurchaseService {
    db: PgPool,
}

/// Input for receiving an invoice
#[derive(Debug, Deserialize)]
pub struct ReceiveInvoiceInput {
    /// Generated when absent; reusing an id is a conflict
    pub invoice_id: Option<Uuid>,
    pub provider_id: Uuid,
    pub reference: String,
    pub warehouse_id: Uuid,
    pub branch_id: Uuid,
    pub items: Vec<PurchaseInvoiceItem>,
    pub notes: Option<String>,
}

/// What receiving an invoice did
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedInvoice {
    pub invoice_id: Uuid,
    pub provider_id: Uuid,
    pub reference: String,
    pub total_amount: Decimal,
    pub movements: Vec<StockMovement>,
    pub price_changes: Vec<PriceHistoryEntry>,
}

impl PurchaseService {
    /// Create a new PurchaseService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Receive an invoice: stock in every line and reprice changed non-bonus lines,
    /// all in one transaction
    pub async fn receive_invoice(&self, user_id: Uuid, input: ReceiveInvoiceInput) -> AppResult<ReceivedInvoice> {
        let reference = input.reference.trim().to_string();
        validate_source_reference(&reference).map_err(|msg| AppError::validation("reference", msg))?;
        if input.items.is_empty() {
            return Err(AppError::validation("items", "Invoice has no items"));
        }
        for (i, item) in input.items.iter().enumerate() {
            item.validate().map_err(|e| match AppError::from(e) {
                AppError::Validation { field, message } => AppError::Validation {
                    field: format!("items[{i}].{field}"),
                    message,
                },
                other => other,
            })?;
        }

        let invoice_id = input.invoice_id.unwrap_or_else(Uuid::new_v4);
        let total_amount = invoice_total(&input.items);
        let now = Utc::now();

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO purchase_invoices (
                id, provider_id, reference, warehouse_id, branch_id, total_amount,
                received_by, received_at, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(invoice_id)
        .bind(input.provider_id)
        .bind(&reference)
        .bind(input.warehouse_id)
        .bind(input.branch_id)
        .bind(total_amount)
        .bind(user_id)
        .bind(now)
        .bind(&input.notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                AppError::Conflict {
                    resource: "purchase_invoice".to_string(),
                    message: format!("Invoice {invoice_id} was already received"),
                }
            } else {
                reference_error(e, "Provider, warehouse or branch")
            }
        })?;

        let source = SourceRef::with_reference(SourceKind::Provider(input.provider_id), reference.clone());
        let ctx = MovementContext::new(user_id, now)
            .with_source(source.clone())
            .with_notes(input.notes.clone());

        let mut movements = Vec::with_capacity(input.items.len());
        let mut price_changes = Vec::new();

        for item in &input.items {
            let location = StockLocation {
                product_id: item.product_id,
                warehouse_id: input.warehouse_id,
                branch_id: input.branch_id,
                unit_id: item.unit_id,
            };
            let stocked = add_stock_in_tx(&mut *tx, &location, item.quantity, &ctx).await?;
            movements.push(stocked.movement);

            let current = lock_prices(&mut *tx, item.product_id, item.unit_id).await?;
            if let Some(new) = item.price_update(current) {
                let entry = change_prices_in_tx(
                    &mut *tx,
                    item.product_id,
                    item.unit_id,
                    current,
                    new,
                    PriceChangeReason::InvoiceUpdate,
                    user_id,
                    Some(source.clone()),
                    None,
                )
                .await?;
                price_changes.push(entry);
            }
        }

        tx.commit().await?;

        tracing::info!(
            %invoice_id,
            provider_id = %input.provider_id,
            lines = movements.len(),
            repriced = price_changes.len(),
            total = %total_amount,
            "purchase invoice received"
        );

        Ok(ReceivedInvoice {
            invoice_id,
            provider_id: input.provider_id,
            reference,
            total_amount,
            movements,
            price_changes,
        })
    }
}
