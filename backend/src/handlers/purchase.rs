//! HTTP handlers for purchase receiving

use axum::{extract::State, http::StatusCode, Json};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::purchase::{PurchaseService, ReceiveInvoiceInput, ReceivedInvoice};
use crate::AppState;

/// Receive a provider invoice into stock
pub async fn receive_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReceiveInvoiceInput>,
) -> AppResult<(StatusCode, Json<ReceivedInvoice>)> {
    let service = PurchaseService::new(state.db);
    let invoice = service
        .receive_invoice(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}
