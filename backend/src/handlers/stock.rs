//! HTTP handlers for stock ledger endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::{StockBalance, StockLocation, StockMovement};
use crate::services::stock::{
    AdjustStockInput, BalanceFilter, LedgerCheck, ReceiveStockInput, RecordMovementInput,
    StockChangeInput, StockChangeResult, StockLedgerService, TransferResult, TransferStockInput,
};
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

fn ledger(state: &AppState) -> StockLedgerService {
    StockLedgerService::new(state.db.clone(), state.config.ledger.policy())
}

/// Get (or open) the balance for a location
pub async fn open_balance(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(location): Json<StockLocation>,
) -> AppResult<Json<StockBalance>> {
    let balance = ledger(&state).get_or_create_balance(location).await?;
    Ok(Json(balance))
}

/// List balances
pub async fn list_balances(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(filter): Query<BalanceFilter>,
) -> AppResult<Json<Vec<StockBalance>>> {
    let balances = ledger(&state).list_balances(filter).await?;
    Ok(Json(balances))
}

/// Get a balance by ID
pub async fn get_balance(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
) -> AppResult<Json<StockBalance>> {
    let balance = ledger(&state).get_balance(balance_id).await?;
    Ok(Json(balance))
}

/// Receive stock at a location
pub async fn receive_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReceiveStockInput>,
) -> AppResult<(StatusCode, Json<StockChangeResult>)> {
    let result = ledger(&state)
        .receive_stock(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Add stock to a balance
pub async fn add_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
    Json(input): Json<StockChangeInput>,
) -> AppResult<Json<StockChangeResult>> {
    let result = ledger(&state)
        .add_stock(current_user.0.user_id, balance_id, input)
        .await?;
    Ok(Json(result))
}

/// Remove stock from a balance
pub async fn remove_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
    Json(input): Json<StockChangeInput>,
) -> AppResult<Json<StockChangeResult>> {
    let result = ledger(&state)
        .remove_stock(current_user.0.user_id, balance_id, input)
        .await?;
    Ok(Json(result))
}

/// Set a balance to a counted quantity
pub async fn adjust_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
    Json(input): Json<AdjustStockInput>,
) -> AppResult<Json<StockChangeResult>> {
    let result = ledger(&state)
        .adjust_stock(current_user.0.user_id, balance_id, input)
        .await?;
    Ok(Json(result))
}

/// Transfer stock to another warehouse/branch
pub async fn transfer_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
    Json(input): Json<TransferStockInput>,
) -> AppResult<Json<TransferResult>> {
    let result = ledger(&state)
        .transfer_stock(current_user.0.user_id, balance_id, input)
        .await?;
    Ok(Json(result))
}

/// Record a raw signed movement
pub async fn record_movement(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
    Json(input): Json<RecordMovementInput>,
) -> AppResult<(StatusCode, Json<StockChangeResult>)> {
    let result = ledger(&state)
        .record_movement(current_user.0.user_id, balance_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Movement log of a balance
pub async fn list_movements(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<StockMovement>>> {
    let page = ledger(&state).list_movements(balance_id, pagination).await?;
    Ok(Json(page))
}

/// Replay a balance's movements against its quantity
pub async fn verify_balance(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(balance_id): Path<Uuid>,
) -> AppResult<Json<LedgerCheck>> {
    let check = ledger(&state).verify_balance(balance_id).await?;
    Ok(Json(check))
}
