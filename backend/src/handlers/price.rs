//! HTTP handlers for product price history

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::price_history::{
    HistoryQuery, PointInTimePrices, PriceAtQuery, PriceHistoryService, PriceHistoryView,
    RecordPriceChangeInput, UpdatePricesInput,
};
use crate::AppState;

/// Record a price change made elsewhere
pub async fn record_price_change(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RecordPriceChangeInput>,
) -> AppResult<(StatusCode, Json<PriceHistoryView>)> {
    let service = PriceHistoryService::new(state.db);
    let entry = service
        .record_price_change(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Update a product's prices
pub async fn update_product_prices(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(product_id): Path<Uuid>,
    Json(input): Json<UpdatePricesInput>,
) -> AppResult<Json<PriceHistoryView>> {
    let service = PriceHistoryService::new(state.db);
    let entry = service
        .update_product_prices(current_user.0.user_id, product_id, input)
        .await?;
    Ok(Json(entry))
}

/// Price history of a product
pub async fn list_price_history(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(product_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<PriceHistoryView>>> {
    let service = PriceHistoryService::new(state.db);
    let history = service.list_history(product_id, query).await?;
    Ok(Json(history))
}

/// Prices in effect at a point in time
pub async fn get_price_at(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(product_id): Path<Uuid>,
    Query(query): Query<PriceAtQuery>,
) -> AppResult<Json<PointInTimePrices>> {
    let service = PriceHistoryService::new(state.db);
    let prices = service.price_at(product_id, query).await?;
    Ok(Json(prices))
}
