//! HTTP handlers for payroll

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::payroll::{GeneratePayrollInput, Payroll, PayrollFilter, PayrollService};
use crate::AppState;

/// Generate a payroll slip for one employee and period
pub async fn generate_payroll(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<GeneratePayrollInput>,
) -> AppResult<(StatusCode, Json<Payroll>)> {
    let service = PayrollService::new(state.db);
    let payroll = service
        .generate_payroll(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(payroll)))
}

/// List payroll slips
pub async fn list_payrolls(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(filter): Query<PayrollFilter>,
) -> AppResult<Json<Vec<Payroll>>> {
    let service = PayrollService::new(state.db);
    let payrolls = service.list_payrolls(filter).await?;
    Ok(Json(payrolls))
}

/// Get a payroll slip by ID
pub async fn get_payroll(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(payroll_id): Path<Uuid>,
) -> AppResult<Json<Payroll>> {
    let service = PayrollService::new(state.db);
    let payroll = service.get_payroll(payroll_id).await?;
    Ok(Json(payroll))
}
