//! HTTP handlers for employee loans

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::{EmployeeLoan, EmployeeLoanPayment, LoanTerms, ScheduleRow};
use crate::services::loan::{
    CancelLoanInput, LoanDetail, LoanFilter, LoanService, MarkPaidInput, OverdueRefresh,
    PartialPaymentInput, PaymentResult,
};
use crate::AppState;

/// Overdue sweep request
#[derive(Debug, Default, Deserialize)]
pub struct RefreshOverdueInput {
    pub as_of: Option<NaiveDate>,
}

/// Preview the amortization schedule for proposed terms
pub async fn preview_schedule(
    _current_user: CurrentUser,
    Json(terms): Json<LoanTerms>,
) -> AppResult<Json<Vec<ScheduleRow>>> {
    let schedule = LoanService::preview_schedule(&terms)?;
    Ok(Json(schedule))
}

/// Create a pending loan
pub async fn create_loan(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(terms): Json<LoanTerms>,
) -> AppResult<(StatusCode, Json<EmployeeLoan>)> {
    let service = LoanService::new(state.db);
    let loan = service.create_loan(current_user.0.user_id, terms).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// List loans
pub async fn list_loans(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(filter): Query<LoanFilter>,
) -> AppResult<Json<Vec<EmployeeLoan>>> {
    let service = LoanService::new(state.db);
    let loans = service.list_loans(filter).await?;
    Ok(Json(loans))
}

/// Get a loan with its installments
pub async fn get_loan(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanDetail>> {
    let service = LoanService::new(state.db);
    let loan = service.get_loan(loan_id).await?;
    Ok(Json(loan))
}

/// Approve a pending loan
pub async fn approve_loan(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<EmployeeLoan>> {
    let service = LoanService::new(state.db);
    let loan = service.approve_loan(current_user.0.user_id, loan_id).await?;
    Ok(Json(loan))
}

/// Activate an approved loan and create its installments
pub async fn activate_loan(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanDetail>> {
    let service = LoanService::new(state.db);
    let loan = service.activate_loan(loan_id).await?;
    Ok(Json(loan))
}

/// Cancel a loan that has not started
pub async fn cancel_loan(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(loan_id): Path<Uuid>,
    Json(input): Json<CancelLoanInput>,
) -> AppResult<Json<EmployeeLoan>> {
    let service = LoanService::new(state.db);
    let loan = service.cancel_loan(loan_id, input).await?;
    Ok(Json(loan))
}

/// Write off an active loan
pub async fn default_loan(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<EmployeeLoan>> {
    let service = LoanService::new(state.db);
    let loan = service.default_loan(loan_id).await?;
    Ok(Json(loan))
}

/// Installments of a loan
pub async fn list_loan_payments(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Vec<EmployeeLoanPayment>>> {
    let service = LoanService::new(state.db);
    let payments = service.list_payments(loan_id).await?;
    Ok(Json(payments))
}

/// Settle an installment in full
pub async fn mark_payment_paid(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((loan_id, payment_id)): Path<(Uuid, Uuid)>,
    input: Option<Json<MarkPaidInput>>,
) -> AppResult<Json<PaymentResult>> {
    let service = LoanService::new(state.db);
    let input = input.map(|Json(i)| i).unwrap_or_default();
    let result = service
        .mark_payment_paid(current_user.0.user_id, loan_id, payment_id, input)
        .await?;
    Ok(Json(result))
}

/// Pay part of an installment
pub async fn process_partial_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((loan_id, payment_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<PartialPaymentInput>,
) -> AppResult<Json<PaymentResult>> {
    let service = LoanService::new(state.db);
    let result = service
        .process_partial_payment(current_user.0.user_id, loan_id, payment_id, input)
        .await?;
    Ok(Json(result))
}

/// Flag installments past their due date
pub async fn refresh_overdue(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    input: Option<Json<RefreshOverdueInput>>,
) -> AppResult<Json<OverdueRefresh>> {
    let service = LoanService::new(state.db);
    let as_of = input.and_then(|Json(i)| i.as_of);
    let result = service.refresh_overdue(as_of).await?;
    Ok(Json(result))
}
