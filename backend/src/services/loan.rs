//! Employee loan service: loan lifecycle and installment payments

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{conflict_error, reference_error, AppError, AppResult};
use crate::models::{
    EmployeeLoan, EmployeeLoanPayment, Guarantor, LoanStatus, LoanTerms, PaymentStatus, ScheduleRow,
};
use shared::{
    create_payment_schedule, validate_installments_count, validate_interest_rate, validate_loan_amount,
    DomainResult,
};

/// Employee loan service
#[derive(Clone)]
pub struct LoanService {
    db: PgPool,
}

/// Loan list filter
#[derive(Debug, Default, Deserialize)]
pub struct LoanFilter {
    pub employee_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
}

/// Input for cancelling a loan
#[derive(Debug, Deserialize)]
pub struct CancelLoanInput {
    pub reason: String,
}

/// Input for settling an installment in full
#[derive(Debug, Default, Deserialize)]
pub struct MarkPaidInput {
    pub payment_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Input for paying part of an installment
#[derive(Debug, Deserialize)]
pub struct PartialPaymentInput {
    pub amount: Decimal,
    pub payment_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Loan together with its installment rows
#[derive(Debug, Clone, Serialize)]
pub struct LoanDetail {
    #[serde(flatten)]
    pub loan: EmployeeLoan,
    pub payments: Vec<EmployeeLoanPayment>,
}

/// Loan and installment after a payment
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub loan: EmployeeLoan,
    pub payment: EmployeeLoanPayment,
    pub amount_credited: Decimal,
}

/// Outcome of an overdue sweep
#[derive(Debug, Clone, Serialize)]
pub struct OverdueRefresh {
    pub as_of: NaiveDate,
    pub marked_overdue: usize,
}

const LOAN_COLUMNS: &str = "id, employee_id, loan_amount, interest_rate, installments_count, \
     monthly_payment, start_date, end_date, status, total_paid, remaining_balance, approved_by, \
     approved_at, cancellation_reason, guarantors, notes, created_by, created_at";

const PAYMENT_COLUMNS: &str = "id, employee_loan_id, payment_number, payment_amount, principal_amount, \
     interest_amount, due_date, payment_date, status, processed_by, notes";

/// Payment columns qualified with the `p` alias for joins
fn joined_payment_columns() -> String {
    PAYMENT_COLUMNS
        .split(", ")
        .map(|c| format!("p.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Row for loan queries
#[derive(Debug, FromRow)]
struct LoanRow {
    id: Uuid,
    employee_id: Uuid,
    loan_amount: Decimal,
    interest_rate: Decimal,
    installments_count: i32,
    monthly_payment: Decimal,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: String,
    total_paid: Decimal,
    remaining_balance: Decimal,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    guarantors: Json<Vec<Guarantor>>,
    notes: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for EmployeeLoan {
    type Error = AppError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        let status = LoanStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("unknown loan status '{}'", row.status)))?;
        Ok(EmployeeLoan {
            id: row.id,
            employee_id: row.employee_id,
            loan_amount: row.loan_amount,
            interest_rate: row.interest_rate,
            installments_count: row.installments_count,
            monthly_payment: row.monthly_payment,
            start_date: row.start_date,
            end_date: row.end_date,
            status,
            total_paid: row.total_paid,
            remaining_balance: row.remaining_balance,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            cancellation_reason: row.cancellation_reason,
            guarantors: row.guarantors.0,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

/// Row for installment queries
#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    employee_loan_id: Uuid,
    payment_number: i32,
    payment_amount: Decimal,
    principal_amount: Decimal,
    interest_amount: Decimal,
    due_date: NaiveDate,
    payment_date: Option<NaiveDate>,
    status: String,
    processed_by: Option<Uuid>,
    notes: Option<String>,
}

impl TryFrom<PaymentRow> for EmployeeLoanPayment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("unknown payment status '{}'", row.status)))?;
        Ok(EmployeeLoanPayment {
            id: row.id,
            employee_loan_id: row.employee_loan_id,
            payment_number: row.payment_number,
            payment_amount: row.payment_amount,
            principal_amount: row.principal_amount,
            interest_amount: row.interest_amount,
            due_date: row.due_date,
            payment_date: row.payment_date,
            status,
            processed_by: row.processed_by,
            notes: row.notes,
        })
    }
}

fn check_terms(terms: &LoanTerms) -> AppResult<()> {
    terms.validate()?;
    validate_loan_amount(terms.loan_amount).map_err(|msg| AppError::validation("loan_amount", msg))?;
    validate_interest_rate(terms.interest_rate).map_err(|msg| AppError::validation("interest_rate", msg))?;
    validate_installments_count(terms.installments_count)
        .map_err(|msg| AppError::validation("installments_count", msg))?;
    Ok(())
}

async fn lock_loan(conn: &mut PgConnection, loan_id: Uuid) -> AppResult<EmployeeLoan> {
    let sql = format!("SELECT {LOAN_COLUMNS} FROM employee_loans WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, LoanRow>(&sql)
        .bind(loan_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Loan".to_string()))?
        .try_into()
}

async fn lock_payment(conn: &mut PgConnection, loan_id: Uuid, payment_id: Uuid) -> AppResult<EmployeeLoanPayment> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM employee_loan_payments \
         WHERE id = $1 AND employee_loan_id = $2 FOR UPDATE"
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(payment_id)
        .bind(loan_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Loan payment".to_string()))?
        .try_into()
}

async fn save_loan(conn: &mut PgConnection, loan: &EmployeeLoan) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE employee_loans
        SET status = $1, total_paid = $2, remaining_balance = $3, approved_by = $4,
            approved_at = $5, cancellation_reason = $6, updated_at = NOW()
        WHERE id = $7
        "#,
    )
    .bind(loan.status.as_str())
    .bind(loan.total_paid)
    .bind(loan.remaining_balance)
    .bind(loan.approved_by)
    .bind(loan.approved_at)
    .bind(&loan.cancellation_reason)
    .bind(loan.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn save_payment(conn: &mut PgConnection, payment: &EmployeeLoanPayment) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE employee_loan_payments
        SET payment_amount = $1, principal_amount = $2, status = $3, payment_date = $4,
            processed_by = $5, notes = $6
        WHERE id = $7
        "#,
    )
    .bind(payment.payment_amount)
    .bind(payment.principal_amount)
    .bind(payment.status.as_str())
    .bind(payment.payment_date)
    .bind(payment.processed_by)
    .bind(&payment.notes)
    .bind(payment.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_payment(conn: &mut PgConnection, payment: &EmployeeLoanPayment) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO employee_loan_payments (
            id, employee_loan_id, payment_number, payment_amount, principal_amount,
            interest_amount, due_date, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(payment.id)
    .bind(payment.employee_loan_id)
    .bind(payment.payment_number)
    .bind(payment.payment_amount)
    .bind(payment.principal_amount)
    .bind(payment.interest_amount)
    .bind(payment.due_date)
    .bind(payment.status.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_error(e, "payment", "Installments already exist for this loan"))?;
    Ok(())
}

/// Unpaid installments of an employee's active loans due on or before `until`
pub(crate) async fn open_installments(
    conn: &mut PgConnection,
    employee_id: Uuid,
    until: NaiveDate,
) -> AppResult<Vec<EmployeeLoanPayment>> {
    let sql = format!(
        "SELECT {} FROM employee_loan_payments p \
         JOIN employee_loans l ON l.id = p.employee_loan_id \
         WHERE l.employee_id = $1 AND l.status = $2 AND p.status <> $3 AND p.due_date <= $4 \
         ORDER BY p.due_date, p.payment_number",
        joined_payment_columns()
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(employee_id)
        .bind(LoanStatus::Active.as_str())
        .bind(PaymentStatus::Paid.as_str())
        .bind(until)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(EmployeeLoanPayment::try_from)
        .collect()
}

impl LoanService {
    /// Create a new LoanService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Amortization schedule for proposed terms, without saving anything
    pub fn preview_schedule(terms: &LoanTerms) -> AppResult<Vec<ScheduleRow>> {
        check_terms(terms)?;
        Ok(create_payment_schedule(
            terms.loan_amount,
            terms.interest_rate,
            terms.installments_count,
            terms.start_date,
        )?)
    }

    /// Create a pending loan
    pub async fn create_loan(&self, user_id: Uuid, terms: LoanTerms) -> AppResult<EmployeeLoan> {
        check_terms(&terms)?;
        let loan = EmployeeLoan::new_pending(terms, user_id, Utc::now())?;

        let sql = format!(
            "INSERT INTO employee_loans ({LOAN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        );
        sqlx::query(&sql)
            .bind(loan.id)
            .bind(loan.employee_id)
            .bind(loan.loan_amount)
            .bind(loan.interest_rate)
            .bind(loan.installments_count)
            .bind(loan.monthly_payment)
            .bind(loan.start_date)
            .bind(loan.end_date)
            .bind(loan.status.as_str())
            .bind(loan.total_paid)
            .bind(loan.remaining_balance)
            .bind(loan.approved_by)
            .bind(loan.approved_at)
            .bind(&loan.cancellation_reason)
            .bind(Json(&loan.guarantors))
            .bind(&loan.notes)
            .bind(loan.created_by)
            .bind(loan.created_at)
            .execute(&self.db)
            .await
            .map_err(|e| reference_error(e, "Employee"))?;

        tracing::info!(
            loan_id = %loan.id,
            employee_id = %loan.employee_id,
            amount = %loan.loan_amount,
            monthly_payment = %loan.monthly_payment,
            "loan created"
        );

        Ok(loan)
    }

    /// Get a loan with its installments
    pub async fn get_loan(&self, loan_id: Uuid) -> AppResult<LoanDetail> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM employee_loans WHERE id = $1");
        let loan: EmployeeLoan = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(loan_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Loan".to_string()))?
            .try_into()?;
        let payments = self.list_payments(loan_id).await?;

        Ok(LoanDetail { loan, payments })
    }

    /// List loans, newest first
    pub async fn list_loans(&self, filter: LoanFilter) -> AppResult<Vec<EmployeeLoan>> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM employee_loans \
             WHERE ($1::uuid IS NULL OR employee_id = $1) \
             AND ($2::varchar IS NULL OR status = $2) \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, LoanRow>(&sql)
            .bind(filter.employee_id)
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(EmployeeLoan::try_from)
            .collect()
    }

    /// Installments of a loan in schedule order
    pub async fn list_payments(&self, loan_id: Uuid) -> AppResult<Vec<EmployeeLoanPayment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM employee_loan_payments \
             WHERE employee_loan_id = $1 ORDER BY payment_number"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(loan_id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(EmployeeLoanPayment::try_from)
            .collect()
    }

    async fn transition<F>(&self, loan_id: Uuid, action: &str, apply: F) -> AppResult<EmployeeLoan>
    where
        F: FnOnce(&mut EmployeeLoan) -> DomainResult<()>,
    {
        let mut tx = self.db.begin().await?;
        let mut loan = lock_loan(&mut *tx, loan_id).await?;
        let from = loan.status;
        apply(&mut loan)?;
        save_loan(&mut *tx, &loan).await?;
        tx.commit().await?;

        tracing::info!(%loan_id, action, from = from.as_str(), to = loan.status.as_str(), "loan status changed");
        Ok(loan)
    }

    /// Pending → Approved
    pub async fn approve_loan(&self, user_id: Uuid, loan_id: Uuid) -> AppResult<EmployeeLoan> {
        self.transition(loan_id, "approve", |loan| loan.approve(user_id, Utc::now()))
            .await
    }

    /// Approved → Active, creating the installment rows
    pub async fn activate_loan(&self, loan_id: Uuid) -> AppResult<LoanDetail> {
        let mut tx = self.db.begin().await?;
        let mut loan = lock_loan(&mut *tx, loan_id).await?;
        loan.activate()?;
        let payments = loan.build_payments()?;

        save_loan(&mut *tx, &loan).await?;
        for payment in &payments {
            insert_payment(&mut *tx, payment).await?;
        }
        tx.commit().await?;

        tracing::info!(%loan_id, installments = payments.len(), "loan activated");
        Ok(LoanDetail { loan, payments })
    }

    /// Pending or Approved → Cancelled
    pub async fn cancel_loan(&self, loan_id: Uuid, input: CancelLoanInput) -> AppResult<EmployeeLoan> {
        self.transition(loan_id, "cancel", |loan| loan.cancel(&input.reason))
            .await
    }

    /// Active → Defaulted
    pub async fn default_loan(&self, loan_id: Uuid) -> AppResult<EmployeeLoan> {
        self.transition(loan_id, "default", EmployeeLoan::mark_defaulted)
            .await
    }

    async fn pay<F>(
        &self,
        loan_id: Uuid,
        payment_id: Uuid,
        notes: Option<String>,
        apply: F,
    ) -> AppResult<PaymentResult>
    where
        F: FnOnce(&mut EmployeeLoanPayment, &mut EmployeeLoan) -> DomainResult<Decimal>,
    {
        let mut tx = self.db.begin().await?;
        let mut loan = lock_loan(&mut *tx, loan_id).await?;
        let mut payment = lock_payment(&mut *tx, loan_id, payment_id).await?;

        let amount_credited = apply(&mut payment, &mut loan)?;
        if notes.is_some() {
            payment.notes = notes;
        }

        save_payment(&mut *tx, &payment).await?;
        save_loan(&mut *tx, &loan).await?;
        tx.commit().await?;

        tracing::info!(
            %loan_id,
            %payment_id,
            amount = %amount_credited,
            remaining = %loan.remaining_balance,
            status = payment.status.as_str(),
            "loan payment processed"
        );

        Ok(PaymentResult {
            loan,
            payment,
            amount_credited,
        })
    }

    /// Settle an installment in full
    pub async fn mark_payment_paid(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
        payment_id: Uuid,
        input: MarkPaidInput,
    ) -> AppResult<PaymentResult> {
        let paid_on = input.payment_date.unwrap_or_else(|| Utc::now().date_naive());
        self.pay(loan_id, payment_id, input.notes, |payment, loan| {
            payment.mark_as_paid(loan, user_id, paid_on)
        })
        .await
    }

    /// Pay part of an installment
    pub async fn process_partial_payment(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
        payment_id: Uuid,
        input: PartialPaymentInput,
    ) -> AppResult<PaymentResult> {
        let paid_on = input.payment_date.unwrap_or_else(|| Utc::now().date_naive());
        self.pay(loan_id, payment_id, input.notes, |payment, loan| {
            payment.process_partial_payment(loan, input.amount, user_id, paid_on)
        })
        .await
    }

    /// Flag open installments of active loans whose due date has passed
    pub async fn refresh_overdue(&self, as_of: Option<NaiveDate>) -> AppResult<OverdueRefresh> {
        let today = as_of.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;
        let sql = format!(
            "SELECT {} FROM employee_loan_payments p \
             JOIN employee_loans l ON l.id = p.employee_loan_id \
             WHERE l.status = $1 AND p.status IN ($2, $3) AND p.due_date < $4 \
             FOR UPDATE OF p",
            joined_payment_columns()
        );
        let candidates = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(LoanStatus::Active.as_str())
            .bind(PaymentStatus::Pending.as_str())
            .bind(PaymentStatus::PartiallyPaid.as_str())
            .bind(today)
            .fetch_all(&mut *tx)
            .await?;

        let mut marked = 0;
        for row in candidates {
            let mut payment = EmployeeLoanPayment::try_from(row)?;
            if payment.mark_overdue(today) {
                save_payment(&mut *tx, &payment).await?;
                marked += 1;
            }
        }
        tx.commit().await?;

        tracing::info!(as_of = %today, marked, "overdue installments refreshed");
        Ok(OverdueRefresh {
            as_of: today,
            marked_overdue: marked,
        })
    }
}
