//! Payroll service: slips with allowance/deduction breakdowns

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use crate::error::{reference_error, AppError, AppResult};
use crate::models::{PayrollSlip, SalaryBreakdown, LOAN_INSTALLMENT};
use crate::services::loan::open_installments;
use shared::DateRange;

/// Payroll service
#[derive(Clone)]
pub struct PayrollService {
    db: PgPool,
}

/// Input for generating a payroll slip
#[derive(Debug, Deserialize)]
pub struct GeneratePayrollInput {
    pub employee_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub basic_salary: Decimal,
    #[serde(default)]
    pub allowances: SalaryBreakdown,
    #[serde(default)]
    pub deductions: SalaryBreakdown,
}

/// Payroll list filter
#[derive(Debug, Default, Deserialize)]
pub struct PayrollFilter {
    pub employee_id: Option<Uuid>,
}

/// A stored payroll slip
#[derive(Debug, Clone, Serialize)]
pub struct Payroll {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub period: DateRange,
    #[serde(flatten)]
    pub slip: PayrollSlip,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PayrollRow {
    id: Uuid,
    employee_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    basic_salary: Decimal,
    allowances: Json<SalaryBreakdown>,
    deductions: Json<SalaryBreakdown>,
    total_allowances: Decimal,
    total_deductions: Decimal,
    gross_salary: Decimal,
    net_salary: Decimal,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<PayrollRow> for Payroll {
    fn from(row: PayrollRow) -> Self {
        Payroll {
            id: row.id,
            employee_id: row.employee_id,
            period: DateRange {
                start: row.period_start,
                end: row.period_end,
            },
            slip: PayrollSlip {
                basic_salary: row.basic_salary,
                allowances: row.allowances.0,
                deductions: row.deductions.0,
                total_allowances: row.total_allowances,
                total_deductions: row.total_deductions,
                gross_salary: row.gross_salary,
                net_salary: row.net_salary,
            },
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

const PAYROLL_COLUMNS: &str = "id, employee_id, period_start, period_end, basic_salary, allowances, \
     deductions, total_allowances, total_deductions, gross_salary, net_salary, created_by, created_at";

impl PayrollService {
    /// Create a new PayrollService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Compute and store a slip. Open installments of the employee's active
    /// loans falling due inside the period are deducted as `loan_installment`.
    pub async fn generate_payroll(&self, user_id: Uuid, input: GeneratePayrollInput) -> AppResult<Payroll> {
        if input.period_end < input.period_start {
            return Err(AppError::validation(
                "period_end",
                "Period end must not be before period start",
            ));
        }
        let period = DateRange {
            start: input.period_start,
            end: input.period_end,
        };

        let mut tx = self.db.begin().await?;

        let installments: Decimal = open_installments(&mut *tx, input.employee_id, period.end)
            .await?
            .iter()
            .filter(|p| period.contains(p.due_date))
            .map(|p| p.payment_amount)
            .sum();

        let mut deductions = input.deductions;
        if installments > Decimal::ZERO {
            deductions.add(LOAN_INSTALLMENT, installments);
        }
        let slip = PayrollSlip::compute(input.basic_salary, input.allowances, deductions)?;

        let payroll = Payroll {
            id: Uuid::new_v4(),
            employee_id: input.employee_id,
            period,
            slip,
            created_by: user_id,
            created_at: Utc::now(),
        };

        let sql = format!(
            "INSERT INTO payrolls ({PAYROLL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&sql)
            .bind(payroll.id)
            .bind(payroll.employee_id)
            .bind(payroll.period.start)
            .bind(payroll.period.end)
            .bind(payroll.slip.basic_salary)
            .bind(Json(&payroll.slip.allowances))
            .bind(Json(&payroll.slip.deductions))
            .bind(payroll.slip.total_allowances)
            .bind(payroll.slip.total_deductions)
            .bind(payroll.slip.gross_salary)
            .bind(payroll.slip.net_salary)
            .bind(payroll.created_by)
            .bind(payroll.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                    AppError::Conflict {
                        resource: "payroll".to_string(),
                        message: "A payroll already exists for this employee and period".to_string(),
                    }
                } else {
                    reference_error(e, "Employee")
                }
            })?;

        tx.commit().await?;

        tracing::info!(
            payroll_id = %payroll.id,
            employee_id = %payroll.employee_id,
            loan_installments = %installments,
            net = %payroll.slip.net_salary,
            "payroll generated"
        );

        Ok(payroll)
    }

    /// Get a payroll slip by ID
    pub async fn get_payroll(&self, payroll_id: Uuid) -> AppResult<Payroll> {
        let sql = format!("SELECT {PAYROLL_COLUMNS} FROM payrolls WHERE id = $1");
        sqlx::query_as::<_, PayrollRow>(&sql)
            .bind(payroll_id)
            .fetch_optional(&self.db)
            .await?
            .map(Payroll::from)
            .ok_or_else(|| AppError::NotFound("Payroll".to_string()))
    }

    /// List payroll slips, latest period first
    pub async fn list_payrolls(&self, filter: PayrollFilter) -> AppResult<Vec<Payroll>> {
        let sql = format!(
            "SELECT {PAYROLL_COLUMNS} FROM payrolls \
             WHERE ($1::uuid IS NULL OR employee_id = $1) \
             ORDER BY period_start DESC, employee_id"
        );
        let rows = sqlx::query_as::<_, PayrollRow>(&sql)
            .bind(filter.employee_id)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.into_iter().map(Payroll::from).collect())
    }
}
