//! Employee loans: amortization, payment application and the loan lifecycle

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{DomainError, DomainResult};
use crate::types::{add_months, round_money};
use crate::validation::{exceeds_scale, MAX_INSTALLMENTS, PRICE_SCALE};

/// Loan lifecycle.
///
/// pending → approved → active → completed, with pending/approved →
/// cancelled and active → defaulted. Nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Active,
    Completed,
    Defaulted,
    Cancelled,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LoanStatus::Pending),
            "approved" => Some(LoanStatus::Approved),
            "active" => Some(LoanStatus::Active),
            "completed" => Some(LoanStatus::Completed),
            "defaulted" => Some(LoanStatus::Defaulted),
            "cancelled" => Some(LoanStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed | LoanStatus::Defaulted | LoanStatus::Cancelled
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    PartiallyPaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::PartiallyPaid => "partially_paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "overdue" => Some(PaymentStatus::Overdue),
            "partially_paid" => Some(PaymentStatus::PartiallyPaid),
            _ => None,
        }
    }
}

/// Person vouching for a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Guarantor {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 5, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 60))]
    pub relationship: String,
}

/// Terms requested for a new loan
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoanTerms {
    pub employee_id: Uuid,
    pub loan_amount: Decimal,
    /// Annual percentage, applied monthly
    pub interest_rate: Decimal,
    pub installments_count: i32,
    pub start_date: NaiveDate,
    #[serde(default)]
    #[validate]
    pub guarantors: Vec<Guarantor>,
    pub notes: Option<String>,
}

/// An employee loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeLoan {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub loan_amount: Decimal,
    pub interest_rate: Decimal,
    pub installments_count: i32,
    pub monthly_payment: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LoanStatus,
    pub total_paid: Decimal,
    pub remaining_balance: Decimal,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub guarantors: Vec<Guarantor>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One line of an amortization schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub payment_number: i32,
    pub payment_date: NaiveDate,
    pub payment_amount: Decimal,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub remaining_balance: Decimal,
}

/// One installment of a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeLoanPayment {
    pub id: Uuid,
    pub employee_loan_id: Uuid,
    pub payment_number: i32,
    pub payment_amount: Decimal,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub due_date: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    pub status: PaymentStatus,
    pub processed_by: Option<Uuid>,
    pub notes: Option<String>,
}

fn monthly_rate(annual_rate: Decimal) -> Decimal {
    annual_rate / Decimal::ONE_HUNDRED / Decimal::from(12)
}

fn check_terms(principal: Decimal, annual_rate: Decimal, installments: i32) -> DomainResult<()> {
    if installments <= 0 {
        return Err(DomainError::ZeroInstallments);
    }
    if installments > MAX_INSTALLMENTS {
        return Err(DomainError::validation(
            "installments_count",
            "Installments count exceeds the maximum loan term",
        ));
    }
    if principal <= Decimal::ZERO {
        return Err(DomainError::validation(
            "loan_amount",
            "Loan amount must be positive",
        ));
    }
    if annual_rate < Decimal::ZERO {
        return Err(DomainError::validation(
            "interest_rate",
            "Interest rate cannot be negative",
        ));
    }
    Ok(())
}

/// Equated monthly installment, rounded to cents.
///
/// EMI = P·r·(1+r)^N / ((1+r)^N − 1) with r the monthly rate, or P/N when
/// the rate is zero.
pub fn calculate_monthly_payment(
    principal: Decimal,
    annual_rate: Decimal,
    installments: i32,
) -> DomainResult<Decimal> {
    check_terms(principal, annual_rate, installments)?;

    let n = Decimal::from(installments);
    let r = monthly_rate(annual_rate);
    if r.is_zero() {
        return Ok(round_money(principal / n));
    }

    let overflow = || DomainError::validation("installments_count", "Loan term is too long");
    let factor = (Decimal::ONE + r)
        .checked_powu(installments as u64)
        .ok_or_else(overflow)?;
    let denominator = factor - Decimal::ONE;
    if denominator.is_zero() {
        return Ok(round_money(principal / n));
    }

    let emi = principal
        .checked_mul(r)
        .and_then(|v| v.checked_mul(factor))
        .and_then(|v| v.checked_div(denominator))
        .ok_or_else(overflow)?;
    Ok(round_money(emi))
}

/// Amortization schedule, one row per month starting at `start_date`.
///
/// Interest accrues on the remaining balance each month. Principal is the
/// installment less interest, capped at what is still owed; the schedule
/// stops once nothing is owed. Cent rounding residue is settled in the final
/// row so principals always sum to the loan amount.
pub fn create_payment_schedule(
    principal: Decimal,
    annual_rate: Decimal,
    installments: i32,
    start_date: NaiveDate,
) -> DomainResult<Vec<ScheduleRow>> {
    let emi = calculate_monthly_payment(principal, annual_rate, installments)?;
    let r = monthly_rate(annual_rate);

    let mut remaining = principal;
    let mut rows = Vec::with_capacity(installments.min(MAX_INSTALLMENTS) as usize);

    for number in 1..=installments {
        if remaining <= Decimal::ZERO {
            break;
        }

        let interest = round_money(remaining * r);
        let mut principal_part = (emi - interest).min(remaining);
        if number == installments {
            principal_part = remaining;
        }
        remaining -= principal_part;

        let payment_date = add_months(start_date, (number - 1) as u32).ok_or_else(|| {
            DomainError::validation("start_date", "Schedule runs past the supported date range")
        })?;

        rows.push(ScheduleRow {
            payment_number: number,
            payment_date,
            payment_amount: round_money(principal_part + interest),
            principal_amount: round_money(principal_part),
            interest_amount: interest,
            remaining_balance: round_money(remaining),
        });
    }

    Ok(rows)
}

impl EmployeeLoan {
    /// A new pending loan with its installment and end date computed
    pub fn new_pending(terms: LoanTerms, created_by: Uuid, at: DateTime<Utc>) -> DomainResult<Self> {
        let monthly_payment = calculate_monthly_payment(
            terms.loan_amount,
            terms.interest_rate,
            terms.installments_count,
        )?;
        let end_date = add_months(terms.start_date, (terms.installments_count - 1) as u32)
            .ok_or_else(|| DomainError::validation("start_date", "End date out of range"))?;

        Ok(Self {
            id: Uuid::new_v4(),
            employee_id: terms.employee_id,
            loan_amount: terms.loan_amount,
            interest_rate: terms.interest_rate,
            installments_count: terms.installments_count,
            monthly_payment,
            start_date: terms.start_date,
            end_date,
            status: LoanStatus::Pending,
            total_paid: Decimal::ZERO,
            remaining_balance: terms.loan_amount,
            approved_by: None,
            approved_at: None,
            cancellation_reason: None,
            guarantors: terms.guarantors,
            notes: terms.notes,
            created_by,
            created_at: at,
        })
    }

    pub fn approve(&mut self, approver: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != LoanStatus::Pending {
            return Err(DomainError::transition("loan", self.status, "approve"));
        }
        self.status = LoanStatus::Approved;
        self.approved_by = Some(approver);
        self.approved_at = Some(at);
        Ok(())
    }

    pub fn activate(&mut self) -> DomainResult<()> {
        if self.status != LoanStatus::Approved {
            return Err(DomainError::transition("loan", self.status, "activate"));
        }
        self.status = LoanStatus::Active;
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str) -> DomainResult<()> {
        if !matches!(self.status, LoanStatus::Pending | LoanStatus::Approved) {
            return Err(DomainError::transition("loan", self.status, "cancel"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation(
                "reason",
                "A cancellation reason is required",
            ));
        }
        self.status = LoanStatus::Cancelled;
        self.cancellation_reason = Some(reason.to_string());
        Ok(())
    }

    /// Manual write-off; never triggered automatically
    pub fn mark_defaulted(&mut self) -> DomainResult<()> {
        if self.status != LoanStatus::Active {
            return Err(DomainError::transition("loan", self.status, "default"));
        }
        self.status = LoanStatus::Defaulted;
        Ok(())
    }

    /// Credit `amount` and recompute the balance, completing the loan at zero.
    ///
    /// A completed loan still accepts credits so its remaining schedule rows
    /// can be settled.
    pub fn apply_payment(&mut self, amount: Decimal) -> DomainResult<()> {
        if !matches!(self.status, LoanStatus::Active | LoanStatus::Completed) {
            return Err(DomainError::transition("loan", self.status, "accept payments for"));
        }
        self.total_paid += amount;
        self.remaining_balance = self.loan_amount - self.total_paid;
        if self.remaining_balance <= Decimal::ZERO {
            self.status = LoanStatus::Completed;
        }
        Ok(())
    }

    pub fn payment_schedule(&self) -> DomainResult<Vec<ScheduleRow>> {
        create_payment_schedule(
            self.loan_amount,
            self.interest_rate,
            self.installments_count,
            self.start_date,
        )
    }

    /// Installment rows created when the loan is activated
    pub fn build_payments(&self) -> DomainResult<Vec<EmployeeLoanPayment>> {
        Ok(self
            .payment_schedule()?
            .into_iter()
            .map(|row| EmployeeLoanPayment {
                id: Uuid::new_v4(),
                employee_loan_id: self.id,
                payment_number: row.payment_number,
                payment_amount: row.payment_amount,
                principal_amount: row.principal_amount,
                interest_amount: row.interest_amount,
                due_date: row.payment_date,
                payment_date: None,
                status: PaymentStatus::Pending,
                processed_by: None,
                notes: None,
            })
            .collect())
    }
}

impl EmployeeLoanPayment {
    pub fn is_outstanding(&self) -> bool {
        self.status != PaymentStatus::Paid
    }

    fn check_payable(&self, loan: &EmployeeLoan) -> DomainResult<()> {
        if loan.id != self.employee_loan_id {
            return Err(DomainError::validation(
                "employee_loan_id",
                "Payment does not belong to this loan",
            ));
        }
        if self.status == PaymentStatus::Paid {
            return Err(DomainError::PaymentAlreadySettled);
        }
        Ok(())
    }

    /// Settle the installment and credit its full amount to the loan.
    ///
    /// Returns the amount credited.
    pub fn mark_as_paid(
        &mut self,
        loan: &mut EmployeeLoan,
        processor: Uuid,
        paid_on: NaiveDate,
    ) -> DomainResult<Decimal> {
        self.check_payable(loan)?;
        loan.apply_payment(self.payment_amount)?;

        self.status = PaymentStatus::Paid;
        self.payment_date = Some(paid_on);
        self.processed_by = Some(processor);
        Ok(self.payment_amount)
    }

    /// Pay part of the installment; interest is held fixed.
    ///
    /// An amount covering the whole installment settles it outright.
    /// Returns the amount credited to the loan.
    pub fn process_partial_payment(
        &mut self,
        loan: &mut EmployeeLoan,
        amount: Decimal,
        processor: Uuid,
        paid_on: NaiveDate,
    ) -> DomainResult<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount", "Amount must be positive"));
        }
        if exceeds_scale(amount, PRICE_SCALE) {
            return Err(DomainError::validation("amount", "Amount cannot have fractions of a cent"));
        }
        self.check_payable(loan)?;
        if amount >= self.payment_amount {
            return self.mark_as_paid(loan, processor, paid_on);
        }

        loan.apply_payment(amount)?;
        self.payment_amount -= amount;
        self.principal_amount = self.payment_amount - self.interest_amount;
        self.status = PaymentStatus::PartiallyPaid;
        self.payment_date = Some(paid_on);
        self.processed_by = Some(processor);
        Ok(amount)
    }

    /// Flag an unpaid installment whose due date has passed
    pub fn mark_overdue(&mut self, today: NaiveDate) -> bool {
        let open = matches!(
            self.status,
            PaymentStatus::Pending | PaymentStatus::PartiallyPaid
        );
        if open && self.due_date < today {
            self.status = PaymentStatus::Overdue;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn terms(amount: &str, rate: &str, n: i32) -> LoanTerms {
        LoanTerms {
            employee_id: Uuid::new_v4(),
            loan_amount: dec(amount),
            interest_rate: dec(rate),
            installments_count: n,
            start_date: date(2024, 1, 31),
            guarantors: vec![],
            notes: None,
        }
    }

    fn active_loan(amount: &str, rate: &str, n: i32) -> EmployeeLoan {
        let mut loan = EmployeeLoan::new_pending(terms(amount, rate, n), Uuid::new_v4(), Utc::now()).unwrap();
        loan.approve(Uuid::new_v4(), Utc::now()).unwrap();
        loan.activate().unwrap();
        loan
    }

    #[test]
    fn test_emi_zero_rate() {
        assert_eq!(calculate_monthly_payment(dec("1200"), Decimal::ZERO, 12).unwrap(), dec("100.00"));
    }

    #[test]
    fn test_emi_twelve_percent() {
        assert_eq!(calculate_monthly_payment(dec("1000"), dec("12"), 12).unwrap(), dec("88.85"));
    }

    #[test]
    fn test_emi_rejects_zero_installments() {
        assert_eq!(
            calculate_monthly_payment(dec("1000"), dec("12"), 0),
            Err(DomainError::ZeroInstallments)
        );
        assert_eq!(
            calculate_monthly_payment(dec("1000"), dec("12"), -3),
            Err(DomainError::ZeroInstallments)
        );
    }

    #[test]
    fn test_schedule_rejects_term_beyond_maximum() {
        let result = create_payment_schedule(dec("1200"), Decimal::ZERO, i32::MAX, date(2024, 1, 1));
        assert!(matches!(result, Err(DomainError::Validation { ref field, .. }) if field == "installments_count"));
        assert!(calculate_monthly_payment(dec("1200"), dec("12"), MAX_INSTALLMENTS + 1).is_err());

        let rows = create_payment_schedule(dec("3600"), Decimal::ZERO, MAX_INSTALLMENTS, date(2024, 1, 1)).unwrap();
        assert_eq!(rows.len(), MAX_INSTALLMENTS as usize);
    }

    #[test]
    fn test_schedule_zero_rate_sums_to_principal() {
        let rows = create_payment_schedule(dec("1200"), Decimal::ZERO, 12, date(2024, 1, 15)).unwrap();
        assert_eq!(rows.len(), 12);
        let total: Decimal = rows.iter().map(|r| r.principal_amount).sum();
        assert_eq!(total, dec("1200.00"));
        assert!(rows.iter().all(|r| r.interest_amount.is_zero()));
        assert_eq!(rows[11].remaining_balance, Decimal::ZERO);
    }

    #[test]
    fn test_schedule_twelve_percent_ends_at_zero() {
        let rows = create_payment_schedule(dec("1000"), dec("12"), 12, date(2024, 1, 15)).unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].interest_amount, dec("10.00"));
        assert_eq!(rows[0].principal_amount, dec("78.85"));
        assert_eq!(rows[11].remaining_balance, dec("0.00"));
        let principal: Decimal = rows.iter().map(|r| r.principal_amount).sum();
        assert_eq!(principal, dec("1000"));
    }

    #[test]
    fn test_schedule_folds_rounding_residue_into_last_row() {
        let rows = create_payment_schedule(dec("1000"), Decimal::ZERO, 3, date(2024, 1, 15)).unwrap();
        assert_eq!(rows[0].payment_amount, dec("333.33"));
        assert_eq!(rows[2].payment_amount, dec("333.34"));
    }

    #[test]
    fn test_schedule_dates_clamp_to_month_end() {
        let rows = create_payment_schedule(dec("300"), Decimal::ZERO, 3, date(2024, 1, 31)).unwrap();
        assert_eq!(rows[0].payment_date, date(2024, 1, 31));
        assert_eq!(rows[1].payment_date, date(2024, 2, 29));
        assert_eq!(rows[2].payment_date, date(2024, 3, 31));
    }

    #[test]
    fn test_new_pending_loan() {
        let loan = EmployeeLoan::new_pending(terms("1200", "0", 12), Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.monthly_payment, dec("100"));
        assert_eq!(loan.remaining_balance, dec("1200"));
        assert_eq!(loan.end_date, date(2024, 12, 31));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut loan = EmployeeLoan::new_pending(terms("500", "5", 6), Uuid::new_v4(), Utc::now()).unwrap();
        assert!(matches!(loan.activate(), Err(DomainError::InvalidStateTransition { .. })));

        let approver = Uuid::new_v4();
        loan.approve(approver, Utc::now()).unwrap();
        assert_eq!(loan.approved_by, Some(approver));
        assert!(loan.approve(approver, Utc::now()).is_err());

        loan.activate().unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert!(loan.cancel("changed my mind").is_err());
    }

    #[test]
    fn test_cancel_requires_reason() {
        let mut loan = EmployeeLoan::new_pending(terms("500", "5", 6), Uuid::new_v4(), Utc::now()).unwrap();
        assert!(loan.cancel("   ").is_err());
        loan.cancel("duplicate request").unwrap();
        assert_eq!(loan.status, LoanStatus::Cancelled);
        assert_eq!(loan.cancellation_reason.as_deref(), Some("duplicate request"));
        assert!(loan.approve(Uuid::new_v4(), Utc::now()).is_err());
    }

    #[test]
    fn test_mark_as_paid_credits_loan() {
        let mut loan = active_loan("1200", "0", 12);
        let mut payments = loan.build_payments().unwrap();
        let credited = payments[0].mark_as_paid(&mut loan, Uuid::new_v4(), date(2024, 1, 31)).unwrap();

        assert_eq!(credited, dec("100"));
        assert_eq!(loan.total_paid, dec("100"));
        assert_eq!(loan.remaining_balance, dec("1100"));
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert_eq!(
            payments[0].mark_as_paid(&mut loan, Uuid::new_v4(), date(2024, 1, 31)),
            Err(DomainError::PaymentAlreadySettled)
        );
    }

    #[test]
    fn test_paying_everything_completes_loan() {
        let mut loan = active_loan("1200", "0", 12);
        let mut payments = loan.build_payments().unwrap();
        for payment in payments.iter_mut() {
            payment.mark_as_paid(&mut loan, Uuid::new_v4(), date(2024, 6, 1)).unwrap();
        }
        assert_eq!(loan.remaining_balance, Decimal::ZERO);
        assert_eq!(loan.status, LoanStatus::Completed);
    }

    #[test]
    fn test_partial_payment() {
        let mut loan = active_loan("1000", "12", 12);
        let mut payments = loan.build_payments().unwrap();
        let first = &mut payments[0];
        let credited = first
            .process_partial_payment(&mut loan, dec("30"), Uuid::new_v4(), date(2024, 2, 1))
            .unwrap();

        assert_eq!(credited, dec("30"));
        assert_eq!(first.status, PaymentStatus::PartiallyPaid);
        assert_eq!(first.payment_amount, dec("58.85"));
        assert_eq!(first.principal_amount, dec("48.85"));
        assert_eq!(loan.total_paid, dec("30"));
        assert_eq!(loan.remaining_balance, dec("970"));
    }

    #[test]
    fn test_partial_payment_covering_installment_settles_it() {
        let mut loan = active_loan("1000", "12", 12);
        let mut payments = loan.build_payments().unwrap();
        let credited = payments[0]
            .process_partial_payment(&mut loan, dec("500"), Uuid::new_v4(), date(2024, 2, 1))
            .unwrap();
        assert_eq!(credited, dec("88.85"));
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert_eq!(loan.total_paid, dec("88.85"));
    }

    #[test]
    fn test_payments_rejected_before_activation() {
        let mut loan = EmployeeLoan::new_pending(terms("1200", "0", 12), Uuid::new_v4(), Utc::now()).unwrap();
        let mut payments = loan.build_payments().unwrap();
        let result = payments[0].mark_as_paid(&mut loan, Uuid::new_v4(), date(2024, 1, 31));
        assert!(matches!(result, Err(DomainError::InvalidStateTransition { .. })));
        assert_eq!(payments[0].status, PaymentStatus::Pending);
        assert_eq!(loan.total_paid, Decimal::ZERO);
    }

    #[test]
    fn test_mark_overdue() {
        let loan = active_loan("300", "0", 3);
        let mut payments = loan.build_payments().unwrap();
        assert!(payments[0].mark_overdue(date(2024, 2, 1)));
        assert_eq!(payments[0].status, PaymentStatus::Overdue);
        assert!(!payments[1].mark_overdue(date(2024, 2, 1)));
    }

    #[test]
    fn test_guarantor_validation() {
        let guarantor = Guarantor {
            name: String::new(),
            phone: "0812345678".to_string(),
            relationship: "sibling".to_string(),
        };
        assert!(guarantor.validate().is_err());
    }
}
