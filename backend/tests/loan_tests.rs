//! Employee loan tests
//!
//! Tests for loan amortization and payments including:
//! - Property 4: Zero-interest schedules split the principal evenly
//! - Property 5: Interest-bearing schedules end at a zero balance
//! - Property 6: Settling installments credits the loan and completes it
//! - Property 7: Partial payments reduce the installment and credit the loan

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    calculate_monthly_payment, create_payment_schedule, validate_installments_count,
    validate_interest_rate, validate_loan_amount, DomainError, EmployeeLoan, Guarantor, LoanStatus,
    LoanTerms, PaymentStatus,
};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn terms(amount: Decimal, rate: Decimal, n: i32) -> LoanTerms {
    LoanTerms {
        employee_id: Uuid::new_v4(),
        loan_amount: amount,
        interest_rate: rate,
        installments_count: n,
        start_date: date(2024, 3, 1),
        guarantors: vec![],
        notes: None,
    }
}

fn active_loan(amount: Decimal, rate: Decimal, n: i32) -> EmployeeLoan {
    let mut loan = EmployeeLoan::new_pending(terms(amount, rate, n), Uuid::new_v4(), Utc::now()).unwrap();
    loan.approve(Uuid::new_v4(), Utc::now()).unwrap();
    loan.activate().unwrap();
    loan
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Property 4: 1200 at 0% over 12 months
    #[test]
    fn test_zero_interest_schedule() {
        assert_eq!(calculate_monthly_payment(dec("1200"), Decimal::ZERO, 12).unwrap(), dec("100.00"));

        let rows = create_payment_schedule(dec("1200"), Decimal::ZERO, 12, date(2024, 3, 1)).unwrap();
        let principal: Decimal = rows.iter().map(|r| r.principal_amount).sum();
        assert_eq!(principal, dec("1200.00"));
        assert!(rows.iter().all(|r| r.payment_amount == dec("100.00")));
    }

    /// Property 5: 1000 at 12% over 12 months
    #[test]
    fn test_twelve_percent_schedule() {
        assert_eq!(calculate_monthly_payment(dec("1000"), dec("12"), 12).unwrap(), dec("88.85"));

        let rows = create_payment_schedule(dec("1000"), dec("12"), 12, date(2024, 3, 1)).unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows.last().unwrap().remaining_balance, dec("0.00"));
        assert_eq!(rows[1].interest_amount, dec("9.21"));
        assert_eq!(rows[0].payment_date, date(2024, 3, 1));
        assert_eq!(rows[11].payment_date, date(2025, 2, 1));
    }

    #[test]
    fn test_single_installment() {
        let rows = create_payment_schedule(dec("250.50"), dec("6"), 1, date(2024, 3, 1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].principal_amount, dec("250.50"));
        assert_eq!(rows[0].remaining_balance, Decimal::ZERO);
    }

    #[test]
    fn test_schedule_rejects_zero_installments() {
        assert_eq!(
            create_payment_schedule(dec("1000"), dec("12"), 0, date(2024, 3, 1)),
            Err(DomainError::ZeroInstallments)
        );
        assert!(EmployeeLoan::new_pending(terms(dec("1000"), dec("12"), 0), Uuid::new_v4(), Utc::now()).is_err());
    }

    #[test]
    fn test_term_validation() {
        assert!(validate_loan_amount(dec("1000.00")).is_ok());
        assert!(validate_loan_amount(Decimal::ZERO).is_err());
        assert!(validate_loan_amount(dec("10.001")).is_err());
        assert!(validate_interest_rate(dec("0")).is_ok());
        assert!(validate_interest_rate(dec("-1")).is_err());
        assert!(validate_interest_rate(dec("101")).is_err());
        assert!(validate_installments_count(12).is_ok());
        assert!(validate_installments_count(0).is_err());
        assert!(validate_installments_count(361).is_err());
    }

    #[test]
    fn test_guarantors_are_validated() {
        let mut t = terms(dec("1000"), dec("5"), 10);
        t.guarantors.push(Guarantor {
            name: "Somchai".to_string(),
            phone: "12".to_string(),
            relationship: "brother".to_string(),
        });
        assert!(t.validate().is_err());

        t.guarantors[0].phone = "0891234567".to_string();
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_status_names() {
        for status in [
            LoanStatus::Pending,
            LoanStatus::Approved,
            LoanStatus::Active,
            LoanStatus::Completed,
            LoanStatus::Defaulted,
            LoanStatus::Cancelled,
        ] {
            assert_eq!(LoanStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("partially_paid"), Some(PaymentStatus::PartiallyPaid));
        assert_eq!(PaymentStatus::parse("late"), None);
    }

    /// Only an active loan can be written off, and nothing leaves a terminal state
    #[test]
    fn test_default_transitions() {
        let mut pending = EmployeeLoan::new_pending(terms(dec("600"), dec("0"), 6), Uuid::new_v4(), Utc::now()).unwrap();
        assert!(matches!(
            pending.mark_defaulted(),
            Err(DomainError::InvalidStateTransition { .. })
        ));

        let mut loan = active_loan(dec("600"), dec("0"), 6);
        loan.mark_defaulted().unwrap();
        assert_eq!(loan.status, LoanStatus::Defaulted);
        assert!(loan.status.is_terminal());
        assert!(loan.activate().is_err());
        assert!(loan.cancel("too late").is_err());
        assert!(loan.apply_payment(dec("100")).is_err());
    }

    /// The error names the loan, its status and the refused action
    #[test]
    fn test_transition_error_message() {
        let mut loan = active_loan(dec("600"), dec("0"), 6);
        let err = loan.approve(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot approve loan in status active");
    }

    /// Property 6: settling every installment completes the loan
    #[test]
    fn test_settling_all_installments_completes_loan() {
        let mut loan = active_loan(dec("1000"), dec("12"), 12);
        let mut payments = loan.build_payments().unwrap();
        let processor = Uuid::new_v4();

        for payment in payments.iter_mut() {
            payment.mark_as_paid(&mut loan, processor, date(2024, 4, 1)).unwrap();
            assert_eq!(payment.processed_by, Some(processor));
            assert_eq!(payment.payment_date, Some(date(2024, 4, 1)));
        }

        let scheduled: Decimal = payments.iter().map(|p| p.payment_amount).sum();
        assert_eq!(loan.total_paid, scheduled);
        assert_eq!(loan.status, LoanStatus::Completed);
        assert!(loan.remaining_balance <= Decimal::ZERO);
    }

    /// Rows still open after the balance reaches zero can be settled
    #[test]
    fn test_completed_loan_accepts_remaining_rows() {
        let mut loan = active_loan(dec("300"), dec("0"), 3);
        let mut payments = loan.build_payments().unwrap();

        payments[0]
            .process_partial_payment(&mut loan, dec("99"), Uuid::new_v4(), date(2024, 3, 1))
            .unwrap();
        loan.apply_payment(dec("201")).unwrap();
        assert_eq!(loan.status, LoanStatus::Completed);

        payments[1].mark_as_paid(&mut loan, Uuid::new_v4(), date(2024, 4, 1)).unwrap();
        assert_eq!(payments[1].status, PaymentStatus::Paid);
        assert_eq!(loan.status, LoanStatus::Completed);
    }

    /// Property 7: partial payment on an installment
    #[test]
    fn test_partial_payment_reduces_installment() {
        let mut loan = active_loan(dec("1000"), dec("12"), 12);
        let mut payments = loan.build_payments().unwrap();
        let interest = payments[0].interest_amount;

        payments[0]
            .process_partial_payment(&mut loan, dec("30"), Uuid::new_v4(), date(2024, 3, 5))
            .unwrap();

        assert_eq!(payments[0].status, PaymentStatus::PartiallyPaid);
        assert_eq!(payments[0].payment_amount, dec("58.85"));
        assert_eq!(payments[0].interest_amount, interest);
        assert_eq!(payments[0].principal_amount, dec("58.85") - interest);
        assert_eq!(loan.total_paid, dec("30"));

        // A second partial payment finishing the row settles it
        payments[0]
            .process_partial_payment(&mut loan, dec("58.85"), Uuid::new_v4(), date(2024, 3, 20))
            .unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert_eq!(loan.total_paid, dec("88.85"));
    }

    #[test]
    fn test_partial_payment_rejects_non_positive_amount() {
        let mut loan = active_loan(dec("1000"), dec("12"), 12);
        let mut payments = loan.build_payments().unwrap();
        let result = payments[0].process_partial_payment(&mut loan, Decimal::ZERO, Uuid::new_v4(), date(2024, 3, 5));

        assert!(matches!(result, Err(DomainError::Validation { .. })));
        assert_eq!(payments[0].status, PaymentStatus::Pending);
        assert_eq!(loan.total_paid, Decimal::ZERO);
    }

    #[test]
    fn test_partial_payment_rejects_sub_cent_amount() {
        let mut loan = active_loan(dec("1000"), dec("12"), 12);
        let mut payments = loan.build_payments().unwrap();
        let result = payments[0].process_partial_payment(&mut loan, dec("10.005"), Uuid::new_v4(), date(2024, 3, 5));

        assert!(matches!(result, Err(DomainError::Validation { ref field, .. }) if field == "amount"));
        assert_eq!(loan.total_paid, Decimal::ZERO);
    }

    /// Rates keep at most three decimal places so a stored loan rebuilds the same schedule
    #[test]
    fn test_interest_rate_scale_limit() {
        assert!(validate_interest_rate(dec("12.375")).is_ok());
        assert!(validate_interest_rate(dec("12.3456")).is_err());
    }

    /// Terms beyond the maximum are refused before any schedule is built
    #[test]
    fn test_oversized_term_rejected() {
        assert!(create_payment_schedule(dec("1200"), Decimal::ZERO, i32::MAX, date(2024, 1, 1)).is_err());
        assert!(calculate_monthly_payment(dec("1200"), Decimal::ZERO, i32::MAX).is_err());
        assert!(EmployeeLoan::new_pending(terms(dec("1200"), Decimal::ZERO, 361), Uuid::new_v4(), Utc::now()).is_err());
    }

    /// A payment row cannot be applied to another loan
    #[test]
    fn test_payment_must_belong_to_loan() {
        let mut loan = active_loan(dec("1000"), dec("12"), 12);
        let mut other = active_loan(dec("1000"), dec("12"), 12);
        let mut payments = loan.build_payments().unwrap();

        let result = payments[0].mark_as_paid(&mut other, Uuid::new_v4(), date(2024, 3, 5));

        assert!(result.is_err());
        assert_eq!(other.total_paid, Decimal::ZERO);
        assert_eq!(loan.total_paid, Decimal::ZERO);
    }

    /// Overdue rows are still payable
    #[test]
    fn test_overdue_installment_can_be_paid() {
        let mut loan = active_loan(dec("600"), dec("0"), 6);
        let mut payments = loan.build_payments().unwrap();

        assert!(payments[0].mark_overdue(date(2024, 5, 1)));
        assert!(payments[1].mark_overdue(date(2024, 5, 1)));
        assert!(!payments[2].mark_overdue(date(2024, 5, 1)));

        payments[0].mark_as_paid(&mut loan, Uuid::new_v4(), date(2024, 5, 2)).unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert!(!payments[0].mark_overdue(date(2024, 6, 1)));
        assert!(!payments[0].is_outstanding());
        assert!(payments[1].is_outstanding());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

/// Loan amounts from 100.00 to 1,000,000.00
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (10_000i64..100_000_000).prop_map(|c| Decimal::new(c, 2))
}

/// Annual rates from 0.00% to 30.00%
fn rate_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..3_000).prop_map(|r| Decimal::new(r, 2))
}

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// *For any* valid terms, principals sum to the loan amount, the
        /// final balance is zero and no row has a negative component.
        #[test]
        fn prop_schedule_amortizes_fully(
            amount in amount_strategy(),
            rate in rate_strategy(),
            n in 1i32..=120,
        ) {
            let rows = create_payment_schedule(amount, rate, n, date(2024, 1, 31)).unwrap();

            prop_assert!(!rows.is_empty());
            prop_assert!(rows.len() <= n as usize);
            let principal: Decimal = rows.iter().map(|r| r.principal_amount).sum();
            prop_assert_eq!(principal, amount);
            prop_assert_eq!(rows.last().unwrap().remaining_balance, Decimal::ZERO);

            for row in &rows {
                prop_assert!(row.principal_amount >= Decimal::ZERO);
                prop_assert!(row.interest_amount >= Decimal::ZERO);
                prop_assert_eq!(row.payment_amount, row.principal_amount + row.interest_amount);
            }
            for pair in rows.windows(2) {
                prop_assert!(pair[0].payment_date < pair[1].payment_date);
                prop_assert!(pair[0].remaining_balance >= pair[1].remaining_balance);
            }
        }

        /// *For any* zero-rate loan, every installment but the last is the EMI
        /// and the total paid equals the principal.
        #[test]
        fn prop_zero_rate_has_no_interest(amount in amount_strategy(), n in 1i32..=60) {
            let emi = calculate_monthly_payment(amount, Decimal::ZERO, n).unwrap();
            let rows = create_payment_schedule(amount, Decimal::ZERO, n, date(2024, 1, 1)).unwrap();

            let total: Decimal = rows.iter().map(|r| r.payment_amount).sum();
            prop_assert_eq!(total, amount);
            prop_assert!(rows.iter().all(|r| r.interest_amount.is_zero()));
            for row in &rows[..rows.len() - 1] {
                prop_assert_eq!(row.payment_amount, emi);
            }
        }

        /// *For any* partial amount below the installment, the row drops by
        /// exactly that amount and the loan is credited with it.
        #[test]
        fn prop_partial_payment_accounting(
            amount in amount_strategy(),
            rate in rate_strategy(),
            n in 2i32..=36,
            fraction in 1u32..100,
        ) {
            let mut loan = active_loan(amount, rate, n);
            let mut payments = loan.build_payments().unwrap();
            let before = payments[0].payment_amount;
            let partial = (before * Decimal::from(fraction) / Decimal::ONE_HUNDRED).round_dp(2);
            prop_assume!(partial > Decimal::ZERO && partial < before);

            let credited = payments[0]
                .process_partial_payment(&mut loan, partial, Uuid::new_v4(), date(2024, 2, 1))
                .unwrap();

            prop_assert_eq!(credited, partial);
            prop_assert_eq!(payments[0].payment_amount, before - partial);
            prop_assert_eq!(payments[0].status, PaymentStatus::PartiallyPaid);
            prop_assert_eq!(loan.total_paid, partial);
            prop_assert_eq!(loan.remaining_balance, amount - partial);
            prop_assert_eq!(loan.status, LoanStatus::Active);
        }
    }
}
