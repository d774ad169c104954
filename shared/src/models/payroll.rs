//! Payroll slips and their allowance/deduction breakdowns

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::types::round_money;
use crate::validation::{exceeds_scale, PRICE_SCALE};

/// Deduction category used for loan installments pulled into a slip
pub const LOAN_INSTALLMENT: &str = "loan_installment";

/// Amounts keyed by category name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalaryBreakdown(BTreeMap<String, Decimal>);

impl SalaryBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to a category, accumulating if it already exists
    pub fn add(&mut self, category: impl Into<String>, amount: Decimal) {
        *self.0.entry(category.into()).or_insert(Decimal::ZERO) += amount;
    }

    pub fn get(&self, category: &str) -> Option<Decimal> {
        self.0.get(category).copied()
    }

    pub fn total(&self) -> Decimal {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decimal)> {
        self.0.iter()
    }

    fn validate(&self, field: &str) -> DomainResult<()> {
        for (category, amount) in &self.0 {
            if category.trim().is_empty() {
                return Err(DomainError::validation(field, "Category name cannot be empty"));
            }
            if *amount < Decimal::ZERO {
                return Err(DomainError::validation(
                    field,
                    format!("Amount for '{category}' cannot be negative"),
                ));
            }
            if exceeds_scale(*amount, PRICE_SCALE) {
                return Err(DomainError::validation(
                    field,
                    format!("Amount for '{category}' cannot have fractions of a cent"),
                ));
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, Decimal)> for SalaryBreakdown {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        let mut breakdown = SalaryBreakdown::new();
        for (category, amount) in iter {
            breakdown.add(category, amount);
        }
        breakdown
    }
}

/// Computed pay for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollSlip {
    pub basic_salary: Decimal,
    pub allowances: SalaryBreakdown,
    pub deductions: SalaryBreakdown,
    pub total_allowances: Decimal,
    pub total_deductions: Decimal,
    pub gross_salary: Decimal,
    pub net_salary: Decimal,
}

impl PayrollSlip {
    /// gross = basic + allowances, net = gross − deductions
    pub fn compute(
        basic_salary: Decimal,
        allowances: SalaryBreakdown,
        deductions: SalaryBreakdown,
    ) -> DomainResult<Self> {
        if basic_salary < Decimal::ZERO {
            return Err(DomainError::validation(
                "basic_salary",
                "Basic salary cannot be negative",
            ));
        }
        if exceeds_scale(basic_salary, PRICE_SCALE) {
            return Err(DomainError::validation(
                "basic_salary",
                "Basic salary cannot have fractions of a cent",
            ));
        }
        allowances.validate("allowances")?;
        deductions.validate("deductions")?;

        let total_allowances = round_money(allowances.total());
        let total_deductions = round_money(deductions.total());
        let gross_salary = round_money(basic_salary + total_allowances);

        Ok(Self {
            basic_salary,
            allowances,
            deductions,
            total_allowances,
            total_deductions,
            gross_salary,
            net_salary: gross_salary - total_deductions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_salary() {
        let allowances: SalaryBreakdown = [
            ("housing".to_string(), Decimal::from(300)),
            ("transport".to_string(), Decimal::from(100)),
        ]
        .into_iter()
        .collect();
        let mut deductions = SalaryBreakdown::new();
        deductions.add("tax", Decimal::from(150));
        deductions.add(LOAN_INSTALLMENT, Decimal::from(100));
        deductions.add(LOAN_INSTALLMENT, Decimal::from(50));

        let slip = PayrollSlip::compute(Decimal::from(2000), allowances, deductions).unwrap();
        assert_eq!(slip.gross_salary, Decimal::from(2400));
        assert_eq!(slip.total_deductions, Decimal::from(300));
        assert_eq!(slip.net_salary, Decimal::from(2100));
        assert_eq!(slip.deductions.get(LOAN_INSTALLMENT), Some(Decimal::from(150)));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let mut deductions = SalaryBreakdown::new();
        deductions.add("fine", Decimal::from(-5));
        assert!(PayrollSlip::compute(Decimal::from(1000), SalaryBreakdown::new(), deductions).is_err());
    }

    #[test]
    fn test_sub_cent_amounts_rejected() {
        let mut allowances = SalaryBreakdown::new();
        allowances.add("meal", Decimal::new(1_005, 3));
        assert!(PayrollSlip::compute(Decimal::from(1000), allowances, SalaryBreakdown::new()).is_err());
        assert!(PayrollSlip::compute(Decimal::new(100_001, 3), SalaryBreakdown::new(), SalaryBreakdown::new()).is_err());
        assert!(PayrollSlip::compute(Decimal::new(100_010, 3), SalaryBreakdown::new(), SalaryBreakdown::new()).is_ok());
    }

    #[test]
    fn test_breakdown_serializes_as_map() {
        let mut b = SalaryBreakdown::new();
        b.add("bonus", Decimal::from(10));
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["bonus"], "10");
    }
}
