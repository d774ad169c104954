//! WebAssembly module for the back-office admin front end
//!
//! Runs the same arithmetic as the server so forms can preview:
//! - Loan installments and amortization schedules
//! - Price change percentages and directions
//! - Payroll slip totals
//!
//! Amounts cross the boundary as decimal strings to avoid float rounding.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use wasm_bindgen::prelude::*;

use shared::{
    calculate_monthly_payment, create_payment_schedule, direction, overall_direction,
    format_money, percentage_change, validate_quantity, PayrollSlip, SalaryBreakdown,
};

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|e| format!("Invalid {field} '{value}': {e}"))
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid {field} '{value}': {e}"))
}

fn to_js_error(message: String) -> JsValue {
    web_sys::console::warn_1(&JsValue::from_str(&message));
    js_sys::Error::new(&message).into()
}

fn emi(principal: &str, annual_rate: &str, installments: i32) -> Result<String, String> {
    let principal = parse_decimal("principal", principal)?;
    let rate = parse_decimal("interest rate", annual_rate)?;
    calculate_monthly_payment(principal, rate, installments)
        .map(format_money)
        .map_err(|e| e.to_string())
}

fn schedule(principal: &str, annual_rate: &str, installments: i32, start_date: &str) -> Result<String, String> {
    let principal = parse_decimal("principal", principal)?;
    let rate = parse_decimal("interest rate", annual_rate)?;
    let start = parse_date("start date", start_date)?;
    let rows = create_payment_schedule(principal, rate, installments, start).map_err(|e| e.to_string())?;
    serde_json::to_string(&rows).map_err(|e| e.to_string())
}

fn price_change(
    old_purchase: &str,
    new_purchase: &str,
    old_sell: &str,
    new_sell: &str,
) -> Result<String, String> {
    let old_purchase = parse_decimal("old purchase price", old_purchase)?;
    let new_purchase = parse_decimal("new purchase price", new_purchase)?;
    let old_sell = parse_decimal("old sell price", old_sell)?;
    let new_sell = parse_decimal("new sell price", new_sell)?;

    let purchase_direction = direction(old_purchase, new_purchase);
    let sell_direction = direction(old_sell, new_sell);
    let summary = json!({
        "purchase_change_percent": percentage_change(old_purchase, new_purchase),
        "sell_change_percent": percentage_change(old_sell, new_sell),
        "purchase_direction": purchase_direction,
        "sell_direction": sell_direction,
        "overall_direction": overall_direction(purchase_direction, sell_direction),
    });
    Ok(summary.to_string())
}

fn payroll(basic_salary: &str, allowances_json: &str, deductions_json: &str) -> Result<String, String> {
    let basic = parse_decimal("basic salary", basic_salary)?;
    let allowances: SalaryBreakdown =
        serde_json::from_str(allowances_json).map_err(|e| format!("Invalid allowances JSON: {e}"))?;
    let deductions: SalaryBreakdown =
        serde_json::from_str(deductions_json).map_err(|e| format!("Invalid deductions JSON: {e}"))?;
    let slip = PayrollSlip::compute(basic, allowances, deductions).map_err(|e| e.to_string())?;
    serde_json::to_string(&slip).map_err(|e| e.to_string())
}

/// Monthly installment for a loan, as a decimal string
#[wasm_bindgen]
pub fn calculate_loan_installment(principal: &str, annual_rate: &str, installments: i32) -> Result<String, JsValue> {
    emi(principal, annual_rate, installments).map_err(to_js_error)
}

/// Amortization schedule as a JSON array of rows
#[wasm_bindgen]
pub fn loan_schedule_json(
    principal: &str,
    annual_rate: &str,
    installments: i32,
    start_date: &str,
) -> Result<String, JsValue> {
    schedule(principal, annual_rate, installments, start_date).map_err(to_js_error)
}

/// Percentage change between two prices, as a decimal string
#[wasm_bindgen]
pub fn price_change_percent(old_price: &str, new_price: &str) -> Result<String, JsValue> {
    let old = parse_decimal("old price", old_price).map_err(to_js_error)?;
    let new = parse_decimal("new price", new_price).map_err(to_js_error)?;
    Ok(percentage_change(old, new).to_string())
}

/// Percentages and directions for a purchase/sell price change, as JSON
#[wasm_bindgen]
pub fn price_change_summary_json(
    old_purchase: &str,
    new_purchase: &str,
    old_sell: &str,
    new_sell: &str,
) -> Result<String, JsValue> {
    price_change(old_purchase, new_purchase, old_sell, new_sell).map_err(to_js_error)
}

/// Payroll slip totals from category → amount JSON objects
#[wasm_bindgen]
pub fn payroll_slip_json(basic_salary: &str, allowances_json: &str, deductions_json: &str) -> Result<String, JsValue> {
    payroll(basic_salary, allowances_json, deductions_json).map_err(to_js_error)
}

/// Whether a stock quantity entered in a form is acceptable
#[wasm_bindgen]
pub fn is_valid_stock_quantity(quantity: &str) -> bool {
    parse_decimal("quantity", quantity)
        .map(|q| validate_quantity(q).is_ok())
        .unwrap_or(false)
}
