//! Route definitions for the back-office API

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - stock ledger
        .nest("/stock", stock_routes(state.clone()))
        // Protected routes - product prices
        .nest("/products", product_routes(state.clone()))
        .nest("/price-history", price_history_routes(state.clone()))
        // Protected routes - purchase receiving
        .nest("/purchases", purchase_routes(state.clone()))
        // Protected routes - employee loans
        .nest("/loans", loan_routes(state.clone()))
        // Protected routes - payroll
        .nest("/payrolls", payroll_routes(state))
}

/// Stock ledger routes (protected)
fn stock_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/balances",
            get(handlers::list_balances).post(handlers::open_balance),
        )
        .route("/balances/:balance_id", get(handlers::get_balance))
        .route("/balances/:balance_id/add", post(handlers::add_stock))
        .route("/balances/:balance_id/remove", post(handlers::remove_stock))
        .route("/balances/:balance_id/adjust", post(handlers::adjust_stock))
        .route("/balances/:balance_id/transfer", post(handlers::transfer_stock))
        .route(
            "/balances/:balance_id/movements",
            get(handlers::list_movements).post(handlers::record_movement),
        )
        .route("/balances/:balance_id/verify", get(handlers::verify_balance))
        .route("/receive", post(handlers::receive_stock))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Product price routes (protected)
fn product_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/:product_id/prices",
            put(handlers::update_product_prices),
        )
        .route("/:product_id/prices/history", get(handlers::list_price_history))
        .route("/:product_id/prices/at", get(handlers::get_price_at))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Raw price history routes (protected)
fn price_history_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::record_price_change))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Purchase receiving routes (protected)
fn purchase_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/invoices", post(handlers::receive_invoice))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Employee loan routes (protected)
fn loan_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_loans).post(handlers::create_loan))
        .route("/schedule-preview", post(handlers::preview_schedule))
        .route("/overdue/refresh", post(handlers::refresh_overdue))
        .route("/:loan_id", get(handlers::get_loan))
        .route("/:loan_id/approve", post(handlers::approve_loan))
        .route("/:loan_id/activate", post(handlers::activate_loan))
        .route("/:loan_id/cancel", post(handlers::cancel_loan))
        .route("/:loan_id/default", post(handlers::default_loan))
        .route("/:loan_id/payments", get(handlers::list_loan_payments))
        .route(
            "/:loan_id/payments/:payment_id/pay",
            post(handlers::mark_payment_paid),
        )
        .route(
            "/:loan_id/payments/:payment_id/partial",
            post(handlers::process_partial_payment),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Payroll routes (protected)
fn payroll_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_payrolls).post(handlers::generate_payroll))
        .route("/:payroll_id", get(handlers::get_payroll))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
