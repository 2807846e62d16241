//! Route definitions for the materials inventory server

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
        .nest("/items", item_routes(state.clone()))
        .nest("/transactions", transaction_routes(state.clone()))
        .nest("/inventory-counts", inventory_count_routes(state.clone()))
        .nest("/orders", order_routes(state))
}

/// Item and stock routes (protected)
fn item_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/low-stock", get(handlers::list_low_stock_items))
        .route("/:item_id", get(handlers::get_item))
        .route("/:item_id/audit", get(handlers::list_audit_entries))
        .route("/:item_id/adjustments", post(handlers::adjust_stock))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Checkout, return and correction routes (protected)
fn transaction_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route("/:transaction_id", get(handlers::get_transaction))
        .route("/:transaction_id/returnable", get(handlers::get_returnable))
        .route("/:transaction_id/returns", post(handlers::return_from_history))
        .route("/:transaction_id/lines", put(handlers::correct_transaction))
        .route("/:transaction_id/revisions", get(handlers::list_revisions))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Inventory count routes (protected)
fn inventory_count_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::get_inventory_history).post(handlers::start_inventory_count),
        )
        .route("/active", get(handlers::get_active_inventory_count))
        .route("/items/:count_item_id", put(handlers::record_count))
        .route("/:session_id", get(handlers::get_inventory_count))
        .route("/:session_id/finalize", post(handlers::finalize_inventory_count))
        .route("/:session_id/cancel", post(handlers::cancel_inventory_count))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Purchase order routes (protected)
fn order_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_orders).post(handlers::create_order))
        .route("/:order_id", get(handlers::get_order))
        .route("/:order_id/confirm", post(handlers::confirm_order))
        .route("/:order_id/cancel", post(handlers::cancel_order))
        .route("/:order_id/items", post(handlers::add_order_item))
        .route(
            "/items/:order_item_id",
            put(handlers::update_order_item).delete(handlers::remove_order_item),
        )
        .route(
            "/items/:order_item_id/receipts",
            post(handlers::receive_order_item),
        )
        .route(
            "/items/:order_item_id/cancel-receipt",
            post(handlers::cancel_receipt),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
