//! HTTP handlers for purchase orders and receiving

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::models::PurchaseOrder;
use crate::services::purchase_order::{
    CreateOrderInput, ListOrdersQuery, OrderItemInput, QuantityInput, ReceiptResult,
};
use crate::services::PurchaseOrderService;
use crate::AppState;
use shared::PaginatedResponse;

const RESOURCE: &str = "orders";

/// Create a draft order
pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<(StatusCode, Json<PurchaseOrder>)> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let order = service.create_order(user.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> AppResult<Json<PaginatedResponse<PurchaseOrder>>> {
    let service = PurchaseOrderService::new(state.db);
    let orders = service.list_orders(query).await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrder>> {
    let service = PurchaseOrderService::new(state.db);
    let order = service.get_order(order_id).await?;
    Ok(Json(order))
}

pub async fn confirm_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrder>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let order = service.confirm_order(order_id).await?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrder>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let order = service.cancel_order(order_id).await?;
    Ok(Json(order))
}

pub async fn add_order_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(input): Json<OrderItemInput>,
) -> AppResult<(StatusCode, Json<PurchaseOrder>)> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let order = service.add_order_item(order_id, input).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn update_order_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_item_id): Path<Uuid>,
    Json(input): Json<QuantityInput>,
) -> AppResult<Json<PurchaseOrder>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let order = service
        .update_order_item_quantity(order_item_id, input)
        .await?;
    Ok(Json(order))
}

pub async fn remove_order_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_item_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrder>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let order = service.remove_order_item(order_item_id).await?;
    Ok(Json(order))
}

/// Receive goods against an order line
pub async fn receive_order_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_item_id): Path<Uuid>,
    Json(input): Json<QuantityInput>,
) -> AppResult<(StatusCode, Json<ReceiptResult>)> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let result = service
        .receive_item(order_item_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Reverse the latest receipt of an order line
pub async fn cancel_receipt(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_item_id): Path<Uuid>,
) -> AppResult<Json<ReceiptResult>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = PurchaseOrderService::new(state.db);
    let result = service.cancel_receipt(order_item_id, user.user_id).await?;
    Ok(Json(result))
}
