//! HTTP handlers for inventory count sessions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::models::{CountItem, InventoryCountDetail, InventoryCountSession, InventoryCountSummary};
use crate::services::inventory_count::{FinalizeCountInput, RecordCountInput, StartCountInput};
use crate::services::InventoryCountService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

const RESOURCE: &str = "inventory_count";

/// Start a count; stock changes are locked until it ends
pub async fn start_inventory_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<StartCountInput>,
) -> AppResult<(StatusCode, Json<InventoryCountDetail>)> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = InventoryCountService::new(state.db);
    let detail = service.start(user.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_active_inventory_count(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Option<InventoryCountDetail>>> {
    let service = InventoryCountService::new(state.db);
    let detail = service.get_active().await?;
    Ok(Json(detail))
}

pub async fn get_inventory_count(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<InventoryCountDetail>> {
    let service = InventoryCountService::new(state.db);
    let detail = service.get_count(session_id).await?;
    Ok(Json(detail))
}

pub async fn get_inventory_history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<InventoryCountSummary>>> {
    let service = InventoryCountService::new(state.db);
    let history = service.get_history(pagination).await?;
    Ok(Json(history))
}

/// Record a physical count for one line
pub async fn record_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(count_item_id): Path<Uuid>,
    Json(input): Json<RecordCountInput>,
) -> AppResult<Json<CountItem>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = InventoryCountService::new(state.db);
    let item = service.record_count(count_item_id, input).await?;
    Ok(Json(item))
}

/// Apply adjustments and complete the count
pub async fn finalize_inventory_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(session_id): Path<Uuid>,
    Json(input): Json<FinalizeCountInput>,
) -> AppResult<Json<InventoryCountDetail>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = InventoryCountService::new(state.db);
    let detail = service.finalize(session_id, user.user_id, input).await?;
    Ok(Json(detail))
}

pub async fn cancel_inventory_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<InventoryCountSession>> {
    check_permission(&user, RESOURCE, "manage")?;

    let service = InventoryCountService::new(state.db);
    let session = service.cancel(session_id).await?;
    Ok(Json(session))
}
