//! HTTP handlers for items, their audit history and manual adjustments

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::models::{AuditEntry, Item};
use crate::services::ledger::AuditQuery;
use crate::services::transaction::{ManualAdjustmentInput, StockAdjustment};
use crate::services::{LedgerService, TransactionService};
use crate::AppState;

/// Get an item with its current stock
pub async fn get_item(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(item_id): Path<Uuid>,
) -> AppResult<Json<Item>> {
    let service = LedgerService::new(state.db);
    let item = service.get_item(item_id).await?;
    Ok(Json(item))
}

/// Items at or below their minimum stock
pub async fn list_low_stock_items(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<Item>>> {
    let service = LedgerService::new(state.db);
    let items = service.list_low_stock_items().await?;
    Ok(Json(items))
}

/// Audit history of an item
pub async fn list_audit_entries(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(item_id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    let service = LedgerService::new(state.db);
    let entries = service.list_audit_entries(item_id, query).await?;
    Ok(Json(entries))
}

/// Inbound, outbound, disposal or correction outside any transaction
pub async fn adjust_stock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(item_id): Path<Uuid>,
    Json(input): Json<ManualAdjustmentInput>,
) -> AppResult<(StatusCode, Json<StockAdjustment>)> {
    check_permission(&user, "stock", "adjust")?;

    let service = TransactionService::new(state.db);
    let adjustment = service
        .adjust_stock_manually(item_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(adjustment)))
}
