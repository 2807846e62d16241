//! HTTP handlers for checkouts, returns and corrections

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::models::{ReturnableLine, Transaction};
use crate::services::transaction::{
    CorrectTransactionInput, CreateTransactionInput, ListTransactionsQuery, ReturnInput,
    TransactionRevision,
};
use crate::services::TransactionService;
use crate::AppState;
use shared::PaginatedResponse;

/// Record a checkout. Entering one for another actor makes it a proxy entry.
pub async fn create_transaction(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateTransactionInput>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    if input.actor_id.is_some_and(|actor| actor != user.user_id) {
        check_permission(&user, "transactions", "proxy")?;
    }

    let service = TransactionService::new(state.db);
    let transaction = service.create_transaction(user.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// List transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<ListTransactionsQuery>,
) -> AppResult<Json<PaginatedResponse<Transaction>>> {
    let service = TransactionService::new(state.db);
    let page = service.list_transactions(query).await?;
    Ok(Json(page))
}

/// Get a transaction
pub async fn get_transaction(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    let service = TransactionService::new(state.db);
    let transaction = service.get_transaction(transaction_id).await?;
    Ok(Json(transaction))
}

/// Remaining returnable quantity per item
pub async fn get_returnable(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<Vec<ReturnableLine>>> {
    let service = TransactionService::new(state.db);
    let lines = service.get_returnable(transaction_id).await?;
    Ok(Json(lines))
}

/// Return goods from a checkout
pub async fn return_from_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(transaction_id): Path<Uuid>,
    Json(input): Json<ReturnInput>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    let service = TransactionService::new(state.db);
    let record = service
        .return_from_history(transaction_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Replace the lines of a checkout
pub async fn correct_transaction(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(transaction_id): Path<Uuid>,
    Json(input): Json<CorrectTransactionInput>,
) -> AppResult<Json<Transaction>> {
    check_permission(&user, "transactions", "correct")?;

    let service = TransactionService::new(state.db);
    let transaction = service
        .correct_transaction(transaction_id, user.user_id, input)
        .await?;
    Ok(Json(transaction))
}

/// Correction history of a checkout
pub async fn list_revisions(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<Vec<TransactionRevision>>> {
    let service = TransactionService::new(state.db);
    let revisions = service.list_revisions(transaction_id).await?;
    Ok(Json(revisions))
}
