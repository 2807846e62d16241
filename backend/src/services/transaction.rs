//! Transaction engine: checkouts, returns, corrections and manual adjustments
//!
//! Each public operation is one database transaction. Item rows are locked
//! before the count-session check and before any stock is compared, so the
//! plan computed from them stays valid until commit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use super::ledger;
use crate::error::{parse_stored, AppError, AppResult};
use crate::models::{
    catalog_quantities, ensure_non_negative, plan_checkout, plan_correction, plan_return,
    returnable_lines, LineItem, LineRequest, ManualAdjustmentKind, ReturnRequest, ReturnableLine,
    StockCategory, StockMovement, Transaction, TransactionKind,
};
use shared::{validate_reason, PaginatedResponse, Pagination, PaginationMeta};

/// Transaction service for stock-moving business operations
#[derive(Clone)]
pub struct TransactionService {
    db: PgPool,
}

/// Input for a checkout
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransactionInput {
    /// Who takes the goods; defaults to the authenticated user
    pub actor_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub lines: Vec<LineRequest>,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

/// Input for returning goods from an earlier checkout
#[derive(Debug, Deserialize, Validate)]
pub struct ReturnInput {
    #[validate(length(min = 1, max = 200))]
    pub lines: Vec<ReturnRequest>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Input for replacing the lines of a checkout
#[derive(Debug, Deserialize, Validate)]
pub struct CorrectTransactionInput {
    #[validate(length(min = 1, max = 200))]
    pub lines: Vec<LineRequest>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Input for a direct administrative stock change
#[derive(Debug, Deserialize, Validate)]
pub struct ManualAdjustmentInput {
    pub kind: ManualAdjustmentKind,
    /// Positive magnitude, or a signed delta for `correction`
    pub quantity: i32,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Filter for the transaction list
#[derive(Debug, Default, Deserialize)]
pub struct ListTransactionsQuery {
    pub actor_id: Option<Uuid>,
    pub kind: Option<TransactionKind>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Outcome of a manual adjustment
#[derive(Debug, Clone, Serialize)]
pub struct StockAdjustment {
    pub item_id: Uuid,
    pub category: StockCategory,
    pub quantity_delta: i32,
    pub stock_after: i32,
}

/// One correction of a checkout
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRevision {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub previous_lines: Vec<LineItem>,
    pub new_lines: Vec<LineItem>,
    pub previous_total: Decimal,
    pub new_total: Decimal,
    pub reason: String,
    pub revised_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    actor_id: Uuid,
    recorded_by: Uuid,
    original_transaction_id: Option<Uuid>,
    lines: Json<Vec<LineItem>>,
    total_amount: Decimal,
    is_proxy: bool,
    has_returns: bool,
    is_edited: bool,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> AppResult<Self> {
        Ok(Transaction {
            id: row.id,
            kind: parse_stored(&row.kind, "stock_transactions.kind")?,
            actor_id: row.actor_id,
            recorded_by: row.recorded_by,
            original_transaction_id: row.original_transaction_id,
            lines: row.lines.0,
            total_amount: row.total_amount,
            is_proxy: row.is_proxy,
            has_returns: row.has_returns,
            is_edited: row.is_edited,
            note: row.note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RevisionRow {
    id: Uuid,
    transaction_id: Uuid,
    previous_lines: Json<Vec<LineItem>>,
    new_lines: Json<Vec<LineItem>>,
    previous_total: Decimal,
    new_total: Decimal,
    reason: String,
    revised_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<RevisionRow> for TransactionRevision {
    fn from(row: RevisionRow) -> Self {
        TransactionRevision {
            id: row.id,
            transaction_id: row.transaction_id,
            previous_lines: row.previous_lines.0,
            new_lines: row.new_lines.0,
            previous_total: row.previous_total,
            new_total: row.new_total,
            reason: row.reason,
            revised_by: row.revised_by,
            created_at: row.created_at,
        }
    }
}

const TRANSACTION_COLUMNS: &str = "id, kind, actor_id, recorded_by, original_transaction_id, \
     lines, total_amount, is_proxy, has_returns, is_edited, note, created_at, updated_at";

/// Fields of a new transaction record
struct NewTransaction<'a> {
    id: Uuid,
    kind: TransactionKind,
    actor_id: Uuid,
    recorded_by: Uuid,
    original_transaction_id: Option<Uuid>,
    lines: &'a [LineItem],
    total_amount: Decimal,
    note: Option<&'a str>,
}

async fn insert_transaction(
    conn: &mut PgConnection,
    new: NewTransaction<'_>,
) -> AppResult<Transaction> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        INSERT INTO stock_transactions (
            id, kind, actor_id, recorded_by, original_transaction_id,
            lines, total_amount, is_proxy, note
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    ))
    .bind(new.id)
    .bind(new.kind.as_str())
    .bind(new.actor_id)
    .bind(new.recorded_by)
    .bind(new.original_transaction_id)
    .bind(Json(new.lines))
    .bind(new.total_amount)
    .bind(new.actor_id != new.recorded_by)
    .bind(new.note)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Load a transaction and lock it for the rest of the database transaction
async fn lock_transaction(conn: &mut PgConnection, transaction_id: Uuid) -> AppResult<Transaction> {
    sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {} FROM stock_transactions WHERE id = $1 FOR UPDATE",
        TRANSACTION_COLUMNS
    ))
    .bind(transaction_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?
    .try_into()
}

impl TransactionService {
    /// Create a new TransactionService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Check out goods; all lines succeed or none do
    pub async fn create_transaction(
        &self,
        recorded_by: Uuid,
        input: CreateTransactionInput,
    ) -> AppResult<Transaction> {
        input.validate()?;

        let transaction_id = Uuid::new_v4();
        let actor_id = input.actor_id.unwrap_or(recorded_by);
        let item_ids: Vec<Uuid> = input
            .lines
            .iter()
            .filter_map(LineRequest::catalog_item_id)
            .collect();

        let mut tx = self.db.begin().await?;

        let stock = ledger::lock_items(&mut tx, &item_ids).await?;
        ledger::ensure_no_active_count(&mut tx).await?;

        let plan = plan_checkout(transaction_id, &input.lines, &stock)?;
        ledger::apply_all(&mut tx, &plan.movements, Some(recorded_by)).await?;

        let transaction = insert_transaction(
            &mut tx,
            NewTransaction {
                id: transaction_id,
                kind: TransactionKind::Checkout,
                actor_id,
                recorded_by,
                original_transaction_id: None,
                lines: &plan.lines,
                total_amount: plan.total_amount,
                note: input.note.as_deref(),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction.id,
            actor_id = %actor_id,
            lines = transaction.lines.len(),
            movements = plan.movements.len(),
            "Checkout recorded"
        );

        Ok(transaction)
    }

    /// Return goods from an earlier checkout
    pub async fn return_from_history(
        &self,
        transaction_id: Uuid,
        recorded_by: Uuid,
        input: ReturnInput,
    ) -> AppResult<Transaction> {
        input.validate()?;
        validate_reason(&input.reason).map_err(|m| AppError::invalid_field("reason", m))?;

        let mut tx = self.db.begin().await?;

        // Serialises concurrent returns against the same checkout
        let original = lock_transaction(&mut tx, transaction_id).await?;
        let item_ids: Vec<Uuid> = catalog_quantities(&original.lines)?.into_keys().collect();
        ledger::lock_items(&mut tx, &item_ids).await?;
        ledger::ensure_no_active_count(&mut tx).await?;

        let returned = ledger::returned_quantities(&mut tx, original.id).await?;
        let plan = plan_return(&original, &returned, &input.lines, input.reason.trim())?;
        ledger::apply_all(&mut tx, &plan.movements, Some(recorded_by)).await?;

        let record = insert_transaction(
            &mut tx,
            NewTransaction {
                id: Uuid::new_v4(),
                kind: TransactionKind::Return,
                actor_id: original.actor_id,
                recorded_by,
                original_transaction_id: Some(original.id),
                lines: &plan.lines,
                total_amount: plan.total_amount,
                note: Some(input.reason.trim()),
            },
        )
        .await?;

        sqlx::query(
            "UPDATE stock_transactions SET has_returns = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(original.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            transaction_id = %original.id,
            return_id = %record.id,
            items = plan.movements.len(),
            "Return recorded"
        );

        Ok(record)
    }

    /// Replace the lines of a checkout, moving only the stock difference
    pub async fn correct_transaction(
        &self,
        transaction_id: Uuid,
        revised_by: Uuid,
        input: CorrectTransactionInput,
    ) -> AppResult<Transaction> {
        input.validate()?;
        validate_reason(&input.reason).map_err(|m| AppError::invalid_field("reason", m))?;

        let mut tx = self.db.begin().await?;

        let original = lock_transaction(&mut tx, transaction_id).await?;
        let mut item_ids: Vec<Uuid> = catalog_quantities(&original.lines)?.into_keys().collect();
        item_ids.extend(input.lines.iter().filter_map(LineRequest::catalog_item_id));
        let stock = ledger::lock_items(&mut tx, &item_ids).await?;

        let returned = ledger::returned_quantities(&mut tx, original.id).await?;
        let plan = plan_correction(&original, &input.lines, &stock, &returned, input.reason.trim())?;

        if !plan.changed {
            tracing::debug!(transaction_id = %original.id, "Correction matches current lines");
            return Ok(original);
        }
        if !plan.movements.is_empty() {
            ledger::ensure_no_active_count(&mut tx).await?;
        }

        ledger::apply_all(&mut tx, &plan.movements, Some(revised_by)).await?;

        sqlx::query(
            r#"
            INSERT INTO transaction_revisions (
                transaction_id, previous_lines, new_lines, previous_total, new_total,
                reason, revised_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(original.id)
        .bind(Json(&original.lines))
        .bind(Json(&plan.lines))
        .bind(original.total_amount)
        .bind(plan.total_amount)
        .bind(input.reason.trim())
        .bind(revised_by)
        .execute(&mut *tx)
        .await?;

        let updated: Transaction = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE stock_transactions
            SET lines = $1, total_amount = $2, is_edited = TRUE, updated_at = NOW()
            WHERE id = $3
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(Json(&plan.lines))
        .bind(plan.total_amount)
        .bind(original.id)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;

        tracing::info!(
            transaction_id = %updated.id,
            movements = plan.movements.len(),
            previous_total = %original.total_amount,
            new_total = %updated.total_amount,
            "Transaction corrected"
        );

        Ok(updated)
    }

    /// Direct administrative stock change.
    ///
    /// Decrements never take stock below zero.
    pub async fn adjust_stock_manually(
        &self,
        item_id: Uuid,
        actor_id: Uuid,
        input: ManualAdjustmentInput,
    ) -> AppResult<StockAdjustment> {
        input.validate()?;
        validate_reason(&input.reason).map_err(|m| AppError::invalid_field("reason", m))?;
        let delta = input.kind.signed_delta(input.quantity)?;
        let category = input.kind.category();

        let mut tx = self.db.begin().await?;

        let item = ledger::lock_item(&mut tx, item_id).await?;
        ledger::ensure_no_active_count(&mut tx).await?;
        ensure_non_negative(item.item_id, &item.code, item.stock, delta)?;

        let movement = StockMovement::new(item_id, delta, category, input.reason.trim());
        let stock_after = ledger::apply_delta(&mut tx, &movement, Some(actor_id)).await?;

        tx.commit().await?;

        tracing::info!(
            item_id = %item_id,
            category = category.as_str(),
            delta,
            stock_after,
            "Manual stock adjustment"
        );

        Ok(StockAdjustment {
            item_id,
            category,
            quantity_delta: delta,
            stock_after,
        })
    }

    /// Get a transaction
    pub async fn get_transaction(&self, transaction_id: Uuid) -> AppResult<Transaction> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM stock_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?
        .try_into()
    }

    /// List transactions, newest first
    pub async fn list_transactions(
        &self,
        query: ListTransactionsQuery,
    ) -> AppResult<PaginatedResponse<Transaction>> {
        let defaults = Pagination::default();
        let pagination = Pagination {
            page: query.page.unwrap_or(defaults.page),
            per_page: query.per_page.unwrap_or(defaults.per_page),
        };
        let kind = query.kind.map(|k| k.as_str());

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM stock_transactions
            WHERE ($1::UUID IS NULL OR actor_id = $1)
              AND ($2::VARCHAR IS NULL OR kind = $2)
            "#,
        )
        .bind(query.actor_id)
        .bind(kind)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM stock_transactions
            WHERE ($1::UUID IS NULL OR actor_id = $1)
              AND ($2::VARCHAR IS NULL OR kind = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(query.actor_id)
        .bind(kind)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(Transaction::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }

    /// Purchased, returned and remaining quantities per item of a checkout
    pub async fn get_returnable(&self, transaction_id: Uuid) -> AppResult<Vec<ReturnableLine>> {
        let transaction = self.get_transaction(transaction_id).await?;
        if transaction.kind != TransactionKind::Checkout {
            return Err(AppError::InvalidStateTransition(
                "Only checkout transactions can be returned".to_string(),
            ));
        }

        let mut conn = self.db.acquire().await?;
        let returned = ledger::returned_quantities(&mut conn, transaction.id).await?;

        Ok(returnable_lines(&transaction, &returned)?)
    }

    /// Correction history of a checkout, oldest first
    pub async fn list_revisions(&self, transaction_id: Uuid) -> AppResult<Vec<TransactionRevision>> {
        self.get_transaction(transaction_id).await?;

        let rows = sqlx::query_as::<_, RevisionRow>(
            r#"
            SELECT id, transaction_id, previous_lines, new_lines, previous_total, new_total,
                   reason, revised_by, created_at
            FROM transaction_revisions
            WHERE transaction_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(TransactionRevision::from).collect())
    }
}
