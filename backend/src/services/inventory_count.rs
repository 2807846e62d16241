//! Inventory count (tanaoroshi) sessions
//!
//! A session snapshots every item's stock, collects physical counts and on
//! finalize moves stock by the difference. While a session is in progress
//! the ledger rejects every other stock change.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use super::ledger;
use crate::error::{parse_stored, AppError, AppResult};
use crate::models::{
    count_adjustment, plan_count_adjustments, validate_actual_stock, CountItem, CountStatus,
    InventoryCountDetail, InventoryCountSession, InventoryCountSummary,
};
use shared::{
    validate_confirmer_name, validate_note, CoreError, PaginatedResponse, Pagination,
    PaginationMeta,
};

/// Service for inventory count sessions
#[derive(Clone)]
pub struct InventoryCountService {
    db: PgPool,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct StartCountInput {
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordCountInput {
    #[validate(range(min = 0, max = 1_000_000))]
    pub actual_stock: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FinalizeCountInput {
    #[validate(length(min = 1, max = 100))]
    pub confirmed_by: String,
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    status: String,
    note: Option<String>,
    started_by: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    confirmed_by: Option<String>,
}

impl TryFrom<SessionRow> for InventoryCountSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> AppResult<Self> {
        Ok(InventoryCountSession {
            id: row.id,
            status: parse_stored(&row.status, "inventory_count_sessions.status")?,
            note: row.note,
            started_by: row.started_by,
            started_at: row.started_at,
            ended_at: row.ended_at,
            confirmed_by: row.confirmed_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct CountItemRow {
    id: Uuid,
    session_id: Uuid,
    item_id: Uuid,
    code: String,
    name: String,
    expected_stock: i32,
    actual_stock: i32,
}

impl From<CountItemRow> for CountItem {
    fn from(row: CountItemRow) -> Self {
        CountItem {
            id: row.id,
            session_id: row.session_id,
            item_id: row.item_id,
            code: row.code,
            name: row.name,
            expected_stock: row.expected_stock,
            actual_stock: row.actual_stock,
            adjustment: count_adjustment(row.expected_stock, row.actual_stock),
        }
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    #[sqlx(flatten)]
    session: SessionRow,
    item_count: i64,
    adjusted_item_count: i64,
    net_adjustment: i64,
}

const SESSION_COLUMNS: &str =
    "id, status, note, started_by, started_at, ended_at, confirmed_by";

async fn lock_session(conn: &mut PgConnection, session_id: Uuid) -> AppResult<InventoryCountSession> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {} FROM inventory_count_sessions WHERE id = $1 FOR UPDATE",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Inventory count".to_string()))?
    .try_into()
}

async fn fetch_count_items(conn: &mut PgConnection, session_id: Uuid) -> AppResult<Vec<CountItem>> {
    let rows = sqlx::query_as::<_, CountItemRow>(
        r#"
        SELECT ci.id, ci.session_id, ci.item_id, i.code, i.name,
               ci.expected_stock, ci.actual_stock
        FROM inventory_count_items ci
        JOIN items i ON i.id = ci.item_id
        WHERE ci.session_id = $1
        ORDER BY ci.item_id
        "#,
    )
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(CountItem::from).collect())
}

fn map_active_conflict(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return CoreError::ActiveSessionConflict.into();
        }
    }
    err.into()
}

impl InventoryCountService {
    /// Create a new InventoryCountService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Start a session and snapshot every item's current stock
    pub async fn start(
        &self,
        started_by: Uuid,
        input: StartCountInput,
    ) -> AppResult<InventoryCountDetail> {
        input.validate()?;
        validate_note(input.note.as_deref()).map_err(|m| AppError::invalid_field("note", m))?;

        let mut tx = self.db.begin().await?;

        ledger::ensure_no_active_count(&mut tx).await?;

        // The partial unique index catches a session started concurrently
        let session: InventoryCountSession = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO inventory_count_sessions (status, note, started_by)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(CountStatus::InProgress.as_str())
        .bind(input.note.as_deref())
        .bind(started_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_active_conflict)?
        .try_into()?;

        // Waits for in-flight stock changes, so the snapshot sees their result
        let snapshot = sqlx::query_as::<_, (Uuid, i32)>(
            "SELECT id, stock FROM items ORDER BY id FOR SHARE",
        )
        .fetch_all(&mut *tx)
        .await?;
        let (item_ids, stocks): (Vec<Uuid>, Vec<i32>) = snapshot.into_iter().unzip();

        sqlx::query(
            r#"
            INSERT INTO inventory_count_items (session_id, item_id, expected_stock, actual_stock)
            SELECT $1, u.item_id, u.stock, u.stock
            FROM UNNEST($2::UUID[], $3::INTEGER[]) AS u(item_id, stock)
            "#,
        )
        .bind(session.id)
        .bind(&item_ids)
        .bind(&stocks)
        .execute(&mut *tx)
        .await?;

        let items = fetch_count_items(&mut tx, session.id).await?;

        tx.commit().await?;

        tracing::info!(
            session_id = %session.id,
            started_by = %started_by,
            items = items.len(),
            "Inventory count started"
        );

        Ok(InventoryCountDetail { session, items })
    }

    /// Record the physical count for one line of an open session
    pub async fn record_count(
        &self,
        count_item_id: Uuid,
        input: RecordCountInput,
    ) -> AppResult<CountItem> {
        validate_actual_stock(input.actual_stock)?;
        input.validate()?;

        let mut tx = self.db.begin().await?;

        let session_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT session_id FROM inventory_count_items WHERE id = $1",
        )
        .bind(count_item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Inventory count item".to_string()))?;

        let session = lock_session(&mut tx, session_id).await?;
        session.status.ensure_open()?;

        sqlx::query(
            "UPDATE inventory_count_items SET actual_stock = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(input.actual_stock)
        .bind(count_item_id)
        .execute(&mut *tx)
        .await?;

        let item = sqlx::query_as::<_, CountItemRow>(
            r#"
            SELECT ci.id, ci.session_id, ci.item_id, i.code, i.name,
                   ci.expected_stock, ci.actual_stock
            FROM inventory_count_items ci
            JOIN items i ON i.id = ci.item_id
            WHERE ci.id = $1
            "#,
        )
        .bind(count_item_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let item = CountItem::from(item);
        tracing::debug!(
            session_id = %session.id,
            item_id = %item.item_id,
            actual_stock = item.actual_stock,
            adjustment = item.adjustment,
            "Count recorded"
        );

        Ok(item)
    }

    /// Apply every non-zero adjustment and complete the session
    pub async fn finalize(
        &self,
        session_id: Uuid,
        finalized_by: Uuid,
        input: FinalizeCountInput,
    ) -> AppResult<InventoryCountDetail> {
        input.validate()?;
        validate_confirmer_name(&input.confirmed_by)
            .map_err(|m| AppError::invalid_field("confirmed_by", m))?;

        let mut tx = self.db.begin().await?;

        let session = lock_session(&mut tx, session_id).await?;
        session.status.ensure_open()?;

        let items = fetch_count_items(&mut tx, session.id).await?;
        let movements = plan_count_adjustments(session.id, &items);
        ledger::apply_all(&mut tx, &movements, Some(finalized_by)).await?;

        let session: InventoryCountSession = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE inventory_count_sessions
            SET status = $1, confirmed_by = $2, ended_at = NOW()
            WHERE id = $3
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(CountStatus::Completed.as_str())
        .bind(input.confirmed_by.trim())
        .bind(session.id)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;

        tracing::info!(
            session_id = %session.id,
            adjusted_items = movements.len(),
            net_adjustment = movements.iter().map(|m| i64::from(m.delta)).sum::<i64>(),
            "Inventory count finalized"
        );

        Ok(InventoryCountDetail { session, items })
    }

    /// Abandon a session without touching stock
    pub async fn cancel(&self, session_id: Uuid) -> AppResult<InventoryCountSession> {
        let mut tx = self.db.begin().await?;

        let session = lock_session(&mut tx, session_id).await?;
        session.status.ensure_open()?;

        let session: InventoryCountSession = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE inventory_count_sessions
            SET status = $1, ended_at = NOW()
            WHERE id = $2
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(CountStatus::Cancelled.as_str())
        .bind(session.id)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;

        tracing::info!(session_id = %session.id, "Inventory count cancelled");

        Ok(session)
    }

    /// The in-progress session, if any
    pub async fn get_active(&self) -> AppResult<Option<InventoryCountDetail>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM inventory_count_sessions WHERE status = $1",
            SESSION_COLUMNS
        ))
        .bind(CountStatus::InProgress.as_str())
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let session = InventoryCountSession::try_from(row)?;
                let mut conn = self.db.acquire().await?;
                let items = fetch_count_items(&mut conn, session.id).await?;
                Ok(Some(InventoryCountDetail { session, items }))
            }
            None => Ok(None),
        }
    }

    /// A session with its lines
    pub async fn get_count(&self, session_id: Uuid) -> AppResult<InventoryCountDetail> {
        let session: InventoryCountSession = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM inventory_count_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inventory count".to_string()))?
        .try_into()?;

        let mut conn = self.db.acquire().await?;
        let items = fetch_count_items(&mut conn, session.id).await?;

        Ok(InventoryCountDetail { session, items })
    }

    /// Sessions newest first, with per-session adjustment totals
    pub async fn get_history(
        &self,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<InventoryCountSummary>> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM inventory_count_sessions")
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT s.id, s.status, s.note, s.started_by, s.started_at, s.ended_at,
                   s.confirmed_by,
                   COUNT(ci.id) AS item_count,
                   COUNT(ci.id) FILTER (WHERE ci.actual_stock <> ci.expected_stock)
                       AS adjusted_item_count,
                   COALESCE(SUM(ci.actual_stock - ci.expected_stock), 0)::BIGINT
                       AS net_adjustment
            FROM inventory_count_sessions s
            LEFT JOIN inventory_count_items ci ON ci.session_id = s.id
            GROUP BY s.id
            ORDER BY s.started_at DESC, s.id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(|row| {
                Ok(InventoryCountSummary {
                    session: row.session.try_into()?,
                    item_count: row.item_count,
                    adjusted_item_count: row.adjusted_item_count,
                    net_adjustment: row.net_adjustment,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }
}
