//! Stock ledger: the only code that writes `items.stock`
//!
//! Every write pairs the stock update with one audit entry on the same
//! connection. The functions taking `&mut PgConnection` expect to run inside
//! the caller's database transaction; they never commit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{parse_stored, AppError, AppResult};
use crate::models::{
    AuditEntry, AuditReference, Item, ReferenceKind, StockCategory, StockMovement, StockSnapshot,
};
use shared::{CoreError, TimeRange};

/// Read-side service for items and their audit history
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
}

/// Filter for audit history
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub category: Option<StockCategory>,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    code: String,
    name: String,
    stock: i32,
    min_stock: i32,
    unit_price: Decimal,
    cost: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            code: row.code,
            name: row.name,
            stock: row.stock,
            min_stock: row.min_stock,
            unit_price: row.unit_price,
            cost: row.cost,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: Uuid,
    code: String,
    name: String,
    stock: i32,
    unit_price: Decimal,
}

impl From<SnapshotRow> for StockSnapshot {
    fn from(row: SnapshotRow) -> Self {
        StockSnapshot {
            item_id: row.id,
            code: row.code,
            name: row.name,
            stock: row.stock,
            unit_price: row.unit_price,
        }
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    item_id: Uuid,
    quantity_delta: i32,
    stock_after: i32,
    category: String,
    reason: String,
    reference_kind: Option<String>,
    reference_id: Option<Uuid>,
    actor_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AppError;

    fn try_from(row: AuditRow) -> AppResult<Self> {
        let reference = match (row.reference_kind, row.reference_id) {
            (Some(kind), Some(id)) => Some(AuditReference {
                kind: parse_stored::<ReferenceKind>(&kind, "stock_audit_entries.reference_kind")?,
                id,
            }),
            _ => None,
        };
        Ok(AuditEntry {
            id: row.id,
            item_id: row.item_id,
            quantity_delta: row.quantity_delta,
            stock_after: row.stock_after,
            category: parse_stored(&row.category, "stock_audit_entries.category")?,
            reason: row.reason,
            reference,
            actor_id: row.actor_id,
            created_at: row.created_at,
        })
    }
}

const ITEM_COLUMNS: &str =
    "id, code, name, stock, min_stock, unit_price, cost, created_at, updated_at";

// ============================================================================
// Transaction-scoped primitives
// ============================================================================

/// Apply one movement and append its audit entry. Returns the new stock.
pub async fn apply_delta(
    conn: &mut PgConnection,
    movement: &StockMovement,
    actor_id: Option<Uuid>,
) -> AppResult<i32> {
    movement.category.check_delta(movement.delta)?;

    let stock_after = sqlx::query_scalar::<_, i32>(
        "UPDATE items SET stock = stock + $1, updated_at = NOW() WHERE id = $2 RETURNING stock",
    )
    .bind(movement.delta)
    .bind(movement.item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Item".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO stock_audit_entries (
            item_id, quantity_delta, stock_after, category, reason,
            reference_kind, reference_id, actor_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(movement.item_id)
    .bind(movement.delta)
    .bind(stock_after)
    .bind(movement.category.as_str())
    .bind(&movement.reason)
    .bind(movement.reference.map(|r| r.kind.as_str()))
    .bind(movement.reference.map(|r| r.id))
    .bind(actor_id)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        item_id = %movement.item_id,
        delta = movement.delta,
        stock_after,
        category = movement.category.as_str(),
        "Stock movement applied"
    );

    Ok(stock_after)
}

/// Apply movements in order
pub async fn apply_all(
    conn: &mut PgConnection,
    movements: &[StockMovement],
    actor_id: Option<Uuid>,
) -> AppResult<()> {
    for movement in movements {
        apply_delta(conn, movement, actor_id).await?;
    }
    Ok(())
}

/// Lock the given items for the rest of the transaction.
///
/// Rows are locked in id order so concurrent callers cannot deadlock. Ids
/// that do not exist are simply absent from the result.
pub async fn lock_items(
    conn: &mut PgConnection,
    item_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, StockSnapshot>> {
    let mut ids = item_ids.to_vec();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, code, name, stock, unit_price
        FROM items
        WHERE id = ANY($1)
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.id, StockSnapshot::from(row)))
        .collect())
}

/// Lock a single item, failing if it does not exist
pub async fn lock_item(conn: &mut PgConnection, item_id: Uuid) -> AppResult<StockSnapshot> {
    lock_items(conn, &[item_id])
        .await?
        .remove(&item_id)
        .ok_or_else(|| AppError::NotFound("Item".to_string()))
}

/// Reject stock changes while a count is in progress.
///
/// Call after locking the affected item rows: a count that starts
/// concurrently then either waits for this transaction or is already
/// visible here.
pub async fn ensure_no_active_count(conn: &mut PgConnection) -> AppResult<()> {
    let active = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM inventory_count_sessions WHERE status = 'in_progress')",
    )
    .fetch_one(&mut *conn)
    .await?;

    if active {
        tracing::warn!("Stock change rejected: inventory count in progress");
        return Err(CoreError::ActiveSessionConflict.into());
    }
    Ok(())
}

/// Quantity already returned per item for a checkout, rebuilt from the log
pub async fn returned_quantities(
    conn: &mut PgConnection,
    transaction_id: Uuid,
) -> AppResult<HashMap<Uuid, i32>> {
    let rows = sqlx::query_as::<_, (Uuid, i64)>(
        r#"
        SELECT item_id, COALESCE(SUM(quantity_delta), 0)::BIGINT
        FROM stock_audit_entries
        WHERE reference_kind = $1 AND reference_id = $2 AND category = $3
        GROUP BY item_id
        "#,
    )
    .bind(ReferenceKind::Transaction.as_str())
    .bind(transaction_id)
    .bind(StockCategory::Return.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(item_id, total)| {
            i32::try_from(total)
                .map(|total| (item_id, total))
                .map_err(|_| AppError::Internal("Returned quantity out of range".to_string()))
        })
        .collect()
}

// ============================================================================
// Read side
// ============================================================================

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Get an item with its current stock
    pub async fn get_item(&self, item_id: Uuid) -> AppResult<Item> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM items WHERE id = $1",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Item".to_string()))?;

        Ok(row.into())
    }

    /// Items whose stock is at or below their minimum
    pub async fn list_low_stock_items(&self) -> AppResult<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM items WHERE stock <= min_stock ORDER BY (min_stock - stock) DESC, code",
            ITEM_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Audit history of one item, oldest first
    pub async fn list_audit_entries(
        &self,
        item_id: Uuid,
        query: AuditQuery,
    ) -> AppResult<Vec<AuditEntry>> {
        let range = TimeRange {
            from: query.from,
            to: query.to,
        };
        if !range.is_valid() {
            return Err(AppError::invalid_field("from", "Start of range is after its end"));
        }

        // Surface a missing item as 404 rather than an empty history
        self.get_item(item_id).await?;

        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, item_id, quantity_delta, stock_after, category, reason,
                   reference_kind, reference_id, actor_id, created_at
            FROM stock_audit_entries
            WHERE item_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at < $3)
              AND ($4::VARCHAR IS NULL OR category = $4)
            ORDER BY seq
            "#,
        )
        .bind(item_id)
        .bind(range.from)
        .bind(range.to)
        .bind(query.category.map(|c| c.as_str()))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
