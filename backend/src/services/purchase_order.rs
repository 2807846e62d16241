//! Purchase order lifecycle
//!
//! DRAFT -> ORDERED -> PARTIAL -> RECEIVED, or CANCELLED before completion.
//! Receiving goods is the only step that moves stock; every receipt is kept
//! as its own row so it can be reversed exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use super::ledger;
use crate::error::{parse_stored, AppError, AppResult};
use crate::models::{
    apply_receipt, derive_order_status, ensure_non_negative, is_item_received,
    validate_ordered_quantity, AuditReference, OrderItem, OrderReceipt, OrderStatus,
    PurchaseOrder, StockCategory, StockMovement,
};
use shared::{validate_note, validate_unique_items, PaginatedResponse, Pagination, PaginationMeta};

/// Service for purchase orders and receiving
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: PgPool,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct OrderItemInput {
    pub item_id: Uuid,
    #[validate(range(min = 1, max = 1_000_000))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderInput {
    pub delivery_location_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
    #[validate(length(max = 200))]
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuantityInput {
    #[validate(range(min = 1, max = 1_000_000))]
    pub quantity: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Outcome of a receipt or its reversal
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptResult {
    pub order: PurchaseOrder,
    pub receipt: OrderReceipt,
    pub stock_after: i32,
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    status: String,
    delivery_location_id: Option<Uuid>,
    note: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ordered_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> AppResult<PurchaseOrder> {
        Ok(PurchaseOrder {
            id: self.id,
            status: parse_stored(&self.status, "purchase_orders.status")?,
            delivery_location_id: self.delivery_location_id,
            note: self.note,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ordered_at: self.ordered_at,
            received_at: self.received_at,
            cancelled_at: self.cancelled_at,
            items,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    item_id: Uuid,
    code: String,
    name: String,
    ordered_quantity: i32,
    received_quantity: i32,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            item_id: row.item_id,
            code: row.code,
            name: row.name,
            ordered_quantity: row.ordered_quantity,
            received_quantity: row.received_quantity,
            is_received: is_item_received(row.ordered_quantity, row.received_quantity),
        }
    }
}

#[derive(Debug, FromRow)]
struct ReceiptRow {
    id: Uuid,
    order_item_id: Uuid,
    quantity: i32,
    received_by: Uuid,
    received_at: DateTime<Utc>,
    reversed_at: Option<DateTime<Utc>>,
}

impl From<ReceiptRow> for OrderReceipt {
    fn from(row: ReceiptRow) -> Self {
        OrderReceipt {
            id: row.id,
            order_item_id: row.order_item_id,
            quantity: row.quantity,
            received_by: row.received_by,
            received_at: row.received_at,
            reversed_at: row.reversed_at,
        }
    }
}

const ORDER_COLUMNS: &str = "id, status, delivery_location_id, note, created_by, created_at, \
     updated_at, ordered_at, received_at, cancelled_at";

const RECEIPT_COLUMNS: &str =
    "id, order_item_id, quantity, received_by, received_at, reversed_at";

async fn fetch_order_items(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        r#"
        SELECT oi.id, oi.order_id, oi.item_id, i.code, i.name,
               oi.ordered_quantity, oi.received_quantity
        FROM purchase_order_items oi
        JOIN items i ON i.id = oi.item_id
        WHERE oi.order_id = $1
        ORDER BY oi.created_at, i.code
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(OrderItem::from).collect())
}

/// Load an order with its items and lock the order row
async fn lock_order(conn: &mut PgConnection, order_id: Uuid) -> AppResult<PurchaseOrder> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM purchase_orders WHERE id = $1 FOR UPDATE",
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

    let items = fetch_order_items(conn, order_id).await?;
    row.into_order(items)
}

/// Resolve an order item to its order and lock that order
async fn lock_order_for_item(
    conn: &mut PgConnection,
    order_item_id: Uuid,
) -> AppResult<(PurchaseOrder, OrderItem)> {
    let order_id = sqlx::query_scalar::<_, Uuid>(
        "SELECT order_id FROM purchase_order_items WHERE id = $1",
    )
    .bind(order_item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Order item".to_string()))?;

    let order = lock_order(conn, order_id).await?;
    let item = order
        .items
        .iter()
        .find(|item| item.id == order_item_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound("Order item".to_string()))?;

    Ok((order, item))
}

async fn ensure_items_exist(conn: &mut PgConnection, item_ids: &[Uuid]) -> AppResult<()> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE id = ANY($1)")
        .bind(item_ids)
        .fetch_one(&mut *conn)
        .await?;

    if found != item_ids.len() as i64 {
        return Err(AppError::NotFound("Item".to_string()));
    }
    Ok(())
}

/// Recompute and store the status of a confirmed order from its items
async fn refresh_order_status(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> AppResult<PurchaseOrder> {
    let quantities = sqlx::query_as::<_, (i32, i32)>(
        "SELECT ordered_quantity, received_quantity FROM purchase_order_items WHERE order_id = $1",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let status = derive_order_status(&quantities);

    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET status = $1,
            received_at = CASE WHEN $1::VARCHAR = 'received' THEN NOW() ELSE NULL END,
            updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(status.as_str())
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    lock_order(conn, order_id).await
}

impl PurchaseOrderService {
    /// Create a new PurchaseOrderService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a draft order
    pub async fn create_order(
        &self,
        created_by: Uuid,
        input: CreateOrderInput,
    ) -> AppResult<PurchaseOrder> {
        input.validate()?;
        validate_note(input.note.as_deref()).map_err(|m| AppError::invalid_field("note", m))?;

        let item_ids: Vec<Uuid> = input.items.iter().map(|i| i.item_id).collect();
        validate_unique_items(&item_ids).map_err(|m| AppError::invalid_field("items", m))?;
        for item in &input.items {
            validate_ordered_quantity(item.quantity)?;
        }
        let quantities: Vec<i32> = input.items.iter().map(|i| i.quantity).collect();

        let mut tx = self.db.begin().await?;

        ensure_items_exist(&mut tx, &item_ids).await?;

        let order_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO purchase_orders (status, delivery_location_id, note, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(OrderStatus::Draft.as_str())
        .bind(input.delivery_location_id)
        .bind(input.note.as_deref())
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO purchase_order_items (order_id, item_id, ordered_quantity)
            SELECT $1, u.item_id, u.quantity
            FROM UNNEST($2::UUID[], $3::INTEGER[]) AS u(item_id, quantity)
            "#,
        )
        .bind(order_id)
        .bind(&item_ids)
        .bind(&quantities)
        .execute(&mut *tx)
        .await?;

        let order = lock_order(&mut tx, order_id).await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            created_by = %created_by,
            items = order.items.len(),
            "Purchase order created"
        );

        Ok(order)
    }

    /// DRAFT -> ORDERED
    pub async fn confirm_order(&self, order_id: Uuid) -> AppResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;

        let order = lock_order(&mut tx, order_id).await?;
        order.status.ensure_confirmable()?;
        if order.items.is_empty() {
            return Err(AppError::InvalidStateTransition(
                "An order without items cannot be confirmed".to_string(),
            ));
        }

        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $1, ordered_at = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(OrderStatus::Ordered.as_str())
        .bind(order.id)
        .execute(&mut *tx)
        .await?;

        let order = lock_order(&mut tx, order.id).await?;

        tx.commit().await?;

        tracing::info!(order_id = %order.id, "Purchase order confirmed");

        Ok(order)
    }

    /// Add an item line to a draft order
    pub async fn add_order_item(
        &self,
        order_id: Uuid,
        input: OrderItemInput,
    ) -> AppResult<PurchaseOrder> {
        input.validate()?;
        validate_ordered_quantity(input.quantity)?;

        let mut tx = self.db.begin().await?;

        let order = lock_order(&mut tx, order_id).await?;
        order.status.ensure_editable()?;
        if order.items.iter().any(|item| item.item_id == input.item_id) {
            return Err(AppError::DuplicateEntry("item".to_string()));
        }
        ensure_items_exist(&mut tx, &[input.item_id]).await?;

        sqlx::query(
            "INSERT INTO purchase_order_items (order_id, item_id, ordered_quantity) VALUES ($1, $2, $3)",
        )
        .bind(order.id)
        .bind(input.item_id)
        .bind(input.quantity)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE purchase_orders SET updated_at = NOW() WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        let order = lock_order(&mut tx, order.id).await?;

        tx.commit().await?;

        Ok(order)
    }

    /// Change the ordered quantity of a draft line
    pub async fn update_order_item_quantity(
        &self,
        order_item_id: Uuid,
        input: QuantityInput,
    ) -> AppResult<PurchaseOrder> {
        input.validate()?;
        validate_ordered_quantity(input.quantity)?;

        let mut tx = self.db.begin().await?;

        let (order, item) = lock_order_for_item(&mut tx, order_item_id).await?;
        order.status.ensure_editable()?;

        sqlx::query("UPDATE purchase_order_items SET ordered_quantity = $1 WHERE id = $2")
            .bind(input.quantity)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE purchase_orders SET updated_at = NOW() WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        let order = lock_order(&mut tx, order.id).await?;

        tx.commit().await?;

        Ok(order)
    }

    /// Remove a line from a draft order
    pub async fn remove_order_item(&self, order_item_id: Uuid) -> AppResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;

        let (order, item) = lock_order_for_item(&mut tx, order_item_id).await?;
        order.status.ensure_editable()?;

        sqlx::query("DELETE FROM purchase_order_items WHERE id = $1")
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE purchase_orders SET updated_at = NOW() WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        let order = lock_order(&mut tx, order.id).await?;

        tx.commit().await?;

        Ok(order)
    }

    /// Receive goods against one order line
    pub async fn receive_item(
        &self,
        order_item_id: Uuid,
        received_by: Uuid,
        input: QuantityInput,
    ) -> AppResult<ReceiptResult> {
        input.validate()?;

        let mut tx = self.db.begin().await?;

        let (order, line) = lock_order_for_item(&mut tx, order_item_id).await?;
        order.status.ensure_receivable()?;
        let new_received = apply_receipt(line.ordered_quantity, line.received_quantity, input.quantity)?;

        ledger::lock_item(&mut tx, line.item_id).await?;
        ledger::ensure_no_active_count(&mut tx).await?;

        sqlx::query("UPDATE purchase_order_items SET received_quantity = $1 WHERE id = $2")
            .bind(new_received)
            .bind(line.id)
            .execute(&mut *tx)
            .await?;

        let receipt: OrderReceipt = sqlx::query_as::<_, ReceiptRow>(&format!(
            r#"
            INSERT INTO purchase_order_receipts (order_item_id, quantity, received_by)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            RECEIPT_COLUMNS
        ))
        .bind(line.id)
        .bind(input.quantity)
        .bind(received_by)
        .fetch_one(&mut *tx)
        .await?
        .into();

        let movement = StockMovement::new(
            line.item_id,
            input.quantity,
            StockCategory::OrderReceipt,
            format!("Purchase order receipt ({})", line.code),
        )
        .with_reference(AuditReference::purchase_order(order.id));
        let stock_after = ledger::apply_delta(&mut tx, &movement, Some(received_by)).await?;

        let order = refresh_order_status(&mut tx, order.id).await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            item_id = %line.item_id,
            quantity = input.quantity,
            stock_after,
            status = order.status.as_str(),
            "Order item received"
        );

        Ok(ReceiptResult { order, receipt, stock_after })
    }

    /// Reverse the most recent receipt of an order line
    pub async fn cancel_receipt(
        &self,
        order_item_id: Uuid,
        cancelled_by: Uuid,
    ) -> AppResult<ReceiptResult> {
        let mut tx = self.db.begin().await?;

        let (order, line) = lock_order_for_item(&mut tx, order_item_id).await?;
        order.status.ensure_receipt_reversible()?;
        line.ensure_receipt_cancellable()?;

        let receipt = sqlx::query_as::<_, ReceiptRow>(&format!(
            r#"
            SELECT {} FROM purchase_order_receipts
            WHERE order_item_id = $1 AND reversed_at IS NULL
            ORDER BY received_at DESC, id DESC
            LIMIT 1
            FOR UPDATE
            "#,
            RECEIPT_COLUMNS
        ))
        .bind(line.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::InvalidStateTransition("No receipt left to cancel".to_string())
        })?;

        let stock = ledger::lock_item(&mut tx, line.item_id).await?;
        ledger::ensure_no_active_count(&mut tx).await?;
        ensure_non_negative(stock.item_id, &stock.code, stock.stock, -receipt.quantity)?;

        let receipt: OrderReceipt = sqlx::query_as::<_, ReceiptRow>(&format!(
            r#"
            UPDATE purchase_order_receipts
            SET reversed_at = NOW(), reversed_by = $1
            WHERE id = $2
            RETURNING {}
            "#,
            RECEIPT_COLUMNS
        ))
        .bind(cancelled_by)
        .bind(receipt.id)
        .fetch_one(&mut *tx)
        .await?
        .into();

        sqlx::query(
            "UPDATE purchase_order_items SET received_quantity = received_quantity - $1 WHERE id = $2",
        )
        .bind(receipt.quantity)
        .bind(line.id)
        .execute(&mut *tx)
        .await?;

        let movement = StockMovement::new(
            line.item_id,
            -receipt.quantity,
            StockCategory::ReceiptCancellation,
            format!("Receipt cancelled ({})", line.code),
        )
        .with_reference(AuditReference::purchase_order(order.id));
        let stock_after = ledger::apply_delta(&mut tx, &movement, Some(cancelled_by)).await?;

        sqlx::query("UPDATE purchase_orders SET updated_at = NOW() WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        let order = lock_order(&mut tx, order.id).await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            receipt_id = %receipt.id,
            quantity = receipt.quantity,
            stock_after,
            status = order.status.as_str(),
            "Order receipt cancelled"
        );

        Ok(ReceiptResult { order, receipt, stock_after })
    }

    /// Cancel an order that is not yet fully received; stock is untouched
    pub async fn cancel_order(&self, order_id: Uuid) -> AppResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;

        let order = lock_order(&mut tx, order_id).await?;
        order.status.ensure_cancellable()?;

        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $1, cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(OrderStatus::Cancelled.as_str())
        .bind(order.id)
        .execute(&mut *tx)
        .await?;

        let order = lock_order(&mut tx, order.id).await?;

        tx.commit().await?;

        tracing::info!(order_id = %order.id, "Purchase order cancelled");

        Ok(order)
    }

    /// Get an order with its items
    pub async fn get_order(&self, order_id: Uuid) -> AppResult<PurchaseOrder> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM purchase_orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

        let mut conn = self.db.acquire().await?;
        let items = fetch_order_items(&mut conn, order_id).await?;
        row.into_order(items)
    }

    /// List orders newest first, optionally by status
    pub async fn list_orders(
        &self,
        query: ListOrdersQuery,
    ) -> AppResult<PaginatedResponse<PurchaseOrder>> {
        let defaults = Pagination::default();
        let pagination = Pagination {
            page: query.page.unwrap_or(defaults.page),
            per_page: query.per_page.unwrap_or(defaults.per_page),
        };
        let status = query.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM purchase_orders WHERE ($1::VARCHAR IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {} FROM purchase_orders
            WHERE ($1::VARCHAR IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
            ORDER_COLUMNS
        ))
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let mut conn = self.db.acquire().await?;
        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            let items = fetch_order_items(&mut conn, row.id).await?;
            data.push(row.into_order(items)?);
        }

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }
}
