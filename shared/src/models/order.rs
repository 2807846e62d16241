//! Purchase order models and lifecycle rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::add_quantity;
use crate::error::{CoreError, CoreResult};
use crate::validation::MAX_QUANTITY;

/// Purchase order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Ordered,
    Partial,
    Received,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Ordered => "ordered",
            OrderStatus::Partial => "partial",
            OrderStatus::Received => "received",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    fn reject(&self, action: &str) -> CoreError {
        CoreError::invalid_state(format!("Cannot {} an order that is {}", action, self.as_str()))
    }

    pub fn ensure_editable(&self) -> CoreResult<()> {
        match self {
            OrderStatus::Draft => Ok(()),
            _ => Err(self.reject("change items of")),
        }
    }

    pub fn ensure_confirmable(&self) -> CoreResult<()> {
        match self {
            OrderStatus::Draft => Ok(()),
            _ => Err(self.reject("confirm")),
        }
    }

    pub fn ensure_receivable(&self) -> CoreResult<()> {
        match self {
            OrderStatus::Ordered | OrderStatus::Partial => Ok(()),
            _ => Err(self.reject("receive items on")),
        }
    }

    /// Receipts can only be reversed while the order is still receiving
    pub fn ensure_receipt_reversible(&self) -> CoreResult<()> {
        match self {
            OrderStatus::Ordered | OrderStatus::Partial => Ok(()),
            _ => Err(self.reject("cancel a receipt on")),
        }
    }

    pub fn ensure_cancellable(&self) -> CoreResult<()> {
        match self {
            OrderStatus::Draft | OrderStatus::Ordered | OrderStatus::Partial => Ok(()),
            _ => Err(self.reject("cancel")),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(OrderStatus::Draft),
            "ordered" => Ok(OrderStatus::Ordered),
            "partial" => Ok(OrderStatus::Partial),
            "received" => Ok(OrderStatus::Received),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(CoreError::validation(
                "status",
                format!("Unknown order status: {}", other),
            )),
        }
    }
}

/// A purchase order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub status: OrderStatus,
    pub delivery_location_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ordered_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
}

/// One item line of a purchase order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub item_id: Uuid,
    pub code: String,
    pub name: String,
    pub ordered_quantity: i32,
    pub received_quantity: i32,
    pub is_received: bool,
}

impl OrderItem {
    /// Only a line marked received has a receipt to cancel
    pub fn ensure_receipt_cancellable(&self) -> CoreResult<()> {
        if !self.is_received {
            return Err(CoreError::invalid_state(format!(
                "Cannot cancel a receipt on {}: the item is not marked received",
                self.code
            )));
        }
        Ok(())
    }
}

/// A single receiving event, kept so it can be reversed exactly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub quantity: i32,
    pub received_by: Uuid,
    pub received_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
}

pub fn is_item_received(ordered_quantity: i32, received_quantity: i32) -> bool {
    received_quantity >= ordered_quantity
}

/// Status of a confirmed order after a receiving event, from its
/// `(ordered, received)` quantities
pub fn derive_order_status(quantities: &[(i32, i32)]) -> OrderStatus {
    if quantities.is_empty() {
        return OrderStatus::Ordered;
    }
    if quantities
        .iter()
        .all(|(ordered, received)| is_item_received(*ordered, *received))
    {
        OrderStatus::Received
    } else if quantities.iter().any(|(_, received)| *received > 0) {
        OrderStatus::Partial
    } else {
        OrderStatus::Ordered
    }
}

/// Validate a receipt and return the new received quantity
pub fn apply_receipt(ordered_quantity: i32, received_quantity: i32, quantity: i32) -> CoreResult<i32> {
    if quantity <= 0 {
        return Err(CoreError::validation("quantity", "Received quantity must be positive"));
    }
    if quantity > MAX_QUANTITY {
        return Err(CoreError::validation(
            "quantity",
            format!("Quantity cannot exceed {}", MAX_QUANTITY),
        ));
    }
    let new_received = add_quantity(received_quantity, quantity)?;
    if new_received > ordered_quantity {
        return Err(CoreError::validation(
            "quantity",
            format!(
                "Receiving {} would exceed the ordered quantity ({} of {} already received)",
                quantity, received_quantity, ordered_quantity
            ),
        ));
    }
    Ok(new_received)
}

/// Ordered quantities must be positive
pub fn validate_ordered_quantity(quantity: i32) -> CoreResult<()> {
    if quantity <= 0 {
        return Err(CoreError::validation("quantity", "Ordered quantity must be positive"));
    }
    if quantity > MAX_QUANTITY {
        return Err(CoreError::validation(
            "quantity",
            format!("Ordered quantity cannot exceed {}", MAX_QUANTITY),
        ));
    }
    Ok(())
}
