//! Catalog item models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A material or equipment unit tracked in stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    /// Unique catalog code (e.g., "PVC-VP20")
    pub code: String,
    pub name: String,
    /// Current stock. Only the stock ledger writes this field.
    pub stock: i32,
    pub min_stock: i32,
    pub unit_price: Decimal,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Stock has reached or fallen below the reorder threshold
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }

    /// Quantity needed to bring stock back up to the threshold
    pub fn shortfall(&self) -> i32 {
        (self.min_stock - self.stock).max(0)
    }
}

/// Stock-relevant view of an item, read under a row lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockSnapshot {
    pub item_id: Uuid,
    pub code: String,
    pub name: String,
    pub stock: i32,
    pub unit_price: Decimal,
}
