//! Inventory count (tanaoroshi) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{AuditReference, StockCategory, StockMovement};
use crate::error::{CoreError, CoreResult};
use crate::validation::MAX_QUANTITY;

/// Status of a count session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl CountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::InProgress => "in_progress",
            CountStatus::Completed => "completed",
            CountStatus::Cancelled => "cancelled",
        }
    }

    /// Sessions accept changes only while in progress
    pub fn ensure_open(&self) -> CoreResult<()> {
        match self {
            CountStatus::InProgress => Ok(()),
            CountStatus::Completed => {
                Err(CoreError::invalid_state("Inventory count is already completed"))
            }
            CountStatus::Cancelled => {
                Err(CoreError::invalid_state("Inventory count has been cancelled"))
            }
        }
    }
}

impl FromStr for CountStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(CountStatus::InProgress),
            "completed" => Ok(CountStatus::Completed),
            "cancelled" => Ok(CountStatus::Cancelled),
            other => Err(CoreError::validation(
                "status",
                format!("Unknown count status: {}", other),
            )),
        }
    }
}

/// A physical stock count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCountSession {
    pub id: Uuid,
    pub status: CountStatus,
    pub note: Option<String>,
    pub started_by: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Name of the person who confirmed the count; set on completion
    pub confirmed_by: Option<String>,
}

/// One item line of a count session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountItem {
    pub id: Uuid,
    pub session_id: Uuid,
    pub item_id: Uuid,
    pub code: String,
    pub name: String,
    /// Live stock when the session started
    pub expected_stock: i32,
    pub actual_stock: i32,
    pub adjustment: i32,
}

/// Session together with its lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCountDetail {
    #[serde(flatten)]
    pub session: InventoryCountSession,
    pub items: Vec<CountItem>,
}

/// History row for the count list screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCountSummary {
    #[serde(flatten)]
    pub session: InventoryCountSession,
    pub item_count: i64,
    pub adjusted_item_count: i64,
    pub net_adjustment: i64,
}

/// Adjustment is always derived from the two counts
pub fn count_adjustment(expected_stock: i32, actual_stock: i32) -> i32 {
    actual_stock - expected_stock
}

/// Counted quantities cannot be negative
pub fn validate_actual_stock(actual_stock: i32) -> CoreResult<()> {
    if actual_stock < 0 {
        return Err(CoreError::validation("actual_stock", "Counted stock cannot be negative"));
    }
    if actual_stock > MAX_QUANTITY {
        return Err(CoreError::validation(
            "actual_stock",
            format!("Counted stock cannot exceed {}", MAX_QUANTITY),
        ));
    }
    Ok(())
}

/// One count-adjustment movement per line whose count differs from the snapshot
pub fn plan_count_adjustments(session_id: Uuid, items: &[CountItem]) -> Vec<StockMovement> {
    let reference = AuditReference::inventory_count(session_id);
    items
        .iter()
        .filter_map(|item| {
            let adjustment = count_adjustment(item.expected_stock, item.actual_stock);
            (adjustment != 0).then(|| {
                StockMovement::new(
                    item.item_id,
                    adjustment,
                    StockCategory::CountAdjustment,
                    format!(
                        "Inventory count: expected {}, counted {}",
                        item.expected_stock, item.actual_stock
                    ),
                )
                .with_reference(reference)
            })
        })
        .collect()
}
