//! Stock audit log models
//!
//! Every change to an item's stock is described by a [`StockMovement`] and
//! persisted as exactly one [`AuditEntry`]. Entries are never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::validation::MAX_QUANTITY;

/// Category tag of a stock change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockCategory {
    Checkout,
    Return,
    TransactionCorrection,
    Inbound,
    Outbound,
    Disposal,
    ManualCorrection,
    CountAdjustment,
    OrderReceipt,
    ReceiptCancellation,
}

/// Which way a category is allowed to move stock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDirection {
    Increase,
    Decrease,
    Either,
}

impl StockCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockCategory::Checkout => "checkout",
            StockCategory::Return => "return",
            StockCategory::TransactionCorrection => "transaction_correction",
            StockCategory::Inbound => "inbound",
            StockCategory::Outbound => "outbound",
            StockCategory::Disposal => "disposal",
            StockCategory::ManualCorrection => "manual_correction",
            StockCategory::CountAdjustment => "count_adjustment",
            StockCategory::OrderReceipt => "order_receipt",
            StockCategory::ReceiptCancellation => "receipt_cancellation",
        }
    }

    pub fn direction(&self) -> StockDirection {
        match self {
            StockCategory::Return | StockCategory::Inbound | StockCategory::OrderReceipt => {
                StockDirection::Increase
            }
            StockCategory::Checkout
            | StockCategory::Outbound
            | StockCategory::Disposal
            | StockCategory::ReceiptCancellation => StockDirection::Decrease,
            StockCategory::TransactionCorrection
            | StockCategory::ManualCorrection
            | StockCategory::CountAdjustment => StockDirection::Either,
        }
    }

    /// Check that a signed delta agrees with this category's direction
    pub fn check_delta(&self, delta: i32) -> CoreResult<()> {
        if delta == 0 {
            return Err(CoreError::validation("quantity", "Stock delta cannot be zero"));
        }
        let ok = match self.direction() {
            StockDirection::Increase => delta > 0,
            StockDirection::Decrease => delta < 0,
            StockDirection::Either => true,
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::validation(
                "quantity",
                format!("Delta {} has the wrong sign for category {}", delta, self),
            ))
        }
    }
}

impl FromStr for StockCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkout" => Ok(StockCategory::Checkout),
            "return" => Ok(StockCategory::Return),
            "transaction_correction" => Ok(StockCategory::TransactionCorrection),
            "inbound" => Ok(StockCategory::Inbound),
            "outbound" => Ok(StockCategory::Outbound),
            "disposal" => Ok(StockCategory::Disposal),
            "manual_correction" => Ok(StockCategory::ManualCorrection),
            "count_adjustment" => Ok(StockCategory::CountAdjustment),
            "order_receipt" => Ok(StockCategory::OrderReceipt),
            "receipt_cancellation" => Ok(StockCategory::ReceiptCancellation),
            other => Err(CoreError::validation(
                "category",
                format!("Unknown stock category: {}", other),
            )),
        }
    }
}

impl std::fmt::Display for StockCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a stock change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Transaction,
    InventoryCount,
    PurchaseOrder,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Transaction => "transaction",
            ReferenceKind::InventoryCount => "inventory_count",
            ReferenceKind::PurchaseOrder => "purchase_order",
        }
    }
}

impl FromStr for ReferenceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction" => Ok(ReferenceKind::Transaction),
            "inventory_count" => Ok(ReferenceKind::InventoryCount),
            "purchase_order" => Ok(ReferenceKind::PurchaseOrder),
            other => Err(CoreError::validation(
                "reference_kind",
                format!("Unknown reference kind: {}", other),
            )),
        }
    }
}

/// Link from an audit entry back to the record that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl AuditReference {
    pub fn transaction(id: Uuid) -> Self {
        Self { kind: ReferenceKind::Transaction, id }
    }

    pub fn inventory_count(id: Uuid) -> Self {
        Self { kind: ReferenceKind::InventoryCount, id }
    }

    pub fn purchase_order(id: Uuid) -> Self {
        Self { kind: ReferenceKind::PurchaseOrder, id }
    }
}

/// A requested stock change, applied by the ledger together with its audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub item_id: Uuid,
    pub delta: i32,
    pub category: StockCategory,
    pub reason: String,
    pub reference: Option<AuditReference>,
}

impl StockMovement {
    pub fn new(item_id: Uuid, delta: i32, category: StockCategory, reason: impl Into<String>) -> Self {
        Self {
            item_id,
            delta,
            category,
            reason: reason.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: AuditReference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// A persisted, immutable record of one stock change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub item_id: Uuid,
    pub quantity_delta: i32,
    pub stock_after: i32,
    pub category: StockCategory,
    pub reason: String,
    pub reference: Option<AuditReference>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Categories an administrator may use for a direct stock adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualAdjustmentKind {
    /// Goods brought in outside a purchase order
    Inbound,
    /// Goods taken out outside a checkout
    Outbound,
    /// Damaged or lost goods written off
    Disposal,
    /// Signed fix-up of a known miscount
    Correction,
}

impl ManualAdjustmentKind {
    pub fn category(&self) -> StockCategory {
        match self {
            ManualAdjustmentKind::Inbound => StockCategory::Inbound,
            ManualAdjustmentKind::Outbound => StockCategory::Outbound,
            ManualAdjustmentKind::Disposal => StockCategory::Disposal,
            ManualAdjustmentKind::Correction => StockCategory::ManualCorrection,
        }
    }

    /// Turn the entered quantity into a signed stock delta.
    ///
    /// Inbound, outbound and disposal take a positive magnitude and the kind
    /// decides the sign. Correction takes the signed delta as entered.
    pub fn signed_delta(&self, quantity: i32) -> CoreResult<i32> {
        match self {
            _ if quantity.unsigned_abs() > MAX_QUANTITY.unsigned_abs() => Err(CoreError::validation(
                "quantity",
                format!("Quantity cannot exceed {}", MAX_QUANTITY),
            )),
            ManualAdjustmentKind::Correction => {
                if quantity == 0 {
                    Err(CoreError::validation("quantity", "Correction quantity cannot be zero"))
                } else {
                    Ok(quantity)
                }
            }
            _ if quantity <= 0 => Err(CoreError::validation(
                "quantity",
                "Quantity must be positive; the category sets the direction",
            )),
            ManualAdjustmentKind::Inbound => Ok(quantity),
            ManualAdjustmentKind::Outbound | ManualAdjustmentKind::Disposal => Ok(-quantity),
        }
    }
}

/// Reject decrements that would take stock below zero
pub fn ensure_non_negative(
    item_id: Uuid,
    code: &str,
    current_stock: i32,
    delta: i32,
) -> CoreResult<()> {
    if delta >= 0 {
        return Ok(());
    }
    if current_stock.checked_add(delta).map_or(true, |after| after < 0) {
        return Err(CoreError::InsufficientStock {
            item_id,
            code: code.to_string(),
            requested: delta.saturating_neg(),
            available: current_stock,
        });
    }
    Ok(())
}

/// Add quantities, rejecting totals that do not fit in an `i32`
pub fn add_quantity(total: i32, quantity: i32) -> CoreResult<i32> {
    total
        .checked_add(quantity)
        .ok_or_else(|| CoreError::validation("quantity", "Quantity total is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_str() {
        let all = [
            StockCategory::Checkout,
            StockCategory::Return,
            StockCategory::TransactionCorrection,
            StockCategory::Inbound,
            StockCategory::Outbound,
            StockCategory::Disposal,
            StockCategory::ManualCorrection,
            StockCategory::CountAdjustment,
            StockCategory::OrderReceipt,
            StockCategory::ReceiptCancellation,
        ];
        for category in all {
            assert_eq!(category.as_str().parse::<StockCategory>().unwrap(), category);
        }
        assert!("restock".parse::<StockCategory>().is_err());
    }

    #[test]
    fn test_check_delta_enforces_direction() {
        assert!(StockCategory::Checkout.check_delta(-3).is_ok());
        assert!(StockCategory::Checkout.check_delta(3).is_err());
        assert!(StockCategory::OrderReceipt.check_delta(5).is_ok());
        assert!(StockCategory::OrderReceipt.check_delta(-5).is_err());
        assert!(StockCategory::CountAdjustment.check_delta(-2).is_ok());
        assert!(StockCategory::CountAdjustment.check_delta(2).is_ok());
        assert!(StockCategory::CountAdjustment.check_delta(0).is_err());
    }

    #[test]
    fn test_manual_outbound_and_disposal_decrement() {
        assert_eq!(ManualAdjustmentKind::Outbound.signed_delta(4), Ok(-4));
        assert_eq!(ManualAdjustmentKind::Disposal.signed_delta(1), Ok(-1));
        assert_eq!(ManualAdjustmentKind::Inbound.signed_delta(4), Ok(4));
    }

    #[test]
    fn test_manual_directional_kinds_reject_signed_input() {
        assert!(ManualAdjustmentKind::Outbound.signed_delta(-4).is_err());
        assert!(ManualAdjustmentKind::Disposal.signed_delta(0).is_err());
        assert!(ManualAdjustmentKind::Inbound.signed_delta(-1).is_err());
    }

    #[test]
    fn test_manual_correction_keeps_sign() {
        assert_eq!(ManualAdjustmentKind::Correction.signed_delta(-2), Ok(-2));
        assert_eq!(ManualAdjustmentKind::Correction.signed_delta(7), Ok(7));
        assert!(ManualAdjustmentKind::Correction.signed_delta(0).is_err());
    }

    #[test]
    fn test_manual_kind_maps_to_category_with_matching_direction() {
        for kind in [
            ManualAdjustmentKind::Inbound,
            ManualAdjustmentKind::Outbound,
            ManualAdjustmentKind::Disposal,
        ] {
            let delta = kind.signed_delta(3).unwrap();
            assert!(kind.category().check_delta(delta).is_ok());
        }
    }

    #[test]
    fn test_ensure_non_negative() {
        let id = Uuid::new_v4();
        assert!(ensure_non_negative(id, "A", 5, -5).is_ok());
        assert!(ensure_non_negative(id, "A", 5, 10).is_ok());
        let err = ensure_non_negative(id, "A", 5, -6).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientStock {
                item_id: id,
                code: "A".to_string(),
                requested: 6,
                available: 5,
            }
        );
    }

    #[test]
    fn test_ensure_non_negative_at_i32_bounds() {
        let id = Uuid::new_v4();
        let err = ensure_non_negative(id, "A", 0, i32::MIN).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { requested: i32::MAX, available: 0, .. }));
        assert!(ensure_non_negative(id, "A", i32::MAX, -i32::MAX).is_ok());
    }

    #[test]
    fn test_add_quantity_overflow() {
        assert_eq!(add_quantity(3, 4), Ok(7));
        assert!(matches!(add_quantity(i32::MAX, 1), Err(CoreError::Validation { .. })));
        assert!(matches!(add_quantity(i32::MAX, 2), Err(CoreError::Validation { .. })));
    }

    #[test]
    fn test_signed_delta_rejects_oversized_quantity() {
        assert_eq!(ManualAdjustmentKind::Inbound.signed_delta(MAX_QUANTITY), Ok(MAX_QUANTITY));
        for kind in [
            ManualAdjustmentKind::Inbound,
            ManualAdjustmentKind::Outbound,
            ManualAdjustmentKind::Disposal,
            ManualAdjustmentKind::Correction,
        ] {
            assert!(matches!(kind.signed_delta(i32::MAX), Err(CoreError::Validation { .. })));
        }
        assert!(ManualAdjustmentKind::Correction.signed_delta(i32::MIN).is_err());
    }
}
