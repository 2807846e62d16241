//! Checkout and return transaction models
//!
//! A transaction is a point-in-time snapshot of what was taken out (or
//! brought back). The planning functions here turn a request plus the locked
//! stock of the affected items into the exact line snapshot and the stock
//! movements to apply. They never touch storage, so a failed plan means
//! nothing was changed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use uuid::Uuid;

use super::{add_quantity, AuditReference, StockCategory, StockMovement, StockSnapshot};
use crate::error::{CoreError, CoreResult};
use crate::validation::MAX_QUANTITY;

/// One line of a transaction snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineItem {
    Catalog(CatalogLine),
    Manual(ManualLine),
}

/// Line tied to a catalog item; moves stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogLine {
    pub item_id: Uuid,
    pub code: String,
    pub name: String,
    pub unit_price: Decimal,
    /// Positive for checkout, negative for return
    pub quantity: i32,
}

/// Off-catalog line; never checks or moves stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualLine {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl LineItem {
    pub fn quantity(&self) -> i32 {
        match self {
            LineItem::Catalog(line) => line.quantity,
            LineItem::Manual(line) => line.quantity,
        }
    }

    pub fn unit_price(&self) -> Decimal {
        match self {
            LineItem::Catalog(line) => line.unit_price,
            LineItem::Manual(line) => line.unit_price,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.unit_price() * Decimal::from(self.quantity())
    }
}

/// Kind of transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Checkout,
    Return,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Checkout => "checkout",
            TransactionKind::Return => "return",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkout" => Ok(TransactionKind::Checkout),
            "return" => Ok(TransactionKind::Return),
            other => Err(CoreError::validation(
                "kind",
                format!("Unknown transaction kind: {}", other),
            )),
        }
    }
}

/// A checkout or return record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    /// Vendor or user the goods were handed to
    pub actor_id: Uuid,
    /// User who entered the record
    pub recorded_by: Uuid,
    /// Set on return records
    pub original_transaction_id: Option<Uuid>,
    pub lines: Vec<LineItem>,
    pub total_amount: Decimal,
    /// Entered by an administrator on behalf of the actor
    pub is_proxy: bool,
    pub has_returns: bool,
    pub is_edited: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line as submitted by the checkout or correction screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineRequest {
    Catalog {
        item_id: Uuid,
        quantity: i32,
        /// Overrides the catalog price when present
        unit_price: Option<Decimal>,
    },
    Manual {
        name: String,
        unit_price: Decimal,
        quantity: i32,
    },
}

impl LineRequest {
    pub fn catalog_item_id(&self) -> Option<Uuid> {
        match self {
            LineRequest::Catalog { item_id, .. } => Some(*item_id),
            LineRequest::Manual { .. } => None,
        }
    }
}

/// Quantity to bring back for one item of an earlier checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub item_id: Uuid,
    pub quantity: i32,
}

/// Return bookkeeping for one catalog item of a checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnableLine {
    pub item_id: Uuid,
    pub code: String,
    pub name: String,
    pub unit_price: Decimal,
    pub purchased: i32,
    pub returned: i32,
    pub remaining: i32,
}

/// Resolved snapshot plus the movements that realise it
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPlan {
    pub lines: Vec<LineItem>,
    pub movements: Vec<StockMovement>,
    pub total_amount: Decimal,
}

/// Resolved correction; `changed` is false when the new lines equal the old
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionPlan {
    pub lines: Vec<LineItem>,
    pub movements: Vec<StockMovement>,
    pub total_amount: Decimal,
    pub changed: bool,
}

/// Sum of line amounts
pub fn transaction_total(lines: &[LineItem]) -> Decimal {
    lines.iter().map(LineItem::amount).sum()
}

/// Net catalog quantity per item
pub fn catalog_quantities(lines: &[LineItem]) -> CoreResult<BTreeMap<Uuid, i32>> {
    let mut quantities = BTreeMap::new();
    for line in lines {
        if let LineItem::Catalog(line) = line {
            let total = quantities.entry(line.item_id).or_insert(0);
            *total = add_quantity(*total, line.quantity)?;
        }
    }
    Ok(quantities)
}

fn find_catalog_line(lines: &[LineItem], item_id: Uuid) -> Option<&CatalogLine> {
    lines.iter().find_map(|line| match line {
        LineItem::Catalog(line) if line.item_id == item_id => Some(line),
        _ => None,
    })
}

fn validate_line_quantity(quantity: i32) -> CoreResult<()> {
    if quantity <= 0 {
        return Err(CoreError::validation("quantity", "Quantity must be positive"));
    }
    if quantity > MAX_QUANTITY {
        return Err(CoreError::validation(
            "quantity",
            format!("Quantity cannot exceed {}", MAX_QUANTITY),
        ));
    }
    Ok(())
}

fn validate_line_requests(requests: &[LineRequest]) -> CoreResult<()> {
    if requests.is_empty() {
        return Err(CoreError::validation("lines", "At least one line is required"));
    }
    for request in requests {
        match request {
            LineRequest::Catalog { quantity, unit_price, .. } => {
                validate_line_quantity(*quantity)?;
                if unit_price.map_or(false, |p| p < Decimal::ZERO) {
                    return Err(CoreError::validation("unit_price", "Price cannot be negative"));
                }
            }
            LineRequest::Manual { name, unit_price, quantity } => {
                if name.trim().is_empty() {
                    return Err(CoreError::validation("name", "Manual line needs a name"));
                }
                validate_line_quantity(*quantity)?;
                if *unit_price < Decimal::ZERO {
                    return Err(CoreError::validation("unit_price", "Price cannot be negative"));
                }
            }
        }
    }
    Ok(())
}

fn snapshot_for(stock: &HashMap<Uuid, StockSnapshot>, item_id: Uuid) -> CoreResult<&StockSnapshot> {
    stock.get(&item_id).ok_or_else(|| CoreError::not_found("Item"))
}

/// Plan a checkout.
///
/// Catalog quantities are summed per item before comparing with stock, so two
/// lines for the same item cannot together exceed what is on the shelf. Each
/// catalog line yields its own movement.
pub fn plan_checkout(
    transaction_id: Uuid,
    requests: &[LineRequest],
    stock: &HashMap<Uuid, StockSnapshot>,
) -> CoreResult<TransactionPlan> {
    validate_line_requests(requests)?;

    let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
    for request in requests {
        if let LineRequest::Catalog { item_id, quantity, .. } = request {
            let total = requested.entry(*item_id).or_insert(0);
            *total = add_quantity(*total, *quantity)?;
        }
    }
    for (item_id, quantity) in &requested {
        let snapshot = snapshot_for(stock, *item_id)?;
        if *quantity > snapshot.stock {
            return Err(CoreError::InsufficientStock {
                item_id: *item_id,
                code: snapshot.code.clone(),
                requested: *quantity,
                available: snapshot.stock,
            });
        }
    }

    let reference = AuditReference::transaction(transaction_id);
    let mut lines = Vec::with_capacity(requests.len());
    let mut movements = Vec::new();
    for request in requests {
        match request {
            LineRequest::Catalog { item_id, quantity, unit_price } => {
                let snapshot = snapshot_for(stock, *item_id)?;
                lines.push(LineItem::Catalog(CatalogLine {
                    item_id: *item_id,
                    code: snapshot.code.clone(),
                    name: snapshot.name.clone(),
                    unit_price: unit_price.unwrap_or(snapshot.unit_price),
                    quantity: *quantity,
                }));
                movements.push(
                    StockMovement::new(*item_id, -quantity, StockCategory::Checkout, "Checkout")
                        .with_reference(reference),
                );
            }
            LineRequest::Manual { name, unit_price, quantity } => {
                lines.push(LineItem::Manual(ManualLine {
                    name: name.trim().to_string(),
                    unit_price: *unit_price,
                    quantity: *quantity,
                }));
            }
        }
    }

    let total_amount = transaction_total(&lines);
    Ok(TransactionPlan { lines, movements, total_amount })
}

/// Purchased, returned and remaining quantities per catalog item
pub fn returnable_lines(
    original: &Transaction,
    returned: &HashMap<Uuid, i32>,
) -> CoreResult<Vec<ReturnableLine>> {
    Ok(catalog_quantities(&original.lines)?
        .into_iter()
        .filter_map(|(item_id, purchased)| {
            let line = find_catalog_line(&original.lines, item_id)?;
            let returned = returned.get(&item_id).copied().unwrap_or(0);
            Some(ReturnableLine {
                item_id,
                code: line.code.clone(),
                name: line.name.clone(),
                unit_price: line.unit_price,
                purchased,
                returned,
                remaining: purchased.saturating_sub(returned).max(0),
            })
        })
        .collect())
}

/// Plan a return against an earlier checkout.
///
/// `returned` holds what has already come back per item for this checkout.
/// The movements reference the original transaction so later returns can be
/// reconciled from the audit log.
pub fn plan_return(
    original: &Transaction,
    returned: &HashMap<Uuid, i32>,
    requests: &[ReturnRequest],
    reason: &str,
) -> CoreResult<TransactionPlan> {
    if original.kind != TransactionKind::Checkout {
        return Err(CoreError::invalid_state("Only checkout transactions can be returned"));
    }
    if requests.is_empty() {
        return Err(CoreError::validation("lines", "At least one return line is required"));
    }

    let mut wanted: BTreeMap<Uuid, i32> = BTreeMap::new();
    for request in requests {
        if request.quantity <= 0 {
            return Err(CoreError::validation("quantity", "Return quantity must be positive"));
        }
        if request.quantity > MAX_QUANTITY {
            return Err(CoreError::validation(
                "quantity",
                format!("Return quantity cannot exceed {}", MAX_QUANTITY),
            ));
        }
        let total = wanted.entry(request.item_id).or_insert(0);
        *total = add_quantity(*total, request.quantity)?;
    }

    let bookkeeping: HashMap<Uuid, ReturnableLine> = returnable_lines(original, returned)?
        .into_iter()
        .map(|line| (line.item_id, line))
        .collect();

    let reference = AuditReference::transaction(original.id);
    let mut lines = Vec::with_capacity(wanted.len());
    let mut movements = Vec::with_capacity(wanted.len());
    for (item_id, quantity) in wanted {
        let line = bookkeeping.get(&item_id).ok_or_else(|| {
            CoreError::validation("item_id", "Item was not part of this transaction")
        })?;
        if quantity > line.remaining {
            return Err(CoreError::validation(
                "quantity",
                format!(
                    "Cannot return {} of {}: {} purchased, {} already returned",
                    quantity, line.code, line.purchased, line.returned
                ),
            ));
        }
        lines.push(LineItem::Catalog(CatalogLine {
            item_id,
            code: line.code.clone(),
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: -quantity,
        }));
        movements.push(
            StockMovement::new(item_id, quantity, StockCategory::Return, reason)
                .with_reference(reference),
        );
    }

    let total_amount = transaction_total(&lines);
    Ok(TransactionPlan { lines, movements, total_amount })
}

/// Plan a correction of a checkout's lines.
///
/// Only the difference between old and new catalog quantities moves stock.
/// Re-submitting the current lines yields an unchanged plan with no movements.
pub fn plan_correction(
    original: &Transaction,
    requests: &[LineRequest],
    stock: &HashMap<Uuid, StockSnapshot>,
    returned: &HashMap<Uuid, i32>,
    reason: &str,
) -> CoreResult<CorrectionPlan> {
    if original.kind != TransactionKind::Checkout {
        return Err(CoreError::invalid_state("Only checkout transactions can be corrected"));
    }
    validate_line_requests(requests)?;

    let mut lines = Vec::with_capacity(requests.len());
    for request in requests {
        match request {
            LineRequest::Catalog { item_id, quantity, unit_price } => {
                let (code, name, default_price) = match find_catalog_line(&original.lines, *item_id) {
                    Some(line) => (line.code.clone(), line.name.clone(), line.unit_price),
                    None => {
                        let snapshot = snapshot_for(stock, *item_id)?;
                        (snapshot.code.clone(), snapshot.name.clone(), snapshot.unit_price)
                    }
                };
                lines.push(LineItem::Catalog(CatalogLine {
                    item_id: *item_id,
                    code,
                    name,
                    unit_price: unit_price.unwrap_or(default_price),
                    quantity: *quantity,
                }));
            }
            LineRequest::Manual { name, unit_price, quantity } => {
                lines.push(LineItem::Manual(ManualLine {
                    name: name.trim().to_string(),
                    unit_price: *unit_price,
                    quantity: *quantity,
                }));
            }
        }
    }

    let total_amount = transaction_total(&lines);
    if lines == original.lines {
        return Ok(CorrectionPlan {
            lines,
            movements: Vec::new(),
            total_amount,
            changed: false,
        });
    }

    let old_quantities = catalog_quantities(&original.lines)?;
    let new_quantities = catalog_quantities(&lines)?;
    let mut item_ids: Vec<Uuid> = old_quantities.keys().chain(new_quantities.keys()).copied().collect();
    item_ids.sort();
    item_ids.dedup();

    let reference = AuditReference::transaction(original.id);
    let mut movements = Vec::new();
    for item_id in item_ids {
        let old_qty = old_quantities.get(&item_id).copied().unwrap_or(0);
        let new_qty = new_quantities.get(&item_id).copied().unwrap_or(0);
        let already_returned = returned.get(&item_id).copied().unwrap_or(0);
        if new_qty < already_returned {
            return Err(CoreError::validation(
                "quantity",
                format!("Quantity cannot drop below the {} already returned", already_returned),
            ));
        }
        let increase = new_qty - old_qty;
        if increase == 0 {
            continue;
        }
        let snapshot = snapshot_for(stock, item_id)?;
        if increase > snapshot.stock {
            return Err(CoreError::InsufficientStock {
                item_id,
                code: snapshot.code.clone(),
                requested: increase,
                available: snapshot.stock,
            });
        }
        movements.push(
            StockMovement::new(
                item_id,
                -increase,
                StockCategory::TransactionCorrection,
                format!("Corrected quantity {} -> {}: {}", old_qty, new_qty, reason),
            )
            .with_reference(reference),
        );
    }

    Ok(CorrectionPlan {
        lines,
        movements,
        total_amount,
        changed: true,
    })
}
