//! In-memory stand-in for the stock ledger tables.
//!
//! Applies the same plans the services apply inside a database transaction,
//! with the same all-or-nothing behaviour, so flows can be checked without
//! PostgreSQL.

#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{
    add_quantity, plan_checkout, plan_correction, plan_count_adjustments, plan_return, AuditEntry,
    CoreError, CoreResult, CorrectionPlan, CountItem, LineRequest, ReferenceKind,
    ReturnRequest, StockCategory, StockMovement, StockSnapshot, Transaction, TransactionKind,
};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    pub items: HashMap<Uuid, StockSnapshot>,
    pub audit: Vec<AuditEntry>,
    pub active_count: Option<Uuid>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, code: &str, stock: i32, unit_price: Decimal) -> Uuid {
        let item_id = Uuid::new_v4();
        self.items.insert(
            item_id,
            StockSnapshot {
                item_id,
                code: code.to_string(),
                name: format!("{} item", code),
                stock,
                unit_price,
            },
        );
        item_id
    }

    pub fn stock(&self, item_id: Uuid) -> i32 {
        self.items[&item_id].stock
    }

    pub fn entries_for(&self, item_id: Uuid) -> Vec<&AuditEntry> {
        self.audit.iter().filter(|e| e.item_id == item_id).collect()
    }

    /// Same checks and effects as `ledger::apply_delta`
    pub fn apply(&mut self, movement: &StockMovement) -> CoreResult<i32> {
        movement.category.check_delta(movement.delta)?;
        let item = self
            .items
            .get_mut(&movement.item_id)
            .ok_or_else(|| CoreError::not_found("Item"))?;
        let stock_after = add_quantity(item.stock, movement.delta)?;
        assert!(
            stock_after >= 0,
            "movement for {} would break the stock >= 0 check constraint",
            item.code
        );
        item.stock = stock_after;
        self.audit.push(AuditEntry {
            id: Uuid::new_v4(),
            item_id: movement.item_id,
            quantity_delta: movement.delta,
            stock_after,
            category: movement.category,
            reason: movement.reason.clone(),
            reference: movement.reference,
            actor_id: None,
            created_at: Utc::now(),
        });
        Ok(stock_after)
    }

    /// Apply every movement or none of them
    pub fn apply_all(&mut self, movements: &[StockMovement]) -> CoreResult<()> {
        let before = self.clone();
        for movement in movements {
            if let Err(err) = self.apply(movement) {
                *self = before;
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn ensure_no_active_count(&self) -> CoreResult<()> {
        match self.active_count {
            Some(_) => Err(CoreError::ActiveSessionConflict),
            None => Ok(()),
        }
    }

    pub fn returned_quantities(&self, transaction_id: Uuid) -> HashMap<Uuid, i32> {
        let mut returned = HashMap::new();
        for entry in &self.audit {
            let references_it = entry.reference.map_or(false, |r| {
                r.kind == ReferenceKind::Transaction && r.id == transaction_id
            });
            if references_it && entry.category == StockCategory::Return {
                *returned.entry(entry.item_id).or_insert(0) += entry.quantity_delta;
            }
        }
        returned
    }

    /// Mirrors `TransactionService::create_transaction`
    pub fn checkout(&mut self, requests: &[LineRequest]) -> CoreResult<Transaction> {
        self.ensure_no_active_count()?;
        let id = Uuid::new_v4();
        let plan = plan_checkout(id, requests, &self.items)?;
        self.apply_all(&plan.movements)?;
        let actor = Uuid::new_v4();
        Ok(Transaction {
            id,
            kind: TransactionKind::Checkout,
            actor_id: actor,
            recorded_by: actor,
            original_transaction_id: None,
            lines: plan.lines,
            total_amount: plan.total_amount,
            is_proxy: false,
            has_returns: false,
            is_edited: false,
            note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    /// Mirrors `TransactionService::return_from_history`
    pub fn return_items(
        &mut self,
        original: &mut Transaction,
        requests: &[ReturnRequest],
    ) -> CoreResult<Transaction> {
        self.ensure_no_active_count()?;
        let returned = self.returned_quantities(original.id);
        let plan = plan_return(original, &returned, requests, "Returned unused")?;
        self.apply_all(&plan.movements)?;
        original.has_returns = true;
        Ok(Transaction {
            id: Uuid::new_v4(),
            kind: TransactionKind::Return,
            original_transaction_id: Some(original.id),
            lines: plan.lines,
            total_amount: plan.total_amount,
            has_returns: false,
            ..original.clone()
        })
    }

    /// Mirrors `TransactionService::correct_transaction`
    pub fn correct(
        &mut self,
        original: &mut Transaction,
        requests: &[LineRequest],
    ) -> CoreResult<CorrectionPlan> {
        let returned = self.returned_quantities(original.id);
        let plan = plan_correction(original, requests, &self.items, &returned, "Miscounted")?;
        if !plan.changed {
            return Ok(plan);
        }
        if !plan.movements.is_empty() {
            self.ensure_no_active_count()?;
        }
        self.apply_all(&plan.movements)?;
        original.lines = plan.lines.clone();
        original.total_amount = plan.total_amount;
        original.is_edited = true;
        Ok(plan)
    }

    /// Mirrors the snapshot taken by `InventoryCountService::start`
    pub fn start_count(&mut self) -> CoreResult<(Uuid, Vec<CountItem>)> {
        self.ensure_no_active_count()?;
        let session_id = Uuid::new_v4();
        let mut items: Vec<CountItem> = self
            .items
            .values()
            .map(|item| CountItem {
                id: Uuid::new_v4(),
                session_id,
                item_id: item.item_id,
                code: item.code.clone(),
                name: item.name.clone(),
                expected_stock: item.stock,
                actual_stock: item.stock,
                adjustment: 0,
            })
            .collect();
        items.sort_by_key(|item| item.item_id);
        self.active_count = Some(session_id);
        Ok((session_id, items))
    }

    /// Mirrors `InventoryCountService::finalize` once the session is known open
    pub fn finalize_count(&mut self, session_id: Uuid, items: &[CountItem]) -> CoreResult<()> {
        let movements = plan_count_adjustments(session_id, items);
        self.apply_all(&movements)?;
        self.active_count = None;
        Ok(())
    }
}

pub fn catalog(item_id: Uuid, quantity: i32) -> LineRequest {
    LineRequest::Catalog {
        item_id,
        quantity,
        unit_price: None,
    }
}

pub fn manual(name: &str, quantity: i32, unit_price: Decimal) -> LineRequest {
    LineRequest::Manual {
        name: name.to_string(),
        unit_price,
        quantity,
    }
}
