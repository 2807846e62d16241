//! Transaction engine tests
//!
//! Checkout, return and correction flows run against the in-memory ledger:
//! - Checkout moves exactly the requested stock with one audit entry per line
//! - Failed checkouts change nothing
//! - Returns are bounded by what is still outstanding
//! - Corrections move only the difference

mod common;

use common::{catalog, dec, manual, MemoryLedger};
use proptest::prelude::*;
use shared::{
    returnable_lines, AuditReference, CoreError, LineItem, ReturnRequest, StockCategory,
    TransactionKind, MAX_QUANTITY,
};

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_checkout_decrements_stock_with_one_entry_per_line() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let elbow = ledger.add_item("ELB-20", 5, dec("45.5"));

        let tx = ledger
            .checkout(&[catalog(pipe, 3), catalog(elbow, 2), catalog(pipe, 1)])
            .unwrap();

        assert_eq!(ledger.stock(pipe), 6);
        assert_eq!(ledger.stock(elbow), 3);
        assert_eq!(ledger.audit.len(), 3);
        assert!(ledger
            .audit
            .iter()
            .all(|e| e.category == StockCategory::Checkout
                && e.reference == Some(AuditReference::transaction(tx.id))));
        let pipe_deltas: Vec<i32> = ledger
            .entries_for(pipe)
            .iter()
            .map(|e| e.quantity_delta)
            .collect();
        assert_eq!(pipe_deltas, vec![-3, -1]);
        assert_eq!(tx.total_amount, dec("571"));
    }

    #[test]
    fn test_checkout_insufficient_stock_changes_nothing() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let elbow = ledger.add_item("ELB-20", 1, dec("45"));

        let err = ledger
            .checkout(&[catalog(pipe, 3), catalog(elbow, 2)])
            .unwrap_err();

        match err {
            CoreError::InsufficientStock { code, requested, available, .. } => {
                assert_eq!(code, "ELB-20");
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ledger.stock(pipe), 10);
        assert_eq!(ledger.stock(elbow), 1);
        assert!(ledger.audit.is_empty());
    }

    #[test]
    fn test_duplicate_lines_are_summed_before_the_stock_check() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 4, dec("120"));

        let result = ledger.checkout(&[catalog(pipe, 3), catalog(pipe, 2)]);

        assert!(matches!(result, Err(CoreError::InsufficientStock { requested: 5, .. })));
        assert_eq!(ledger.stock(pipe), 4);
    }

    #[test]
    fn test_manual_lines_never_touch_stock() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 0, dec("120"));

        let tx = ledger
            .checkout(&[manual("Site delivery fee", 1, dec("3000"))])
            .unwrap();

        assert_eq!(ledger.stock(pipe), 0);
        assert!(ledger.audit.is_empty());
        assert_eq!(tx.total_amount, dec("3000"));
        assert!(matches!(tx.lines[0], LineItem::Manual(_)));
    }

    #[test]
    fn test_checkout_rejected_during_count() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        ledger.start_count().unwrap();

        let result = ledger.checkout(&[catalog(pipe, 1)]);

        assert_eq!(result.unwrap_err(), CoreError::ActiveSessionConflict);
        assert_eq!(ledger.stock(pipe), 10);
    }

    #[test]
    fn test_return_rejected_during_count() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 4)]).unwrap();
        let entries_before = ledger.audit.len();
        ledger.start_count().unwrap();

        let result = ledger.return_items(&mut tx, &[ReturnRequest { item_id: pipe, quantity: 1 }]);

        assert_eq!(result.unwrap_err(), CoreError::ActiveSessionConflict);
        assert_eq!(ledger.stock(pipe), 6);
        assert_eq!(ledger.audit.len(), entries_before);
        assert!(!tx.has_returns);
    }

    #[test]
    fn test_quantity_correction_rejected_during_count() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 4)]).unwrap();
        ledger.start_count().unwrap();

        let result = ledger.correct(&mut tx, &[catalog(pipe, 2)]);

        assert_eq!(result.unwrap_err(), CoreError::ActiveSessionConflict);
        assert_eq!(ledger.stock(pipe), 6);
        assert!(!tx.is_edited);
    }

    #[test]
    fn test_checkout_quantities_near_i32_max() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));

        let result = ledger.checkout(&[catalog(pipe, i32::MAX), catalog(pipe, 2)]);

        assert!(matches!(result, Err(CoreError::Validation { .. })));
        assert_eq!(ledger.stock(pipe), 10);
        assert!(ledger.audit.is_empty());

        let result = ledger.checkout(&[catalog(pipe, MAX_QUANTITY), catalog(pipe, MAX_QUANTITY)]);

        assert!(matches!(result, Err(CoreError::InsufficientStock { requested: 2_000_000, .. })));
        assert_eq!(ledger.stock(pipe), 10);
    }

    #[test]
    fn test_return_quantities_near_i32_max() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 4)]).unwrap();

        let result = ledger.return_items(
            &mut tx,
            &[
                ReturnRequest { item_id: pipe, quantity: i32::MAX },
                ReturnRequest { item_id: pipe, quantity: 2 },
            ],
        );

        assert!(matches!(result, Err(CoreError::Validation { .. })));
        assert_eq!(ledger.stock(pipe), 6);
    }

    #[test]
    fn test_return_restores_stock_and_is_bounded() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 4)]).unwrap();

        let record = ledger
            .return_items(&mut tx, &[ReturnRequest { item_id: pipe, quantity: 3 }])
            .unwrap();
        assert_eq!(ledger.stock(pipe), 9);
        assert_eq!(record.kind, TransactionKind::Return);
        assert_eq!(record.original_transaction_id, Some(tx.id));
        assert_eq!(record.total_amount, dec("-360"));
        assert!(tx.has_returns);

        // Only one left outstanding
        let err = ledger
            .return_items(&mut tx, &[ReturnRequest { item_id: pipe, quantity: 2 }])
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(ledger.stock(pipe), 9);

        let remaining = returnable_lines(&tx, &ledger.returned_quantities(tx.id)).unwrap();
        assert_eq!(remaining[0].purchased, 4);
        assert_eq!(remaining[0].returned, 3);
        assert_eq!(remaining[0].remaining, 1);
    }

    #[test]
    fn test_return_of_item_not_in_transaction() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let elbow = ledger.add_item("ELB-20", 10, dec("45"));
        let mut tx = ledger.checkout(&[catalog(pipe, 2)]).unwrap();

        let result = ledger.return_items(&mut tx, &[ReturnRequest { item_id: elbow, quantity: 1 }]);

        assert!(matches!(result, Err(CoreError::Validation { .. })));
        assert_eq!(ledger.stock(elbow), 10);
    }

    #[test]
    fn test_return_record_cannot_itself_be_returned() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 2)]).unwrap();
        let mut record = ledger
            .return_items(&mut tx, &[ReturnRequest { item_id: pipe, quantity: 1 }])
            .unwrap();

        let result = ledger.return_items(&mut record, &[ReturnRequest { item_id: pipe, quantity: 1 }]);

        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_correction_moves_only_the_difference() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let elbow = ledger.add_item("ELB-20", 10, dec("45"));
        let mut tx = ledger.checkout(&[catalog(pipe, 5)]).unwrap();
        let entries_before = ledger.audit.len();

        let plan = ledger
            .correct(&mut tx, &[catalog(pipe, 3), catalog(elbow, 2)])
            .unwrap();

        assert!(plan.changed);
        assert_eq!(ledger.stock(pipe), 7);
        assert_eq!(ledger.stock(elbow), 8);
        assert_eq!(ledger.audit.len(), entries_before + 2);
        assert!(ledger.audit[entries_before..]
            .iter()
            .all(|e| e.category == StockCategory::TransactionCorrection));
        assert!(tx.is_edited);
        assert_eq!(tx.total_amount, dec("450"));
    }

    #[test]
    fn test_identical_correction_is_a_no_op() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 5)]).unwrap();
        let entries_before = ledger.audit.len();

        let plan = ledger.correct(&mut tx, &[catalog(pipe, 5)]).unwrap();

        assert!(!plan.changed);
        assert!(plan.movements.is_empty());
        assert!(!tx.is_edited);
        assert_eq!(ledger.audit.len(), entries_before);
    }

    #[test]
    fn test_price_only_correction_moves_no_stock() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 5)]).unwrap();
        ledger.start_count().unwrap();

        // Allowed during a count because no stock moves
        let plan = ledger
            .correct(
                &mut tx,
                &[shared::LineRequest::Catalog {
                    item_id: pipe,
                    quantity: 5,
                    unit_price: Some(dec("100")),
                }],
            )
            .unwrap();

        assert!(plan.changed);
        assert!(plan.movements.is_empty());
        assert_eq!(tx.total_amount, dec("500"));
        assert_eq!(ledger.stock(pipe), 5);
    }

    #[test]
    fn test_correction_cannot_drop_below_returned() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 10, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 5)]).unwrap();
        ledger
            .return_items(&mut tx, &[ReturnRequest { item_id: pipe, quantity: 3 }])
            .unwrap();

        let result = ledger.correct(&mut tx, &[catalog(pipe, 2)]);

        assert!(matches!(result, Err(CoreError::Validation { .. })));
        assert_eq!(ledger.stock(pipe), 8);
    }

    #[test]
    fn test_correction_increase_needs_stock() {
        let mut ledger = MemoryLedger::new();
        let pipe = ledger.add_item("PVC-VP20", 6, dec("120"));
        let mut tx = ledger.checkout(&[catalog(pipe, 5)]).unwrap();

        let result = ledger.correct(&mut tx, &[catalog(pipe, 7)]);

        assert!(matches!(result, Err(CoreError::InsufficientStock { requested: 2, available: 1, .. })));
        assert_eq!(ledger.stock(pipe), 1);
        assert!(!tx.is_edited);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn stock_strategy() -> impl Strategy<Value = i32> {
        0i32..500
    }

    fn quantities_strategy() -> impl Strategy<Value = Vec<i32>> {
        prop::collection::vec(1i32..60, 1..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Checkout either moves exactly the requested total or changes nothing
        #[test]
        fn prop_checkout_is_all_or_nothing(
            stock in stock_strategy(),
            quantities in quantities_strategy(),
        ) {
            let mut ledger = MemoryLedger::new();
            let item = ledger.add_item("ITEM", stock, dec("10"));
            let requests: Vec<_> = quantities.iter().map(|q| catalog(item, *q)).collect();
            let total: i32 = quantities.iter().sum();

            match ledger.checkout(&requests) {
                Ok(_) => {
                    prop_assert!(total <= stock);
                    prop_assert_eq!(ledger.stock(item), stock - total);
                    prop_assert_eq!(ledger.audit.len(), quantities.len());
                }
                Err(CoreError::InsufficientStock { .. }) => {
                    prop_assert!(total > stock);
                    prop_assert_eq!(ledger.stock(item), stock);
                    prop_assert!(ledger.audit.is_empty());
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }

        /// Stock never goes negative and always equals the sum of audited deltas
        #[test]
        fn prop_stock_matches_audit_trail(
            stock in stock_strategy(),
            quantities in quantities_strategy(),
            returns in prop::collection::vec(1i32..30, 0..4),
        ) {
            let mut ledger = MemoryLedger::new();
            let item = ledger.add_item("ITEM", stock, dec("10"));

            if let Ok(mut tx) = ledger.checkout(&[catalog(item, quantities[0])]) {
                for quantity in returns {
                    let _ = ledger.return_items(&mut tx, &[ReturnRequest { item_id: item, quantity }]);
                }
            }

            let audited: i32 = ledger.entries_for(item).iter().map(|e| e.quantity_delta).sum();
            prop_assert!(ledger.stock(item) >= 0);
            prop_assert_eq!(ledger.stock(item), stock + audited);
        }

        /// Returned quantity never exceeds what was checked out
        #[test]
        fn prop_returns_bounded_by_purchase(
            bought in 1i32..50,
            returns in prop::collection::vec(1i32..30, 1..6),
        ) {
            let mut ledger = MemoryLedger::new();
            let item = ledger.add_item("ITEM", 100, dec("10"));
            let mut tx = ledger.checkout(&[catalog(item, bought)]).unwrap();

            for quantity in returns {
                let _ = ledger.return_items(&mut tx, &[ReturnRequest { item_id: item, quantity }]);
            }

            let returned = ledger.returned_quantities(tx.id).get(&item).copied().unwrap_or(0);
            prop_assert!(returned <= bought);
            prop_assert_eq!(ledger.stock(item), 100 - bought + returned);
        }

        /// After a correction, stock reflects the corrected quantity only
        #[test]
        fn prop_correction_nets_to_new_quantity(
            original in 1i32..40,
            corrected in 1i32..40,
        ) {
            let mut ledger = MemoryLedger::new();
            let item = ledger.add_item("ITEM", 100, dec("10"));
            let mut tx = ledger.checkout(&[catalog(item, original)]).unwrap();

            ledger.correct(&mut tx, &[catalog(item, corrected)]).unwrap();

            prop_assert_eq!(ledger.stock(item), 100 - corrected);
            prop_assert_eq!(tx.is_edited, original != corrected);
        }
    }
}
