//! Validation utilities for the materials inventory core

use std::collections::HashSet;
use uuid::Uuid;

/// Longest free-text reason stored with a stock change
pub const MAX_REASON_LENGTH: usize = 500;

/// Longest note on a count session or purchase order
pub const MAX_NOTE_LENGTH: usize = 2000;

/// Largest quantity a single line, receipt or adjustment may carry
pub const MAX_QUANTITY: i32 = 1_000_000;

// ============================================================================
// Free-text Validations
// ============================================================================

/// Validate a stock change reason (required, bounded)
pub fn validate_reason(reason: &str) -> Result<(), &'static str> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err("Reason is required");
    }
    if trimmed.chars().count() > MAX_REASON_LENGTH {
        return Err("Reason must be at most 500 characters");
    }
    Ok(())
}

/// Validate an optional note
pub fn validate_note(note: Option<&str>) -> Result<(), &'static str> {
    match note {
        Some(note) if note.chars().count() > MAX_NOTE_LENGTH => {
            Err("Note must be at most 2000 characters")
        }
        _ => Ok(()),
    }
}

/// Validate the name entered when confirming an inventory count
pub fn validate_confirmer_name(name: &str) -> Result<(), &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Confirmer name is required");
    }
    if trimmed.chars().count() > 100 {
        return Err("Confirmer name must be at most 100 characters");
    }
    Ok(())
}

// ============================================================================
// Collection Validations
// ============================================================================

/// Validate that no catalog item appears twice
pub fn validate_unique_items(item_ids: &[Uuid]) -> Result<(), &'static str> {
    let mut seen = HashSet::with_capacity(item_ids.len());
    if item_ids.iter().all(|id| seen.insert(*id)) {
        Ok(())
    } else {
        Err("Each item may appear only once")
    }
}
