//! Target allocation editing and auto-balancing
//!
//! Holds the user's working target map while editing, surfaces its
//! deviation from 100%, and redistributes the remainder on explicit
//! request. Auto-balance is never applied implicitly on save: submission
//! is gated by `validate_target_sum` instead and rejected when the total
//! is off by more than the tolerance.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::CategoryInfo;

/// User-editable working state: category id → target percentage.
///
/// Need not sum to 100 while editing; must pass `validate_target_sum`
/// before submission.
pub type TargetAllocationMap = BTreeMap<i64, f64>;

/// Tolerance on the 100% sum invariant, in percentage points
pub const SUM_TOLERANCE: f64 = 0.01;

const MAX_BALANCE_PASSES: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("target allocations must sum to 100% (currently {sum:.2}%)")]
    TargetSumMismatch { sum: f64 },
}

/// Reject the map unless its total is 100 ± tolerance. This is the local
/// pre-submission gate: a failing map never reaches the backend.
pub fn validate_target_sum(allocations: &TargetAllocationMap) -> Result<(), ValidationError> {
    let sum: f64 = allocations.values().sum();
    if (sum - 100.0).abs() > SUM_TOLERANCE {
        Err(ValidationError::TargetSumMismatch { sum })
    } else {
        Ok(())
    }
}

/// Redistribute the shortfall or excess so the map sums to 100 ± 0.01.
///
/// The remainder is split evenly across entries with a nonzero value; when
/// nothing has been allocated yet it is split across all entries instead.
/// Entries are clamped at 0 and rounded to 2 decimals. Clamping can leave a
/// residual when a negative remainder lands on near-zero entries, so the
/// redistribution loops over the still-positive set until the sum invariant
/// holds; sub-cent rounding residue settles on the largest entry.
///
/// Calling this on a map that already sums to 100 is a near-identity.
pub fn distribute_remaining(allocations: &TargetAllocationMap) -> TargetAllocationMap {
    let mut result = allocations.clone();
    if result.is_empty() {
        return result;
    }

    for _ in 0..MAX_BALANCE_PASSES {
        let sum: f64 = result.values().sum();
        let remaining = 100.0 - sum;
        if remaining.abs() <= SUM_TOLERANCE / 2.0 {
            break;
        }

        let eligible: Vec<i64> = {
            let nonzero: Vec<i64> = result
                .iter()
                .filter(|(_, v)| **v > 0.0)
                .map(|(k, _)| *k)
                .collect();
            if nonzero.is_empty() {
                result.keys().copied().collect()
            } else {
                nonzero
            }
        };

        let delta = remaining / eligible.len() as f64;
        let mut changed = false;
        for id in eligible {
            let value = result[&id];
            let adjusted = round2((value + delta).max(0.0));
            if adjusted != value {
                changed = true;
            }
            result.insert(id, adjusted);
        }

        // per-entry rounding can swallow a sub-cent delta entirely
        if !changed {
            break;
        }
    }

    settle_residue(&mut result);
    result
}

/// Put any remaining sub-tolerance residue on the largest positive entry so
/// the rounded map lands on 100.00 exactly.
fn settle_residue(result: &mut TargetAllocationMap) {
    let sum: f64 = result.values().sum();
    let residual = round2(100.0 - sum);
    if residual == 0.0 {
        return;
    }

    let largest = result
        .iter()
        .filter(|(_, v)| **v > 0.0)
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(k, _)| *k);

    if let Some(id) = largest {
        let value = result[&id];
        let adjusted = round2((value + residual).max(0.0));
        result.insert(id, adjusted);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Editor
// ============================================================================

/// Working state for the allocation editor.
///
/// Owns the target map between "load categories" and "submit"; the UI
/// reads the deviation live and triggers auto-balance explicitly.
#[derive(Debug, Clone, Default)]
pub struct TargetEditor {
    targets: TargetAllocationMap,
}

impl TargetEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the editor from the backend's category catalog, taking existing
    /// targets where defined and 0 elsewhere
    pub fn from_categories(categories: &[CategoryInfo]) -> Self {
        let targets = categories
            .iter()
            .map(|c| (c.id, c.target_allocation.unwrap_or(0.0)))
            .collect();
        Self { targets }
    }

    pub fn set(&mut self, category_id: i64, percent: f64) {
        self.targets.insert(category_id, percent);
    }

    pub fn remove(&mut self, category_id: i64) {
        self.targets.remove(&category_id);
    }

    pub fn targets(&self) -> &TargetAllocationMap {
        &self.targets
    }

    pub fn total(&self) -> f64 {
        self.targets.values().sum()
    }

    /// Signed distance from 100%, surfaced live while editing
    pub fn deviation(&self) -> f64 {
        self.total() - 100.0
    }

    /// Explicit user action: make the targets sum to 100
    pub fn auto_balance(&mut self) {
        self.targets = distribute_remaining(&self.targets);
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_target_sum(&self.targets)
    }

    /// The submission payload, gated on the sum invariant
    pub fn submission(&self) -> Result<Vec<(i64, f64)>, ValidationError> {
        self.validate()?;
        Ok(self.targets.iter().map(|(k, v)| (*k, *v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(i64, f64)]) -> TargetAllocationMap {
        entries.iter().copied().collect()
    }

    fn assert_sums_to_100(m: &TargetAllocationMap) {
        let sum: f64 = m.values().sum();
        assert!(
            (sum - 100.0).abs() < SUM_TOLERANCE,
            "sum invariant violated: {}",
            sum
        );
    }

    #[test]
    fn distributes_shortfall_over_nonzero_entries() {
        let balanced = distribute_remaining(&map(&[(1, 40.0), (2, 40.0), (3, 0.0)]));
        assert_sums_to_100(&balanced);
        // zero entry was not eligible
        assert_eq!(balanced[&3], 0.0);
        assert_eq!(balanced[&1], 50.0);
        assert_eq!(balanced[&2], 50.0);
    }

    #[test]
    fn falls_back_to_all_entries_when_nothing_allocated() {
        let balanced = distribute_remaining(&map(&[(1, 0.0), (2, 0.0), (3, 0.0), (4, 0.0)]));
        assert_sums_to_100(&balanced);
        for value in balanced.values() {
            assert_eq!(*value, 25.0);
        }
    }

    #[test]
    fn thirds_settle_rounding_residue() {
        let balanced = distribute_remaining(&map(&[(1, 0.0), (2, 0.0), (3, 0.0)]));
        assert_sums_to_100(&balanced);
        let sum: f64 = balanced.values().sum();
        assert_eq!(sum, 100.0);
    }

    #[test]
    fn negative_remainder_never_goes_below_zero() {
        let balanced = distribute_remaining(&map(&[(1, 1.0), (2, 150.0)]));
        assert_sums_to_100(&balanced);
        for value in balanced.values() {
            assert!(*value >= 0.0, "negative allocation: {}", value);
        }
    }

    #[test]
    fn concentrated_excess_converges() {
        let balanced = distribute_remaining(&map(&[(1, 0.5), (2, 0.5), (3, 180.0)]));
        assert_sums_to_100(&balanced);
        for value in balanced.values() {
            assert!(*value >= 0.0);
        }
    }

    #[test]
    fn balanced_map_is_untouched() {
        let input = map(&[(1, 60.0), (2, 40.0)]);
        assert_eq!(distribute_remaining(&input), input);
    }

    #[test]
    fn empty_map_is_returned_unchanged() {
        assert!(distribute_remaining(&TargetAllocationMap::new()).is_empty());
    }

    #[test]
    fn validation_gate() {
        assert!(validate_target_sum(&map(&[(1, 60.0), (2, 40.0)])).is_ok());
        assert!(validate_target_sum(&map(&[(1, 60.0), (2, 40.005)])).is_ok());

        let err = validate_target_sum(&map(&[(1, 60.0), (2, 30.0)])).unwrap_err();
        assert_eq!(err, ValidationError::TargetSumMismatch { sum: 90.0 });
    }

    #[test]
    fn editor_tracks_deviation_and_gates_submission() {
        let mut editor = TargetEditor::new();
        editor.set(1, 70.0);
        editor.set(2, 20.0);
        assert!((editor.deviation() + 10.0).abs() < 1e-9);
        assert!(editor.submission().is_err());

        editor.auto_balance();
        assert!(editor.validate().is_ok());
        let submission = editor.submission().unwrap();
        let sum: f64 = submission.iter().map(|(_, v)| v).sum();
        assert!((sum - 100.0).abs() < SUM_TOLERANCE);
    }

    #[test]
    fn editor_seeds_from_catalog() {
        let categories = vec![
            CategoryInfo {
                id: 1,
                name: "Equities".to_string(),
                description: None,
                target_allocation: Some(60.0),
                current_allocation: Some(63.0),
            },
            CategoryInfo {
                id: 2,
                name: "Bonds".to_string(),
                description: None,
                target_allocation: None,
                current_allocation: Some(37.0),
            },
        ];

        let editor = TargetEditor::from_categories(&categories);
        assert_eq!(editor.targets()[&1], 60.0);
        assert_eq!(editor.targets()[&2], 0.0);
    }
}
