//! Drift calculation module
//!
//! Aggregates normalized allocation rows into per-bucket drift results:
//!
//! ```text
//! totalAbsoluteDrift = Σ |current_i - target_i|      (synthetic rollup rows excluded)
//!
//! relative bucket drift (target-weighted):
//!   Σ (|relativeDrift_i| × target_i) / Σ target_i    (0 when Σ target_i = 0)
//! ```
//!
//! Presentation order is descending by drift magnitude under the selected
//! mode; ties keep insertion order (stable sort).

pub mod threshold;

use crate::models::{DriftItem, DriftMode};

/// Label of the rollup row some backend variants prepend to a bucket. It
/// restates the rest of the bucket and must not be double counted.
const OVERALL_ROLLUP_LABEL: &str = "overall allocation";

/// Aggregated figures for one bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAggregate {
    pub total_absolute_drift: f64,
    /// Items in presentation order (largest magnitude first)
    pub sorted_by_magnitude: Vec<DriftItem>,
}

/// True for the synthetic "Overall Allocation" rollup row
pub fn is_rollup_row(item: &DriftItem) -> bool {
    item.name.trim().eq_ignore_ascii_case(OVERALL_ROLLUP_LABEL)
}

/// Aggregate a bucket's rows: total absolute drift over non-synthetic rows
/// plus a magnitude-sorted copy for presentation.
pub fn aggregate(items: &[DriftItem], mode: DriftMode) -> BucketAggregate {
    BucketAggregate {
        total_absolute_drift: total_absolute_drift(items),
        sorted_by_magnitude: sort_by_magnitude(items, mode),
    }
}

/// Sum of absolute drift magnitudes, excluding synthetic rollup rows
pub fn total_absolute_drift(items: &[DriftItem]) -> f64 {
    items
        .iter()
        .filter(|item| !is_rollup_row(item))
        .map(|item| item.absolute_drift.abs())
        .sum()
}

/// Stable descending sort by drift magnitude under the selected mode
pub fn sort_by_magnitude(items: &[DriftItem], mode: DriftMode) -> Vec<DriftItem> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        b.drift(mode)
            .abs()
            .partial_cmp(&a.drift(mode).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
}

/// One scalar relative drift for a whole bucket, weighted by target size so
/// a 50% position drifting 10% off target outweighs a 2% position doing the
/// same. Returns 0 when total target weight is 0.
pub fn weighted_relative_drift(items: &[DriftItem]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight = 0.0;

    for item in items.iter().filter(|item| !is_rollup_row(item)) {
        weighted_sum += item.relative_drift.abs() * item.target_allocation;
        weight += item.target_allocation;
    }

    if weight == 0.0 {
        0.0
    } else {
        weighted_sum / weight
    }
}
