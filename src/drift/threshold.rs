//! Threshold classification for drift values
//!
//! Maps a drift magnitude to a severity tier relative to the configured
//! threshold, and provides the boolean gate that decides whether a rule
//! fires. The drift mode (absolute vs relative) is always chosen by the
//! caller; the same item can legitimately classify differently under the
//! two modes.

use serde::{Deserialize, Serialize};

use crate::models::{DriftItem, DriftMode};

/// Severity tier of a drift value relative to its threshold.
///
/// Boundaries as fractions of the threshold: below 0.5 is safe, below 0.75
/// a warning, below 1.0 elevated, at or beyond the threshold critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Safe,
    Warning,
    Elevated,
    Critical,
}

/// Classify a drift value against a threshold (both in percent).
///
/// A non-positive threshold degenerates: zero drift is safe, anything else
/// critical.
pub fn classify(drift_value: f64, threshold_percent: f64) -> Severity {
    let magnitude = drift_value.abs();

    if threshold_percent <= 0.0 {
        return if magnitude == 0.0 { Severity::Safe } else { Severity::Critical };
    }

    let ratio = magnitude / threshold_percent;
    if ratio < 0.5 {
        Severity::Safe
    } else if ratio < 0.75 {
        Severity::Warning
    } else if ratio < 1.0 {
        Severity::Elevated
    } else {
        Severity::Critical
    }
}

/// Whether a drift value is at or beyond the threshold.
///
/// Inclusive on the boundary so a drift of exactly the threshold both
/// exceeds and classifies critical.
pub fn exceeds_threshold(drift_value: f64, threshold_percent: f64) -> bool {
    drift_value.abs() >= threshold_percent
}

/// Classify one allocation row under an explicit mode
pub fn classify_item(item: &DriftItem, threshold_percent: f64, mode: DriftMode) -> Severity {
    classify(item.drift(mode), threshold_percent)
}

/// Threshold gate for one allocation row under an explicit mode
pub fn item_exceeds(item: &DriftItem, threshold_percent: f64, mode: DriftMode) -> bool {
    exceeds_threshold(item.drift(mode), threshold_percent)
}
