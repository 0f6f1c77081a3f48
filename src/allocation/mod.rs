//! Central normalization for raw allocation payloads
//!
//! SINGLE SOURCE OF TRUTH for the backend's allocation quirks. Drift rows
//! arrive with either key convention (`currentAllocation` vs
//! `current_allocation`) and either unit convention (fraction of 1 vs
//! percentage points), depending on which backend code path produced them.
//! All drift computation works with `DriftItem`s produced here, ONCE, at
//! the fetch boundary.
//!
//! Known ambiguity: a value of e.g. `0.8` cannot be distinguished between
//! "0.8%" and "80% expressed as a fraction". The `≤ 1` heuristic treats it
//! as a fraction. This matches the backend's own behavior and is accepted,
//! not corrected.

use serde::Deserialize;

use crate::models::DriftItem;

/// One allocation row as served by the backend, before normalization.
///
/// Both key conventions are declared explicitly rather than via serde
/// aliases, so the camelCase field can win when a payload carries both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAllocationItem {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "currentAllocation")]
    pub current_allocation_camel: Option<f64>,
    #[serde(default, rename = "current_allocation")]
    pub current_allocation_snake: Option<f64>,

    #[serde(default, rename = "targetAllocation")]
    pub target_allocation_camel: Option<f64>,
    #[serde(default, rename = "target_allocation")]
    pub target_allocation_snake: Option<f64>,

    #[serde(default, rename = "absoluteDrift")]
    pub absolute_drift_camel: Option<f64>,
    #[serde(default, rename = "absolute_drift")]
    pub absolute_drift_snake: Option<f64>,

    #[serde(default, rename = "relativeDrift")]
    pub relative_drift_camel: Option<f64>,
    #[serde(default, rename = "relative_drift")]
    pub relative_drift_snake: Option<f64>,
}

/// Normalize one raw row into percentage-point form with derived drift.
///
/// - camelCase keys win over snake_case when both are present
/// - values with magnitude ≤ 1 are treated as fractions and scaled by 100
/// - drift fields supplied by the backend are scaled by the same heuristic
///   and trusted; missing ones are derived from current/target
///
/// Pure function, no I/O. Missing allocation values default to 0.
pub fn normalize(raw: &RawAllocationItem) -> DriftItem {
    let current = to_percent(pick(raw.current_allocation_camel, raw.current_allocation_snake).unwrap_or(0.0));
    let target = to_percent(pick(raw.target_allocation_camel, raw.target_allocation_snake).unwrap_or(0.0));

    let absolute_drift = match pick(raw.absolute_drift_camel, raw.absolute_drift_snake) {
        Some(supplied) => to_percent(supplied),
        None => current - target,
    };

    let relative_drift = match pick(raw.relative_drift_camel, raw.relative_drift_snake) {
        Some(supplied) => to_percent(supplied),
        None => relative_drift_of(current, target, absolute_drift),
    };

    DriftItem {
        name: raw.name.clone(),
        current_allocation: current,
        target_allocation: target,
        absolute_drift,
        relative_drift,
    }
}

/// Relative drift in percent of target.
///
/// A zero target with nonzero current is reported as 100 (fully off
/// target); zero over zero is 0.
pub fn relative_drift_of(current: f64, target: f64, absolute_drift: f64) -> f64 {
    if target == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (absolute_drift / target) * 100.0
    }
}

fn pick(camel: Option<f64>, snake: Option<f64>) -> Option<f64> {
    camel.or(snake)
}

/// The `≤ 1` unit heuristic, applied to the magnitude so signed drift
/// values scale the same way as allocations.
pub fn to_percent(value: f64) -> f64 {
    if value.abs() <= 1.0 {
        value * 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(current: Option<f64>, target: Option<f64>) -> RawAllocationItem {
        RawAllocationItem {
            name: "Technology".to_string(),
            current_allocation_snake: current,
            target_allocation_snake: target,
            ..Default::default()
        }
    }

    #[test]
    fn derives_drift_from_percent_values() {
        let item = normalize(&raw(Some(65.0), Some(60.0)));
        assert_eq!(item.current_allocation, 65.0);
        assert_eq!(item.target_allocation, 60.0);
        assert_eq!(item.absolute_drift, 5.0);
        assert!((item.relative_drift - 8.333333333333332).abs() < 1e-9);
    }

    #[test]
    fn scales_fractional_values() {
        let item = normalize(&raw(Some(0.325), Some(0.25)));
        assert!((item.current_allocation - 32.5).abs() < 1e-9);
        assert!((item.target_allocation - 25.0).abs() < 1e-9);
        assert!((item.absolute_drift - 7.5).abs() < 1e-9);
    }

    #[test]
    fn fields_scale_independently() {
        // current from one code path (fraction), target from another (percent)
        let item = normalize(&raw(Some(0.325), Some(25.0)));
        assert!((item.absolute_drift - 7.5).abs() < 1e-9);
    }

    #[test]
    fn camel_case_wins_over_snake_case() {
        let mut r = raw(Some(10.0), Some(10.0));
        r.current_allocation_camel = Some(40.0);
        let item = normalize(&r);
        assert_eq!(item.current_allocation, 40.0);
    }

    #[test]
    fn supplied_drift_is_scaled_and_trusted() {
        let mut r = raw(Some(65.0), Some(60.0));
        // backend sends the drift as a fraction; sign must survive scaling
        r.absolute_drift_snake = Some(-0.05);
        let item = normalize(&r);
        assert_eq!(item.absolute_drift, -5.0);
    }

    #[test]
    fn zero_target_edge_cases() {
        let both_zero = normalize(&raw(Some(0.0), Some(0.0)));
        assert_eq!(both_zero.relative_drift, 0.0);

        let unplanned = normalize(&raw(Some(3.0), Some(0.0)));
        assert_eq!(unplanned.relative_drift, 100.0);
    }

    #[test]
    fn normalization_is_idempotent_on_percent_form() {
        let first = normalize(&raw(Some(65.0), Some(60.0)));
        let again = normalize(&RawAllocationItem {
            name: first.name.clone(),
            current_allocation_camel: Some(first.current_allocation),
            target_allocation_camel: Some(first.target_allocation),
            absolute_drift_camel: Some(first.absolute_drift),
            relative_drift_camel: Some(first.relative_drift),
            ..Default::default()
        });
        assert_eq!(first, again);
    }

    #[test]
    fn missing_values_default_to_zero() {
        let item = normalize(&RawAllocationItem {
            name: "Cash".to_string(),
            ..Default::default()
        });
        assert_eq!(item.current_allocation, 0.0);
        assert_eq!(item.target_allocation, 0.0);
        assert_eq!(item.absolute_drift, 0.0);
        assert_eq!(item.relative_drift, 0.0);
    }

    #[test]
    fn accepts_either_wire_key_convention() {
        let snake: RawAllocationItem = serde_json::from_str(
            r#"{"name": "Tech", "current_allocation": 32.5, "target_allocation": 25}"#,
        )
        .unwrap();
        assert_eq!(normalize(&snake).absolute_drift, 7.5);

        let camel: RawAllocationItem = serde_json::from_str(
            r#"{"name": "Tech", "currentAllocation": 32.5, "targetAllocation": 25}"#,
        )
        .unwrap();
        assert_eq!(normalize(&camel).absolute_drift, 7.5);
    }
}
