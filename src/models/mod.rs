use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Allocation dimension a drift computation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationBucket {
    Overall,
    AssetClass,
    Sector,
}

impl AllocationBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overall => "overall",
            Self::AssetClass => "asset_class",
            Self::Sector => "sector",
        }
    }

    pub fn all() -> [AllocationBucket; 3] {
        [Self::Overall, Self::AssetClass, Self::Sector]
    }
}

/// Which drift figure a threshold or sort applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMode {
    Absolute,
    Relative,
}

/// One allocation row within a bucket, fully normalized to percentage points.
///
/// `absolute_drift` and `relative_drift` are always derived by the
/// normalizer, never set independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftItem {
    pub name: String,
    pub current_allocation: f64,
    pub target_allocation: f64,
    pub absolute_drift: f64,
    pub relative_drift: f64,
}

impl DriftItem {
    /// The drift figure under the given mode
    pub fn drift(&self, mode: DriftMode) -> f64 {
        match mode {
            DriftMode::Absolute => self.absolute_drift,
            DriftMode::Relative => self.relative_drift,
        }
    }
}

/// One bucket's full drift result.
///
/// Invariant: `total_absolute_drift` equals the sum of `|absolute_drift|`
/// over all non-synthetic items (an "Overall Allocation" rollup row is
/// excluded to avoid double counting).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftData {
    pub portfolio_id: i64,
    pub portfolio_name: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub total_absolute_drift: f64,
    pub items: Vec<DriftItem>,
}

/// Asset-class or sector catalog entry as served by the backend.
///
/// Serializes camelCase toward the UI; the aliases accept the backend's
/// snake_case wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "target_allocation")]
    pub target_allocation: Option<f64>,
    #[serde(default, alias = "current_allocation")]
    pub current_allocation: Option<f64>,
}

// ============================================================================
// Alert rules
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Paused,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertFrequency {
    Immediate,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertAction {
    Notification,
    Email,
    Webhook,
}

/// Condition of an alert rule, keyed on its type.
///
/// Each variant carries only the fields legal for that condition, so
/// consumers never reach into an untyped config bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "conditionType", content = "conditionConfig")]
pub enum AlertCondition {
    Drift(DriftConfig),
    SectorDrift(SectorDriftConfig),
    AssetClassDrift(AssetClassDriftConfig),
    PriceMovement(PriceMovementConfig),
}

impl AlertCondition {
    /// Threshold and mode for drift-style conditions; `None` for conditions
    /// the drift engine does not evaluate client-side.
    pub fn drift_threshold(&self) -> Option<(f64, DriftMode)> {
        match self {
            Self::Drift(c) => Some((c.threshold_percent, c.drift_type)),
            Self::SectorDrift(c) => Some((c.threshold_percent, c.drift_type)),
            Self::AssetClassDrift(c) => Some((c.threshold_percent, c.drift_type)),
            Self::PriceMovement(_) => None,
        }
    }

    /// Bucket a drift-style condition watches
    pub fn bucket(&self) -> Option<AllocationBucket> {
        match self {
            Self::Drift(_) => Some(AllocationBucket::Overall),
            Self::SectorDrift(_) => Some(AllocationBucket::Sector),
            Self::AssetClassDrift(_) => Some(AllocationBucket::AssetClass),
            Self::PriceMovement(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftConfig {
    #[serde(alias = "threshold_percent")]
    pub threshold_percent: f64,
    #[serde(alias = "drift_type")]
    pub drift_type: DriftMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorDriftConfig {
    #[serde(alias = "threshold_percent")]
    pub threshold_percent: f64,
    #[serde(alias = "drift_type")]
    pub drift_type: DriftMode,
    /// Restrict to one sector; `None` watches all sectors
    #[serde(default, alias = "sector_id")]
    pub sector_id: Option<i64>,
    #[serde(default, alias = "excluded_sectors")]
    pub excluded_sectors: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetClassDriftConfig {
    #[serde(alias = "threshold_percent")]
    pub threshold_percent: f64,
    #[serde(alias = "drift_type")]
    pub drift_type: DriftMode,
    #[serde(default, alias = "asset_class_id")]
    pub asset_class_id: Option<i64>,
    #[serde(default, alias = "excluded_asset_classes")]
    pub excluded_asset_classes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceMovementConfig {
    #[serde(alias = "threshold_percent")]
    pub threshold_percent: f64,
    #[serde(default, alias = "security_id")]
    pub security_id: Option<i64>,
}

/// A user-configured alert rule.
///
/// Created locally, persisted remotely, evaluated by the backend on its own
/// cycle; `last_triggered`/`last_checked` reflect that cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub status: AlertStatus,
    pub frequency: AlertFrequency,
    #[serde(flatten)]
    pub condition: AlertCondition,
    pub action_type: AlertAction,
    pub created_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub portfolio_id: Option<i64>,
}

/// One row of a rule's evaluation history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertHistoryEntry {
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub was_triggered: bool,
    pub context_data: serde_json::Value,
    pub action_results: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_serializes_as_tagged_union() {
        let condition = AlertCondition::SectorDrift(SectorDriftConfig {
            threshold_percent: 5.0,
            drift_type: DriftMode::Absolute,
            sector_id: Some(3),
            excluded_sectors: vec![],
        });

        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["conditionType"], "SectorDrift");
        assert_eq!(json["conditionConfig"]["thresholdPercent"], 5.0);
        assert_eq!(json["conditionConfig"]["driftType"], "absolute");
    }

    #[test]
    fn condition_rejects_foreign_fields() {
        // A sector config must not leak into an asset-class condition
        let json = serde_json::json!({
            "conditionType": "AssetClassDrift",
            "conditionConfig": {
                "thresholdPercent": 2.5,
                "driftType": "relative",
                "assetClassId": 7
            }
        });

        let condition: AlertCondition = serde_json::from_value(json).unwrap();
        match condition {
            AlertCondition::AssetClassDrift(c) => {
                assert_eq!(c.asset_class_id, Some(7));
                assert!(c.excluded_asset_classes.is_empty());
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[test]
    fn bucket_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&AllocationBucket::AssetClass).unwrap(),
            "\"asset_class\""
        );
        assert_eq!(AllocationBucket::Sector.as_str(), "sector");
    }
}
