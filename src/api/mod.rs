//! Backend API contracts
//!
//! The two traits here are the crate's only seam to the remote backend.
//! Everything above them (store, coordinator) takes an `Arc<dyn …>` at
//! construction, so tests run against in-memory fakes and the shipped
//! binary runs against [`http::HttpBackend`].
//!
//! Wire DTOs in this module mirror the backend's snake_case JSON; they are
//! converted to the camelCase-facing domain types at the fetch boundary,
//! which is also where allocation normalization runs.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::alerts::{AlertRuleDraft, AlertRulePatch};
use crate::allocation::{self, RawAllocationItem};
use crate::drift;
use crate::models::{
    AlertAction, AlertCondition, AlertFrequency, AlertHistoryEntry, AlertRule, AlertStatus,
    AllocationBucket, CategoryInfo, DriftData, DriftItem,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode backend payload: {0}")]
    Decode(String),
}

/// Read/write access to portfolio allocation state
#[async_trait]
pub trait PortfolioBackend: Send + Sync {
    async fn fetch_drift(&self) -> Result<DriftSnapshot, ApiError>;
    async fn fetch_asset_classes(&self) -> Result<Vec<CategoryInfo>, ApiError>;
    async fn fetch_sectors(&self) -> Result<Vec<CategoryInfo>, ApiError>;
    /// Persist asset-class targets; returns the updated catalog
    async fn save_target_allocations(
        &self,
        targets: &[(i64, f64)],
    ) -> Result<Vec<CategoryInfo>, ApiError>;
    /// Persist sector targets; returns the updated catalog
    async fn save_sector_target_allocations(
        &self,
        targets: &[(i64, f64)],
    ) -> Result<Vec<CategoryInfo>, ApiError>;
}

/// Alert rule CRUD and history
#[async_trait]
pub trait AlertBackend: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<AlertRule>, ApiError>;
    async fn create_rule(&self, draft: &AlertRuleDraft) -> Result<AlertRule, ApiError>;
    async fn update_rule(&self, id: &str, patch: &AlertRulePatch) -> Result<AlertRule, ApiError>;
    async fn delete_rule(&self, id: &str) -> Result<(), ApiError>;
    async fn rule_history(&self, rule_id: &str) -> Result<Vec<AlertHistoryEntry>, ApiError>;
}

// ============================================================================
// Drift response
// ============================================================================

/// Result of a drift fetch: either drift data per bucket, or the backend's
/// signal that no target allocations have been defined yet. The latter
/// still carries whatever current allocations exist, so the UI can show
/// "where you are" before "where you want to be".
#[derive(Debug, Clone)]
pub enum DriftSnapshot {
    SetupRequired {
        message: String,
        current_allocations: Vec<DriftItem>,
    },
    Data(DriftReport),
}

/// Per-bucket drift data as far as the backend has it
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    pub overall: Option<DriftData>,
    pub asset_class: Option<DriftData>,
    pub sector: Option<DriftData>,
}

impl DriftReport {
    pub fn bucket(&self, bucket: AllocationBucket) -> Option<&DriftData> {
        match bucket {
            AllocationBucket::Overall => self.overall.as_ref(),
            AllocationBucket::AssetClass => self.asset_class.as_ref(),
            AllocationBucket::Sector => self.sector.as_ref(),
        }
    }

    /// True when no bucket has any rows
    pub fn is_empty(&self) -> bool {
        AllocationBucket::all()
            .iter()
            .all(|b| self.bucket(*b).map_or(true, |d| d.items.is_empty()))
    }
}

/// `GET /portfolio/drift/` wire envelope
#[derive(Debug, Deserialize)]
pub(crate) struct RawDriftEnvelope {
    #[serde(default)]
    pub setup_required: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub current_allocations: Option<Vec<RawAllocationItem>>,
    #[serde(default)]
    pub overall: Option<RawDriftData>,
    #[serde(default)]
    pub asset_class: Option<RawDriftData>,
    #[serde(default)]
    pub sector: Option<RawDriftData>,
}

/// One bucket as served by the backend
#[derive(Debug, Deserialize)]
pub(crate) struct RawDriftData {
    #[serde(default, alias = "portfolioId")]
    pub portfolio_id: i64,
    #[serde(default, alias = "portfolioName")]
    pub portfolio_name: String,
    #[serde(default, alias = "lastUpdated")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<RawAllocationItem>,
}

impl RawDriftEnvelope {
    pub(crate) fn into_snapshot(self) -> DriftSnapshot {
        if self.setup_required == Some(true) {
            let current_allocations = self
                .current_allocations
                .unwrap_or_default()
                .iter()
                .map(allocation::normalize)
                .collect();
            return DriftSnapshot::SetupRequired {
                message: self
                    .message
                    .unwrap_or_else(|| "No target allocations defined".to_string()),
                current_allocations,
            };
        }

        DriftSnapshot::Data(DriftReport {
            overall: self.overall.map(RawDriftData::into_drift_data),
            asset_class: self.asset_class.map(RawDriftData::into_drift_data),
            sector: self.sector.map(RawDriftData::into_drift_data),
        })
    }
}

impl RawDriftData {
    /// Normalize all rows and derive the bucket total. A total supplied by
    /// the backend is ignored: the invariant makes it a derived figure.
    fn into_drift_data(self) -> DriftData {
        let items: Vec<DriftItem> = self.items.iter().map(allocation::normalize).collect();
        DriftData {
            portfolio_id: self.portfolio_id,
            portfolio_name: self.portfolio_name,
            last_updated: self.last_updated,
            total_absolute_drift: drift::total_absolute_drift(&items),
            items,
        }
    }
}

/// Apply the unit heuristic to a category catalog row; the backend's two
/// allocation fields follow the same mixed conventions as drift rows
pub(crate) fn normalize_category(mut category: CategoryInfo) -> CategoryInfo {
    category.target_allocation = category.target_allocation.map(allocation::to_percent);
    category.current_allocation = category.current_allocation.map(allocation::to_percent);
    category
}

// ============================================================================
// Alert rule wire form
// ============================================================================

/// `GET /alerts/rules/` row, snake_case on the wire
#[derive(Debug, Deserialize)]
pub(crate) struct RawAlertRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub status: AlertStatus,
    pub frequency: AlertFrequency,
    pub condition_type: String,
    #[serde(default)]
    pub condition_config: serde_json::Value,
    pub action_type: AlertAction,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub portfolio_id: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl RawAlertRule {
    pub(crate) fn into_rule(self) -> Result<AlertRule, ApiError> {
        let condition = decode_condition(&self.condition_type, self.condition_config)?;
        Ok(AlertRule {
            id: self.id,
            name: self.name,
            is_active: self.is_active,
            status: self.status,
            frequency: self.frequency,
            condition,
            action_type: self.action_type,
            created_at: self.created_at,
            last_triggered: self.last_triggered,
            last_checked: self.last_checked,
            portfolio_id: self.portfolio_id,
        })
    }
}

/// Turn the wire's type tag + config bag into the typed condition union
pub(crate) fn decode_condition(
    condition_type: &str,
    config: serde_json::Value,
) -> Result<AlertCondition, ApiError> {
    let decode_err =
        |e: serde_json::Error| ApiError::Decode(format!("{} condition: {}", condition_type, e));

    match condition_type {
        "Drift" => Ok(AlertCondition::Drift(
            serde_json::from_value(config).map_err(decode_err)?,
        )),
        "SectorDrift" => Ok(AlertCondition::SectorDrift(
            serde_json::from_value(config).map_err(decode_err)?,
        )),
        "AssetClassDrift" => Ok(AlertCondition::AssetClassDrift(
            serde_json::from_value(config).map_err(decode_err)?,
        )),
        "PriceMovement" => Ok(AlertCondition::PriceMovement(
            serde_json::from_value(config).map_err(decode_err)?,
        )),
        other => Err(ApiError::Decode(format!(
            "unknown condition type '{}'",
            other
        ))),
    }
}

/// Condition union back to the wire's (type tag, snake_case config) pair
pub(crate) fn encode_condition(condition: &AlertCondition) -> (&'static str, serde_json::Value) {
    match condition {
        AlertCondition::Drift(c) => (
            "Drift",
            serde_json::json!({
                "threshold_percent": c.threshold_percent,
                "drift_type": c.drift_type,
            }),
        ),
        AlertCondition::SectorDrift(c) => (
            "SectorDrift",
            serde_json::json!({
                "threshold_percent": c.threshold_percent,
                "drift_type": c.drift_type,
                "sector_id": c.sector_id,
                "excluded_sectors": c.excluded_sectors,
            }),
        ),
        AlertCondition::AssetClassDrift(c) => (
            "AssetClassDrift",
            serde_json::json!({
                "threshold_percent": c.threshold_percent,
                "drift_type": c.drift_type,
                "asset_class_id": c.asset_class_id,
                "excluded_asset_classes": c.excluded_asset_classes,
            }),
        ),
        AlertCondition::PriceMovement(c) => (
            "PriceMovement",
            serde_json::json!({
                "threshold_percent": c.threshold_percent,
                "security_id": c.security_id,
            }),
        ),
    }
}

/// `GET /alerts/history/` row
#[derive(Debug, Deserialize)]
pub(crate) struct RawAlertHistoryEntry {
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub was_triggered: bool,
    #[serde(default)]
    pub context_data: serde_json::Value,
    #[serde(default)]
    pub action_results: serde_json::Value,
}

impl RawAlertHistoryEntry {
    pub(crate) fn into_entry(self) -> AlertHistoryEntry {
        AlertHistoryEntry {
            triggered_at: self.triggered_at,
            resolved_at: self.resolved_at,
            was_triggered: self.was_triggered,
            context_data: self.context_data,
            action_results: self.action_results,
        }
    }
}
