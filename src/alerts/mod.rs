//! Alert rule management
//!
//! The store in this module owns the in-memory rule collection: UI
//! surfaces observe read-only snapshots and dispatch create/update/delete
//! intents instead of mutating shared state. Mutations apply optimistically
//! and reconcile against the backend's response.

pub mod store;

pub use store::{
    AlertRuleStore, AlertStoreConfig, CacheEntry, CacheStatus, MutationKind, MutationRecord,
    MutationResolution, RulesSnapshot, StoreError,
};

use serde::{Deserialize, Serialize};

use crate::models::{AlertAction, AlertCondition, AlertFrequency};

/// Payload for creating a new alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRuleDraft {
    pub name: String,
    pub is_active: bool,
    pub frequency: AlertFrequency,
    #[serde(flatten)]
    pub condition: AlertCondition,
    pub action_type: AlertAction,
    pub portfolio_id: Option<i64>,
}

/// Partial update of an existing rule; unset fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<AlertFrequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<AlertCondition>,
}

impl AlertRulePatch {
    /// Shorthand for the activate/pause toggle
    pub fn set_active(active: bool) -> Self {
        Self {
            is_active: Some(active),
            ..Self::default()
        }
    }
}
