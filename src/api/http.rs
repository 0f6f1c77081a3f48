//! HTTP implementation of the backend contracts
//!
//! Thin REST client over the dashboard backend. Paths and payload shapes
//! follow the backend's snake_case API; conversion to domain types happens
//! in the parent module. Timeouts and retries are whatever the transport
//! gives us: a timed-out fetch surfaces like any other failed fetch.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{
    normalize_category, ApiError, AlertBackend, DriftSnapshot, PortfolioBackend, RawAlertHistoryEntry,
    RawAlertRule, RawDriftEnvelope,
};
use crate::alerts::{AlertRuleDraft, AlertRulePatch};
use crate::models::{AlertHistoryEntry, AlertRule, CategoryInfo};

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        log::debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        Self::decode(path, response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        log::debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        Self::decode(path, response).await
    }

    async fn patch_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        log::debug!("PATCH {}", url);

        let response = self.client.patch(&url).json(body).send().await?;
        Self::decode(path, response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let url = self.url(path);
        log::debug!("DELETE {}", url);

        let response = self.client.delete(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Backend error for {}: {} - {}", path, status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Backend error for {}: {} - {}", path, status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

/// `POST /portfolio/(sector-)target-allocations/` row
#[derive(Debug, Serialize)]
struct TargetAllocationBody {
    asset_id: i64,
    target_percentage: f64,
}

fn target_bodies(targets: &[(i64, f64)]) -> Vec<TargetAllocationBody> {
    targets
        .iter()
        .map(|(id, pct)| TargetAllocationBody {
            asset_id: *id,
            target_percentage: *pct,
        })
        .collect()
}

/// Full rule body for creates, snake_case per the backend API
fn rule_create_body(draft: &AlertRuleDraft) -> serde_json::Value {
    let (condition_type, condition_config) = super::encode_condition(&draft.condition);
    serde_json::json!({
        "name": draft.name,
        "is_active": draft.is_active,
        "frequency": draft.frequency,
        "condition_type": condition_type,
        "condition_config": condition_config,
        "action_type": draft.action_type,
        "portfolio_id": draft.portfolio_id,
    })
}

/// Sparse rule body for updates: only the fields the patch sets
fn rule_patch_body(patch: &AlertRulePatch) -> serde_json::Value {
    let mut body = serde_json::Map::new();

    if let Some(ref name) = patch.name {
        body.insert("name".to_string(), serde_json::json!(name));
    }
    if let Some(is_active) = patch.is_active {
        body.insert("is_active".to_string(), serde_json::json!(is_active));
    }
    if let Some(frequency) = patch.frequency {
        body.insert("frequency".to_string(), serde_json::json!(frequency));
    }
    if let Some(ref condition) = patch.condition {
        let (condition_type, condition_config) = super::encode_condition(condition);
        body.insert("condition_type".to_string(), serde_json::json!(condition_type));
        body.insert("condition_config".to_string(), condition_config);
    }

    serde_json::Value::Object(body)
}

#[async_trait]
impl PortfolioBackend for HttpBackend {
    async fn fetch_drift(&self) -> Result<DriftSnapshot, ApiError> {
        let envelope: RawDriftEnvelope = self.get_json("/portfolio/drift/").await?;
        Ok(envelope.into_snapshot())
    }

    async fn fetch_asset_classes(&self) -> Result<Vec<CategoryInfo>, ApiError> {
        let categories: Vec<CategoryInfo> = self.get_json("/portfolio/asset-classes/").await?;
        Ok(categories.into_iter().map(normalize_category).collect())
    }

    async fn fetch_sectors(&self) -> Result<Vec<CategoryInfo>, ApiError> {
        let categories: Vec<CategoryInfo> = self.get_json("/portfolio/sectors/").await?;
        Ok(categories.into_iter().map(normalize_category).collect())
    }

    async fn save_target_allocations(
        &self,
        targets: &[(i64, f64)],
    ) -> Result<Vec<CategoryInfo>, ApiError> {
        let categories: Vec<CategoryInfo> = self
            .post_json("/portfolio/target-allocations/", &target_bodies(targets))
            .await?;
        Ok(categories.into_iter().map(normalize_category).collect())
    }

    async fn save_sector_target_allocations(
        &self,
        targets: &[(i64, f64)],
    ) -> Result<Vec<CategoryInfo>, ApiError> {
        let categories: Vec<CategoryInfo> = self
            .post_json(
                "/portfolio/sector-target-allocations/",
                &target_bodies(targets),
            )
            .await?;
        Ok(categories.into_iter().map(normalize_category).collect())
    }
}

#[async_trait]
impl AlertBackend for HttpBackend {
    async fn list_rules(&self) -> Result<Vec<AlertRule>, ApiError> {
        let raw: Vec<RawAlertRule> = self.get_json("/alerts/rules/").await?;
        raw.into_iter().map(RawAlertRule::into_rule).collect()
    }

    async fn create_rule(&self, draft: &AlertRuleDraft) -> Result<AlertRule, ApiError> {
        let raw: RawAlertRule = self
            .post_json("/alerts/rules/", &rule_create_body(draft))
            .await?;
        raw.into_rule()
    }

    async fn update_rule(&self, id: &str, patch: &AlertRulePatch) -> Result<AlertRule, ApiError> {
        let raw: RawAlertRule = self
            .patch_json(&format!("/alerts/rules/{}/", id), &rule_patch_body(patch))
            .await?;
        raw.into_rule()
    }

    async fn delete_rule(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/alerts/rules/{}/", id)).await
    }

    async fn rule_history(&self, rule_id: &str) -> Result<Vec<AlertHistoryEntry>, ApiError> {
        let raw: Vec<RawAlertHistoryEntry> = self
            .get_json(&format!("/alerts/history/?alert_rule={}", rule_id))
            .await?;
        Ok(raw.into_iter().map(RawAlertHistoryEntry::into_entry).collect())
    }
}
