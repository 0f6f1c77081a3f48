//! Read-through cache for alert rules
//!
//! Provides:
//! - TTL-based staleness, checked lazily at read time (no background timer)
//! - Request coalescing: concurrent loads share one backend request
//! - Optimistic create/update/delete recorded in a command log, with
//!   reconciliation against the server response and forced-refresh
//!   compensation on failure
//! - Per-rule-id serialization of mutations (two racing updates for one
//!   rule queue, updates for different rules proceed independently)
//!
//! The store is the sole writer of the rule collection. A failed load
//! never evicts previously cached rules; the UI keeps showing stale data
//! alongside the error until a retry succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::api::{AlertBackend, ApiError};
use crate::models::{AlertHistoryEntry, AlertRule, AlertStatus};

use super::{AlertRuleDraft, AlertRulePatch};

const MUTATION_LOG_CAP: usize = 128;

/// A cached value plus the instant it was fetched
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// Lifecycle position of the cached rule list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Empty,
    Loading,
    Ready,
    Stale,
    Error,
}

/// Read-only view handed to UI surfaces
#[derive(Debug, Clone)]
pub struct RulesSnapshot {
    pub rules: Vec<AlertRule>,
    pub status: CacheStatus,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Load failed; cached data (if any) is still being served
    #[error("could not load alert rules: {0}")]
    Fetch(String),

    /// An optimistic mutation was rolled back
    #[error("alert rule mutation failed: {0}")]
    Mutation(String),

    #[error("no such alert rule: {0}")]
    UnknownRule(String),
}

impl StoreError {
    fn fetch(err: ApiError) -> Self {
        Self::Fetch(err.to_string())
    }

    fn mutation(err: ApiError) -> Self {
        Self::Mutation(err.to_string())
    }
}

// ============================================================================
// Command log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationResolution {
    Pending,
    Confirmed,
    Compensated,
}

/// One optimistic mutation: what was predicted, what it replaced, and how
/// it resolved. Compensation (rollback) works from this record instead of
/// ad-hoc per-call-site refresh logic.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub seq: u64,
    pub kind: MutationKind,
    pub rule_id: String,
    pub predicted: Option<AlertRule>,
    pub previous: Option<AlertRule>,
    pub resolution: MutationResolution,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct AlertStoreConfig {
    /// How long a loaded rule list stays fresh
    pub ttl: Duration,
}

impl Default for AlertStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(4 * 60),
        }
    }
}

struct StoreState {
    cache: Option<CacheEntry<Vec<AlertRule>>>,
    last_error: Option<String>,
    inflight: Option<watch::Receiver<bool>>,
    log: Vec<MutationRecord>,
    next_seq: u64,
}

enum LoadPlan {
    Hit(Vec<AlertRule>),
    Join(watch::Receiver<bool>),
    Lead(watch::Sender<bool>),
}

/// In-memory alert rule store; sole owner and writer of the rule list.
///
/// Constructed with an injected backend so the full lifecycle is testable
/// without a network. Never persisted: a reload starts empty.
pub struct AlertRuleStore {
    backend: Arc<dyn AlertBackend>,
    ttl: Duration,
    state: Mutex<StoreState>,
    mutation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AlertRuleStore {
    pub fn new(backend: Arc<dyn AlertBackend>) -> Self {
        Self::with_config(backend, AlertStoreConfig::default())
    }

    pub fn with_config(backend: Arc<dyn AlertBackend>, config: AlertStoreConfig) -> Self {
        Self {
            backend,
            ttl: config.ttl,
            state: Mutex::new(StoreState {
                cache: None,
                last_error: None,
                inflight: None,
                log: Vec::new(),
                next_seq: 0,
            }),
            mutation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get the rule list, serving from cache while fresh.
    ///
    /// Stale, missing, or forced reads go to the backend; concurrent
    /// callers join the single in-flight request instead of issuing
    /// duplicates and all resolve to the same outcome.
    pub async fn rules(&self, force_refresh: bool) -> Result<Vec<AlertRule>, StoreError> {
        let plan = {
            let mut state = self.state.lock().await;
            if let Some(rx) = &state.inflight {
                LoadPlan::Join(rx.clone())
            } else {
                let fresh = if force_refresh {
                    None
                } else {
                    state
                        .cache
                        .as_ref()
                        .filter(|entry| !entry.is_stale(self.ttl))
                        .map(|entry| entry.value.clone())
                };
                match fresh {
                    Some(rules) => LoadPlan::Hit(rules),
                    None => {
                        let (tx, rx) = watch::channel(false);
                        state.inflight = Some(rx);
                        LoadPlan::Lead(tx)
                    }
                }
            }
        };

        match plan {
            LoadPlan::Hit(rules) => Ok(rules),
            LoadPlan::Join(mut rx) => {
                let _ = rx.changed().await;
                let state = self.state.lock().await;
                match &state.last_error {
                    Some(message) => Err(StoreError::Fetch(message.clone())),
                    None => Ok(state
                        .cache
                        .as_ref()
                        .map(|entry| entry.value.clone())
                        .unwrap_or_default()),
                }
            }
            LoadPlan::Lead(tx) => {
                log::debug!("loading alert rules from backend");
                let result = self.backend.list_rules().await;

                let outcome = {
                    let mut state = self.state.lock().await;
                    state.inflight = None;
                    match result {
                        Ok(rules) => {
                            state.cache = Some(CacheEntry::new(rules.clone()));
                            state.last_error = None;
                            Ok(rules)
                        }
                        Err(err) => {
                            // keep stale data visible; only record the failure
                            log::warn!("alert rule load failed: {}", err);
                            let store_err = StoreError::fetch(err);
                            state.last_error = Some(store_err.to_string());
                            Err(store_err)
                        }
                    }
                };

                let _ = tx.send(true);
                outcome
            }
        }
    }

    /// Current cache view without triggering a load
    pub async fn snapshot(&self) -> RulesSnapshot {
        let state = self.state.lock().await;
        let status = if state.inflight.is_some() {
            CacheStatus::Loading
        } else if state.last_error.is_some() {
            CacheStatus::Error
        } else {
            match &state.cache {
                None => CacheStatus::Empty,
                Some(entry) if entry.is_stale(self.ttl) => CacheStatus::Stale,
                Some(_) => CacheStatus::Ready,
            }
        };

        RulesSnapshot {
            rules: state
                .cache
                .as_ref()
                .map(|entry| entry.value.clone())
                .unwrap_or_default(),
            status,
            error: state.last_error.clone(),
        }
    }

    /// The optimistic command log, oldest first
    pub async fn mutation_log(&self) -> Vec<MutationRecord> {
        self.state.lock().await.log.clone()
    }

    /// Create a rule: applies an optimistic entry under a synthesized
    /// temporary id, then reconciles it with the server's authoritative
    /// rule. On failure the optimistic entry is rolled back and a forced
    /// refresh restores server truth.
    pub async fn create(&self, draft: AlertRuleDraft) -> Result<AlertRule, StoreError> {
        let temp_id = format!("pending-{}", Uuid::new_v4());
        let optimistic = AlertRule {
            id: temp_id.clone(),
            name: draft.name.clone(),
            is_active: draft.is_active,
            status: AlertStatus::Active,
            frequency: draft.frequency,
            condition: draft.condition.clone(),
            action_type: draft.action_type,
            created_at: Utc::now(),
            last_triggered: None,
            last_checked: None,
            portfolio_id: draft.portfolio_id,
        };

        let seq = {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.cache.as_mut() {
                entry.value.push(optimistic.clone());
            }
            record(
                &mut state,
                MutationKind::Create,
                temp_id.clone(),
                Some(optimistic),
                None,
            )
        };

        match self.backend.create_rule(&draft).await {
            Ok(server_rule) => {
                let matched = {
                    let mut state = self.state.lock().await;
                    resolve(&mut state, seq, MutationResolution::Confirmed);
                    replace_by_id(&mut state, &temp_id, server_rule.clone())
                };
                if !matched {
                    // entry vanished under a concurrent refresh
                    let _ = self.rules(true).await;
                }
                Ok(server_rule)
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().await;
                    resolve(&mut state, seq, MutationResolution::Compensated);
                    if let Some(entry) = state.cache.as_mut() {
                        entry.value.retain(|rule| rule.id != temp_id);
                    }
                }
                log::warn!("rule create failed, rolling back: {}", err);
                let _ = self.rules(true).await;
                Err(StoreError::mutation(err))
            }
        }
    }

    /// Update a rule: optimistic local patch, reconciled by id against the
    /// server response, rolled back via forced refresh on failure.
    pub async fn update(&self, id: &str, patch: AlertRulePatch) -> Result<AlertRule, StoreError> {
        let _guard = self.mutation_guard(id).await;

        let previous = {
            let state = self.state.lock().await;
            state.cache.as_ref().and_then(|entry| {
                entry.value.iter().find(|rule| rule.id == id).cloned()
            })
        };

        let seq = {
            let mut state = self.state.lock().await;
            let predicted = previous.clone().map(|rule| apply_patch(rule, &patch));
            if let Some(ref rule) = predicted {
                replace_by_id(&mut state, id, rule.clone());
            }
            record(
                &mut state,
                MutationKind::Update,
                id.to_string(),
                predicted,
                previous.clone(),
            )
        };

        match self.backend.update_rule(id, &patch).await {
            Ok(server_rule) => {
                let matched = {
                    let mut state = self.state.lock().await;
                    resolve(&mut state, seq, MutationResolution::Confirmed);
                    replace_by_id(&mut state, id, server_rule.clone())
                };
                if !matched {
                    let _ = self.rules(true).await;
                }
                Ok(server_rule)
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().await;
                    resolve(&mut state, seq, MutationResolution::Compensated);
                    if let Some(ref rule) = previous {
                        replace_by_id(&mut state, id, rule.clone());
                    }
                }
                log::warn!("rule update failed for {}, rolling back: {}", id, err);
                let _ = self.rules(true).await;
                Err(StoreError::mutation(err))
            }
        }
    }

    /// Flip a rule's active flag through the optimistic update path
    pub async fn toggle(&self, id: &str) -> Result<AlertRule, StoreError> {
        let rules = self.rules(false).await?;
        let current = rules
            .iter()
            .find(|rule| rule.id == id)
            .ok_or_else(|| StoreError::UnknownRule(id.to_string()))?;

        self.update(id, AlertRulePatch::set_active(!current.is_active))
            .await
    }

    /// Delete a rule: optimistic removal, restored via forced refresh on
    /// failure.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.mutation_guard(id).await;

        let (previous, seq) = {
            let mut state = self.state.lock().await;
            let previous = state.cache.as_mut().and_then(|entry| {
                let index = entry.value.iter().position(|rule| rule.id == id)?;
                Some(entry.value.remove(index))
            });
            let seq = record(
                &mut state,
                MutationKind::Delete,
                id.to_string(),
                None,
                previous.clone(),
            );
            (previous, seq)
        };

        match self.backend.delete_rule(id).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                resolve(&mut state, seq, MutationResolution::Confirmed);
                Ok(())
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().await;
                    resolve(&mut state, seq, MutationResolution::Compensated);
                    if let (Some(entry), Some(rule)) = (state.cache.as_mut(), previous) {
                        entry.value.push(rule);
                    }
                }
                log::warn!("rule delete failed for {}, rolling back: {}", id, err);
                let _ = self.rules(true).await;
                Err(StoreError::mutation(err))
            }
        }
    }

    /// Evaluation history for one rule. Append-only server state, so it is
    /// passed through uncached.
    pub async fn history(&self, rule_id: &str) -> Result<Vec<AlertHistoryEntry>, StoreError> {
        self.backend
            .rule_history(rule_id)
            .await
            .map_err(StoreError::fetch)
    }

    /// Serialize mutations per rule id; mutations for different ids run
    /// independently
    async fn mutation_guard(&self, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.mutation_locks.lock().await;
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

fn record(
    state: &mut StoreState,
    kind: MutationKind,
    rule_id: String,
    predicted: Option<AlertRule>,
    previous: Option<AlertRule>,
) -> u64 {
    let seq = state.next_seq;
    state.next_seq += 1;
    state.log.push(MutationRecord {
        seq,
        kind,
        rule_id,
        predicted,
        previous,
        resolution: MutationResolution::Pending,
    });
    if state.log.len() > MUTATION_LOG_CAP {
        let excess = state.log.len() - MUTATION_LOG_CAP;
        state.log.drain(..excess);
    }
    seq
}

fn resolve(state: &mut StoreState, seq: u64, resolution: MutationResolution) {
    if let Some(entry) = state.log.iter_mut().find(|entry| entry.seq == seq) {
        entry.resolution = resolution;
    }
}

/// Replace the cached rule with the given id; false when no entry matched
fn replace_by_id(state: &mut StoreState, id: &str, rule: AlertRule) -> bool {
    match state.cache.as_mut() {
        Some(entry) => match entry.value.iter_mut().find(|cached| cached.id == id) {
            Some(slot) => {
                *slot = rule;
                true
            }
            None => false,
        },
        None => false,
    }
}

fn apply_patch(mut rule: AlertRule, patch: &AlertRulePatch) -> AlertRule {
    if let Some(ref name) = patch.name {
        rule.name = name.clone();
    }
    if let Some(active) = patch.is_active {
        rule.is_active = active;
    }
    if let Some(frequency) = patch.frequency {
        rule.frequency = frequency;
    }
    if let Some(ref condition) = patch.condition {
        rule.condition = condition.clone();
    }
    rule
}
