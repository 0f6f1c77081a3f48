//! Drift dashboard coordination
//!
//! Pulls the pieces together for the dashboard surfaces: fetch drift data,
//! aggregate it per bucket, evaluate the user's drift alert rules against
//! it, and expose the result as one state machine:
//!
//! ```text
//! initializing ─→ ready
//!        │  ╲
//!        │   ─→ setup_required ─┐
//!        └────→ error ──────────┤
//!               ▲               │
//!               └── explicit user refresh
//! ```
//!
//! `setup_required` still carries the current (non-target) allocations so
//! the user sees where they are before defining where they want to be.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::alerts::AlertRuleStore;
use crate::api::{ApiError, DriftReport, DriftSnapshot, PortfolioBackend};
use crate::drift::{self, threshold, BucketAggregate};
use crate::models::{AlertRule, AllocationBucket, CategoryInfo, DriftItem, DriftMode};
use crate::rebalance::{TargetEditor, ValidationError};

#[derive(Debug, Error)]
pub enum DashboardError {
    /// Local pre-submission failure; nothing was sent to the backend
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The overall bucket is derived from the others and has no editable
    /// targets of its own
    #[error("targets for the overall bucket are derived, not editable")]
    UnsupportedBucket,
}

/// Where the dashboard currently is
#[derive(Debug, Clone)]
pub enum DashboardState {
    Initializing,
    /// No target allocations defined yet; route the user to the allocation
    /// editor rather than retrying
    SetupRequired {
        message: String,
        current_allocations: Vec<DriftItem>,
    },
    /// Generic failure; retry is the recovery path
    Error { message: String },
    Ready(DashboardView),
}

impl DashboardState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Everything the dashboard surfaces render from
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub report: DriftReport,
    pub buckets: Vec<BucketSummary>,
    pub alert_cards: Vec<AlertCard>,
}

/// One bucket's presentation figures
#[derive(Debug, Clone)]
pub struct BucketSummary {
    pub bucket: AllocationBucket,
    pub aggregate: BucketAggregate,
    pub weighted_relative_drift: f64,
}

/// Client-side preview of one drift rule against the fetched data.
///
/// The backend owns authoritative rule evaluation on its own cycle; this
/// preview feeds the alert cards between cycles. Evaluation is at bucket
/// granularity: drift rows carry no category ids, so id-scoped rule
/// filters apply server-side only.
#[derive(Debug, Clone)]
pub struct AlertCard {
    pub rule: AlertRule,
    pub bucket: AllocationBucket,
    /// `None` when the watched bucket is absent from the fetched data
    pub severity: Option<threshold::Severity>,
    pub exceeded: bool,
    /// Name of the row drifting furthest under the rule's mode
    pub worst_item: Option<String>,
}

/// Serializable severity roll-up for badge rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftHealth {
    Nominal,
    Exceeded,
}

/// Orchestrates drift fetching, aggregation, and alert preview for the
/// dashboard. Backends are constructor-injected; all consumers observe
/// `current()` and dispatch `refresh()`.
pub struct DriftCoordinator {
    portfolio: Arc<dyn PortfolioBackend>,
    alerts: Arc<AlertRuleStore>,
    state: Mutex<DashboardState>,
}

impl DriftCoordinator {
    pub fn new(portfolio: Arc<dyn PortfolioBackend>, alerts: Arc<AlertRuleStore>) -> Self {
        Self {
            portfolio,
            alerts,
            state: Mutex::new(DashboardState::Initializing),
        }
    }

    /// The current dashboard state
    pub async fn current(&self) -> DashboardState {
        self.state.lock().await.clone()
    }

    /// Re-enter `initializing` and rebuild the dashboard state. This is
    /// the single recovery edge out of both `setup_required` and `error`.
    pub async fn refresh(&self, mode: DriftMode) -> DashboardState {
        {
            let mut state = self.state.lock().await;
            *state = DashboardState::Initializing;
        }

        let next = self.build_state(mode).await;

        let mut state = self.state.lock().await;
        *state = next.clone();
        next
    }

    async fn build_state(&self, mode: DriftMode) -> DashboardState {
        let snapshot = match self.portfolio.fetch_drift().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("drift fetch failed: {}", err);
                return DashboardState::Error {
                    message: err.to_string(),
                };
            }
        };

        let report = match snapshot {
            DriftSnapshot::SetupRequired {
                message,
                current_allocations,
            } => {
                return DashboardState::SetupRequired {
                    message,
                    current_allocations,
                }
            }
            DriftSnapshot::Data(report) if report.is_empty() => {
                // backend sent data-shaped nothing; same user journey as
                // the explicit setup signal
                return DashboardState::SetupRequired {
                    message: "No target allocations defined".to_string(),
                    current_allocations: Vec::new(),
                };
            }
            DriftSnapshot::Data(report) => report,
        };

        // a rules failure must not take the drift view down with it; fall
        // back to whatever the store still has cached
        let rules = match self.alerts.rules(false).await {
            Ok(rules) => rules,
            Err(err) => {
                log::warn!("alert rules unavailable for dashboard: {}", err);
                self.alerts.snapshot().await.rules
            }
        };

        DashboardState::Ready(build_view(report, &rules, mode))
    }

    /// Category catalog backing the allocation editor for a bucket
    pub async fn categories(
        &self,
        bucket: AllocationBucket,
    ) -> Result<Vec<CategoryInfo>, DashboardError> {
        match bucket {
            AllocationBucket::AssetClass => Ok(self.portfolio.fetch_asset_classes().await?),
            AllocationBucket::Sector => Ok(self.portfolio.fetch_sectors().await?),
            AllocationBucket::Overall => Err(DashboardError::UnsupportedBucket),
        }
    }

    /// Persist the editor's targets for a bucket.
    ///
    /// Validation runs first and a failing sum blocks the network call
    /// entirely; auto-balance is never applied implicitly here.
    pub async fn save_targets(
        &self,
        bucket: AllocationBucket,
        editor: &TargetEditor,
    ) -> Result<Vec<CategoryInfo>, DashboardError> {
        let targets = editor.submission()?;
        let saved = match bucket {
            AllocationBucket::AssetClass => {
                self.portfolio.save_target_allocations(&targets).await?
            }
            AllocationBucket::Sector => {
                self.portfolio
                    .save_sector_target_allocations(&targets)
                    .await?
            }
            AllocationBucket::Overall => return Err(DashboardError::UnsupportedBucket),
        };

        log::info!(
            "saved {} target allocations for {}",
            targets.len(),
            bucket.as_str()
        );
        Ok(saved)
    }
}

fn build_view(report: DriftReport, rules: &[AlertRule], mode: DriftMode) -> DashboardView {
    let buckets = AllocationBucket::all()
        .iter()
        .filter_map(|bucket| {
            let data = report.bucket(*bucket)?;
            Some(BucketSummary {
                bucket: *bucket,
                aggregate: drift::aggregate(&data.items, mode),
                weighted_relative_drift: drift::weighted_relative_drift(&data.items),
            })
        })
        .collect();

    let alert_cards = rules
        .iter()
        .filter(|rule| rule.is_active)
        .filter_map(|rule| evaluate_rule(rule, &report))
        .collect();

    DashboardView {
        report,
        buckets,
        alert_cards,
    }
}

/// Preview one rule against the report; `None` for conditions the client
/// does not evaluate (price movement and friends)
fn evaluate_rule(rule: &AlertRule, report: &DriftReport) -> Option<AlertCard> {
    let (threshold_percent, mode) = rule.condition.drift_threshold()?;
    let bucket = rule.condition.bucket()?;

    let Some(data) = report.bucket(bucket) else {
        return Some(AlertCard {
            rule: rule.clone(),
            bucket,
            severity: None,
            exceeded: false,
            worst_item: None,
        });
    };

    let rows: Vec<DriftItem> = data
        .items
        .iter()
        .filter(|item| !drift::is_rollup_row(item))
        .cloned()
        .collect();
    let sorted = drift::sort_by_magnitude(&rows, mode);
    let worst = sorted.first();

    let severity = worst.map(|item| threshold::classify_item(item, threshold_percent, mode));
    let exceeded = rows
        .iter()
        .any(|item| threshold::item_exceeds(item, threshold_percent, mode));

    Some(AlertCard {
        rule: rule.clone(),
        bucket,
        severity,
        exceeded,
        worst_item: worst.map(|item| item.name.clone()),
    })
}

/// Badge-level roll-up over a view's alert cards
pub fn health_of(view: &DashboardView) -> DriftHealth {
    if view.alert_cards.iter().any(|card| card.exceeded) {
        DriftHealth::Exceeded
    } else {
        DriftHealth::Nominal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertRuleDraft;
    use crate::api::AlertBackend;
    use crate::models::{
        AlertAction, AlertCondition, AlertFrequency, AlertHistoryEntry, AlertStatus, DriftData,
        SectorDriftConfig,
    };
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn item(name: &str, current: f64, target: f64) -> DriftItem {
        let absolute = current - target;
        DriftItem {
            name: name.to_string(),
            current_allocation: current,
            target_allocation: target,
            absolute_drift: absolute,
            relative_drift: crate::allocation::relative_drift_of(current, target, absolute),
        }
    }

    fn sector_report() -> DriftReport {
        let items = vec![
            item("Technology", 32.5, 25.0),
            item("Healthcare", 12.8, 15.0),
        ];
        DriftReport {
            sector: Some(DriftData {
                portfolio_id: 12,
                portfolio_name: "Main".to_string(),
                last_updated: None,
                total_absolute_drift: drift::total_absolute_drift(&items),
                items,
            }),
            ..Default::default()
        }
    }

    fn sector_rule(threshold_percent: f64) -> AlertRule {
        AlertRule {
            id: "r1".to_string(),
            name: "Sector drift".to_string(),
            is_active: true,
            status: AlertStatus::Active,
            frequency: AlertFrequency::Daily,
            condition: AlertCondition::SectorDrift(SectorDriftConfig {
                threshold_percent,
                drift_type: DriftMode::Absolute,
                sector_id: None,
                excluded_sectors: vec![],
            }),
            action_type: AlertAction::Notification,
            created_at: Utc::now(),
            last_triggered: None,
            last_checked: None,
            portfolio_id: Some(12),
        }
    }

    struct FakePortfolio {
        fail: AtomicBool,
        setup_required: AtomicBool,
    }

    impl FakePortfolio {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                setup_required: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl PortfolioBackend for FakePortfolio {
        async fn fetch_drift(&self) -> Result<DriftSnapshot, ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            if self.setup_required.load(Ordering::SeqCst) {
                return Ok(DriftSnapshot::SetupRequired {
                    message: "No target allocations defined".to_string(),
                    current_allocations: vec![item("Technology", 40.0, 0.0)],
                });
            }
            Ok(DriftSnapshot::Data(sector_report()))
        }

        async fn fetch_asset_classes(&self) -> Result<Vec<CategoryInfo>, ApiError> {
            Ok(vec![])
        }

        async fn fetch_sectors(&self) -> Result<Vec<CategoryInfo>, ApiError> {
            Ok(vec![CategoryInfo {
                id: 3,
                name: "Technology".to_string(),
                description: None,
                target_allocation: Some(25.0),
                current_allocation: Some(32.5),
            }])
        }

        async fn save_target_allocations(
            &self,
            _targets: &[(i64, f64)],
        ) -> Result<Vec<CategoryInfo>, ApiError> {
            Ok(vec![])
        }

        async fn save_sector_target_allocations(
            &self,
            targets: &[(i64, f64)],
        ) -> Result<Vec<CategoryInfo>, ApiError> {
            Ok(targets
                .iter()
                .map(|(id, pct)| CategoryInfo {
                    id: *id,
                    name: format!("Sector {}", id),
                    description: None,
                    target_allocation: Some(*pct),
                    current_allocation: None,
                })
                .collect())
        }
    }

    struct FakeAlerts {
        rules: Vec<AlertRule>,
    }

    #[async_trait::async_trait]
    impl AlertBackend for FakeAlerts {
        async fn list_rules(&self) -> Result<Vec<AlertRule>, ApiError> {
            Ok(self.rules.clone())
        }

        async fn create_rule(&self, _draft: &AlertRuleDraft) -> Result<AlertRule, ApiError> {
            unimplemented!("not exercised")
        }

        async fn update_rule(
            &self,
            _id: &str,
            _patch: &crate::alerts::AlertRulePatch,
        ) -> Result<AlertRule, ApiError> {
            unimplemented!("not exercised")
        }

        async fn delete_rule(&self, _id: &str) -> Result<(), ApiError> {
            unimplemented!("not exercised")
        }

        async fn rule_history(&self, _rule_id: &str) -> Result<Vec<AlertHistoryEntry>, ApiError> {
            Ok(vec![])
        }
    }

    fn coordinator(
        portfolio: Arc<FakePortfolio>,
        rules: Vec<AlertRule>,
    ) -> DriftCoordinator {
        let alerts = Arc::new(AlertRuleStore::new(Arc::new(FakeAlerts { rules })));
        DriftCoordinator::new(portfolio, alerts)
    }

    #[tokio::test]
    async fn end_to_end_sector_scenario() {
        let coordinator = coordinator(FakePortfolio::new(), vec![sector_rule(5.0)]);

        let state = coordinator.refresh(DriftMode::Absolute).await;
        let view = match state {
            DashboardState::Ready(view) => view,
            other => panic!("expected ready, got {:?}", other),
        };

        let sector = view
            .buckets
            .iter()
            .find(|b| b.bucket == AllocationBucket::Sector)
            .unwrap();
        assert!(sector.aggregate.total_absolute_drift >= 9.7 - 1e-9);
        assert_eq!(sector.aggregate.sorted_by_magnitude[0].name, "Technology");

        let card = &view.alert_cards[0];
        assert!(card.exceeded, "Technology drifts 7.5 against a 5% threshold");
        assert_eq!(card.severity, Some(threshold::Severity::Critical));
        assert_eq!(card.worst_item.as_deref(), Some("Technology"));
        assert_eq!(health_of(&view), DriftHealth::Exceeded);
    }

    #[tokio::test]
    async fn tight_threshold_flags_only_exceeding_rows() {
        // healthcare drifts -2.2: inside a 5% threshold, outside a 2% one
        let coordinator = coordinator(FakePortfolio::new(), vec![sector_rule(8.0)]);

        let state = coordinator.refresh(DriftMode::Absolute).await;
        let view = match state {
            DashboardState::Ready(view) => view,
            other => panic!("expected ready, got {:?}", other),
        };

        let card = &view.alert_cards[0];
        assert!(!card.exceeded, "worst drift 7.5 stays inside 8%");
        assert_eq!(card.severity, Some(threshold::Severity::Elevated));
    }

    #[tokio::test]
    async fn setup_required_carries_current_allocations() {
        let portfolio = FakePortfolio::new();
        portfolio.setup_required.store(true, Ordering::SeqCst);
        let coordinator = coordinator(portfolio, vec![]);

        let state = coordinator.refresh(DriftMode::Absolute).await;
        match state {
            DashboardState::SetupRequired {
                current_allocations,
                ..
            } => {
                assert_eq!(current_allocations.len(), 1);
                assert_eq!(current_allocations[0].current_allocation, 40.0);
            }
            other => panic!("expected setup-required, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_state_recovers_via_refresh() {
        let portfolio = FakePortfolio::new();
        portfolio.fail.store(true, Ordering::SeqCst);
        let coordinator = coordinator(portfolio.clone(), vec![sector_rule(5.0)]);

        let state = coordinator.refresh(DriftMode::Absolute).await;
        assert!(matches!(state, DashboardState::Error { .. }));

        portfolio.fail.store(false, Ordering::SeqCst);
        let recovered = coordinator.refresh(DriftMode::Absolute).await;
        assert!(recovered.is_ready());
        assert!(coordinator.current().await.is_ready());
    }

    #[tokio::test]
    async fn save_targets_blocks_invalid_sums_locally() {
        let coordinator = coordinator(FakePortfolio::new(), vec![]);

        let mut editor = TargetEditor::new();
        editor.set(3, 60.0); // 40 points short

        let result = coordinator
            .save_targets(AllocationBucket::Sector, &editor)
            .await;
        assert!(matches!(result, Err(DashboardError::Validation(_))));

        editor.auto_balance();
        let saved = coordinator
            .save_targets(AllocationBucket::Sector, &editor)
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].target_allocation, Some(100.0));
    }

    #[tokio::test]
    async fn overall_bucket_has_no_editable_targets() {
        let coordinator = coordinator(FakePortfolio::new(), vec![]);
        let result = coordinator.categories(AllocationBucket::Overall).await;
        assert!(matches!(result, Err(DashboardError::UnsupportedBucket)));
    }
}
