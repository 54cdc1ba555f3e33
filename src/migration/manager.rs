//! Façade over flags, health, rollback, experiments and graph selection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::ab_test::{ABTestManager, Experiment};
use super::env_loader::{EnvironmentLoader, OverrideReport};
use super::flags::{FeatureFlag, FeatureFlags};
use super::graph::{GraphBuilders, GraphType};
use super::health::{HealthMonitor, HealthReport};
use super::rollback::{RollbackState, RollbackTriggers};
use super::rollout::RolloutCalculator;
use super::selector::{GraphSelectionResult, GraphSelector, SelectionStats};
use crate::config::{HealthConfig, RolloutConfig};
use crate::events::{Event, EventBus, EventPriority, EventType};
use crate::storage::AuditStorage;

const EVENT_SOURCE: &str = "migration_manager";

/// Point-in-time view of the migration system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub flags: Vec<FeatureFlag>,
    pub rollback: RollbackState,
    pub health: HealthReport,
    pub selection_stats: SelectionStats,
    pub active_experiments: Vec<Experiment>,
}

/// Owns the migration services and wires them to audit storage and the bus.
pub struct MigrationManager {
    flags: Arc<FeatureFlags>,
    health: Arc<HealthMonitor>,
    rollback: Arc<RollbackTriggers>,
    ab_tests: Arc<ABTestManager>,
    selector: GraphSelector,
    storage: Option<Arc<dyn AuditStorage>>,
    bus: Option<Arc<EventBus>>,
}

impl MigrationManager {
    pub fn new(rollout: &RolloutConfig, health: HealthConfig, builders: GraphBuilders) -> Self {
        let calculator = RolloutCalculator::new(rollout.seed.clone());
        let flags = Arc::new(FeatureFlags::with_defaults(calculator.clone()));
        let health = Arc::new(HealthMonitor::new(health));
        let rollback = Arc::new(RollbackTriggers::new(Arc::clone(&health)));
        let ab_tests = Arc::new(ABTestManager::new(calculator));
        let selector = GraphSelector::new(
            builders,
            Arc::clone(&flags),
            Arc::clone(&rollback),
            Arc::clone(&ab_tests),
        );
        Self {
            flags,
            health,
            rollback,
            ab_tests,
            selector,
            storage: None,
            bus: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn AuditStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Apply `HYBRID_FLAG_*` overrides from the given pairs.
    pub fn with_env_overrides<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        EnvironmentLoader::apply_overrides(&self.flags, vars);
        self
    }

    /// Apply `HYBRID_FLAG_*` overrides from the process environment.
    pub fn apply_process_env(&self) -> OverrideReport {
        EnvironmentLoader::apply_process_env(&self.flags)
    }

    pub fn flags(&self) -> &Arc<FeatureFlags> {
        &self.flags
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn rollback(&self) -> &Arc<RollbackTriggers> {
        &self.rollback
    }

    pub fn ab_tests(&self) -> &Arc<ABTestManager> {
        &self.ab_tests
    }

    pub fn selector(&self) -> &GraphSelector {
        &self.selector
    }

    /// Select a graph, then audit and announce the outcome.
    ///
    /// Audit and bus failures are logged and never change the result.
    pub async fn select_graph(
        &self,
        investigation_id: &str,
        entity_type: Option<&str>,
        force_graph_type: Option<GraphType>,
    ) -> GraphSelectionResult {
        let result =
            self.selector
                .select_investigation_graph(investigation_id, entity_type, force_graph_type);

        match &result {
            GraphSelectionResult::Success { spec, .. } => {
                if let Some(storage) = &self.storage {
                    if let Some(record) = self.selector.get_selection_record(investigation_id) {
                        if let Err(e) = storage.record_selection(&record).await {
                            warn!(investigation_id = investigation_id, error = %e, "Selection not persisted");
                        }
                    }
                }
                self.emit(
                    Event::new(EventType::GraphSelected, EVENT_SOURCE)
                        .with_investigation(investigation_id)
                        .with_data(json!({
                            "graph_type": spec.graph_type,
                            "selection_reason": spec.selection_reason,
                            "fallback_occurred": spec.fallback_occurred,
                        })),
                );
            }
            GraphSelectionResult::Failure {
                error,
                attempted_graph_type,
                ..
            } => {
                self.emit(
                    Event::new(EventType::GraphSelectionFailed, EVENT_SOURCE)
                        .with_investigation(investigation_id)
                        .with_priority(EventPriority::Critical)
                        .with_data(json!({
                            "attempted_graph_type": attempted_graph_type,
                            "error": error,
                        })),
                );
            }
        }
        result
    }

    /// Feed an investigation outcome into health and experiment tracking.
    ///
    /// Returns `true` if this outcome caused rollback to latch.
    pub fn record_investigation_outcome(
        &self,
        investigation_id: &str,
        success: bool,
        duration_ms: f64,
        safety_override: bool,
    ) -> bool {
        self.health.record_request(success, duration_ms, safety_override);
        self.ab_tests.record_outcome(investigation_id, success, duration_ms);

        let was_active = self.rollback.is_rollback_active();
        let (active, report) = self.rollback.evaluate();
        if active && !was_active {
            self.emit_rollback_triggered(&self.rollback.state(), Some(&report));
            return true;
        }
        false
    }

    pub fn trigger_rollback(&self, reason: &str) {
        let was_active = self.rollback.is_rollback_active();
        self.rollback.trigger_rollback(reason);
        if !was_active {
            self.emit_rollback_triggered(&self.rollback.state(), None);
        }
    }

    /// Clear rollback. Returns `true` if one was active.
    pub fn clear_rollback(&self) -> bool {
        let cleared = self.rollback.clear_rollback();
        if cleared {
            self.emit(Event::new(EventType::RollbackCleared, EVENT_SOURCE));
        }
        cleared
    }

    pub fn status(&self) -> MigrationStatus {
        MigrationStatus {
            flags: self.flags.list(),
            rollback: self.rollback.state(),
            health: self.health.health_report(),
            selection_stats: self.selector.get_selection_stats(),
            active_experiments: self.ab_tests.active_experiments(),
        }
    }

    fn emit_rollback_triggered(&self, state: &RollbackState, report: Option<&HealthReport>) {
        self.emit(
            Event::new(EventType::RollbackTriggered, EVENT_SOURCE)
                .with_priority(EventPriority::Critical)
                .with_data(json!({
                    "trigger_reason": state.trigger_reason,
                    "activated_at": state.activated_at,
                    "breaches": report.map(HealthReport::breaches).unwrap_or_default(),
                })),
        );
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(event) {
                warn!(error = %e, "Migration event not published");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::error::StorageError;
    use crate::events::EventFilter;
    use crate::migration::flags::HYBRID_GRAPH_V1;
    use crate::migration::SelectionReason;
    use crate::storage::MockAuditStorage;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn manager() -> MigrationManager {
        MigrationManager::new(
            &RolloutConfig::default(),
            HealthConfig::default(),
            GraphBuilders::standard(),
        )
    }

    #[tokio::test]
    async fn test_selection_is_audited() {
        let mut storage = MockAuditStorage::new();
        storage
            .expect_record_selection()
            .withf(|r| r.investigation_id == "inv-1" && r.graph_type == GraphType::Clean)
            .times(1)
            .returning(|_| Ok(()));

        let mgr = manager().with_storage(Arc::new(storage));
        let result = mgr.select_graph("inv-1", Some("user"), None).await;
        assert!(result.is_success());
        assert_eq!(result.spec().map(|s| s.selection_reason), Some(SelectionReason::Default));
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_fail_selection() {
        let mut storage = MockAuditStorage::new();
        storage.expect_record_selection().returning(|_| {
            Err(StorageError::Query {
                message: "disk full".into(),
            })
        });

        let mgr = manager().with_storage(Arc::new(storage));
        assert!(mgr.select_graph("inv-1", None, None).await.is_success());
    }

    #[tokio::test]
    async fn test_rollback_events_and_selection() {
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        let (_id, mut rx) = bus.subscribe(EventFilter::for_types([
            EventType::RollbackTriggered,
            EventType::RollbackCleared,
        ]));
        bus.start();

        let mgr = manager().with_event_bus(Arc::clone(&bus));
        mgr.trigger_rollback("manual drill");
        mgr.trigger_rollback("again");

        let result = mgr.select_graph("inv-2", None, Some(GraphType::Hybrid)).await;
        // Forced selection wins over rollback.
        assert_eq!(result.graph_type(), GraphType::Hybrid);
        let result = mgr.select_graph("inv-3", None, None).await;
        assert_eq!(result.spec().map(|s| s.selection_reason), Some(SelectionReason::Rollback));

        assert!(mgr.clear_rollback());
        assert!(!mgr.clear_rollback());

        let first = assert_ok!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await);
        assert_eq!(first.map(|e| e.event_type), Some(EventType::RollbackTriggered));
        let second = assert_ok!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await);
        assert_eq!(second.map(|e| e.event_type), Some(EventType::RollbackCleared));

        bus.stop().await;
    }

    #[test]
    fn test_outcomes_latch_rollback() {
        let mgr = manager();
        for _ in 0..10 {
            mgr.record_investigation_outcome("inv", true, 100.0, false);
        }
        assert!(!mgr.rollback().is_rollback_active());

        let mut latched = false;
        for _ in 0..10 {
            latched |= mgr.record_investigation_outcome("inv", false, 100.0, false);
        }
        assert!(latched);
        assert!(mgr.status().rollback.rollback_active);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_latch_rollback() {
        let mgr = manager();
        assert!(!mgr.record_investigation_outcome("inv-1", false, 100.0, false));
        assert!(!mgr.rollback().is_rollback_active());

        let select = mgr.select_graph("inv-2", None, None).await;
        assert_ne!(
            select.spec().map(|s| s.selection_reason),
            Some(SelectionReason::Rollback)
        );
    }

    #[test]
    fn test_env_overrides() {
        let mgr = manager().with_env_overrides([
            ("HYBRID_FLAG_HYBRID_GRAPH_V1", "true"),
            ("HYBRID_FLAG_HYBRID_GRAPH_V1_PERCENTAGE", "100"),
        ]);
        assert!(mgr.flags().is_enabled(HYBRID_GRAPH_V1, "any"));
        let status = mgr.status();
        assert!(status.flags.iter().any(|f| f.name == HYBRID_GRAPH_V1 && f.enabled));
    }
}
