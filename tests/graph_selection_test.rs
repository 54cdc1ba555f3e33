//! Integration tests for graph selection precedence, rollback and experiments.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use hybrid_investigation::config::{HealthConfig, RolloutConfig};
use hybrid_investigation::migration::{
    ABTestManager, CleanGraphBuilder, FeatureFlags, GraphBuilders, GraphSelector, GraphType,
    HealthMonitor, HybridGraphBuilder, MigrationManager, RollbackTriggers, RolloutCalculator,
    SelectionReason, HYBRID_GRAPH_V1,
};

struct Harness {
    flags: Arc<FeatureFlags>,
    rollback: Arc<RollbackTriggers>,
    ab_tests: Arc<ABTestManager>,
    selector: GraphSelector,
}

fn harness(builders: GraphBuilders) -> Harness {
    let calculator = RolloutCalculator::new("test-seed");
    let flags = Arc::new(FeatureFlags::with_defaults(calculator.clone()));
    let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
    let rollback = Arc::new(RollbackTriggers::new(health));
    let ab_tests = Arc::new(ABTestManager::new(calculator));
    let selector = GraphSelector::new(
        builders,
        Arc::clone(&flags),
        Arc::clone(&rollback),
        Arc::clone(&ab_tests),
    );
    Harness {
        flags,
        rollback,
        ab_tests,
        selector,
    }
}

#[cfg(test)]
mod precedence_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_clean_graph() {
        let h = harness(GraphBuilders::standard());
        let result = h.selector.select_investigation_graph("inv-1", Some("user"), None);

        assert!(result.is_success());
        assert_eq!(result.graph_type(), GraphType::Clean);
        let spec = result.spec().unwrap();
        assert_eq!(spec.selection_reason, SelectionReason::Default);
        assert!(!spec.fallback_occurred);
    }

    #[test]
    fn test_full_rollout_selects_hybrid() {
        let h = harness(GraphBuilders::standard());
        h.flags.enable_flag(HYBRID_GRAPH_V1, 100).unwrap();

        for i in 0..20 {
            let result = h
                .selector
                .select_investigation_graph(&format!("inv-{}", i), None, None);
            assert_eq!(result.graph_type(), GraphType::Hybrid);
            assert_eq!(
                result.spec().map(|s| s.selection_reason),
                Some(SelectionReason::FeatureFlag)
            );
        }
    }

    #[test]
    fn test_partial_rollout_is_sticky_per_investigation() {
        let h = harness(GraphBuilders::standard());
        h.flags.enable_flag(HYBRID_GRAPH_V1, 50).unwrap();

        let first: Vec<GraphType> = (0..50)
            .map(|i| {
                h.selector
                    .select_investigation_graph(&format!("inv-{}", i), None, None)
                    .graph_type()
            })
            .collect();
        let second: Vec<GraphType> = (0..50)
            .map(|i| {
                h.selector
                    .select_investigation_graph(&format!("inv-{}", i), None, None)
                    .graph_type()
            })
            .collect();

        assert_eq!(first, second);
        assert!(first.contains(&GraphType::Hybrid));
        assert!(first.contains(&GraphType::Clean));
    }

    #[test]
    fn test_forced_wins_over_rollback() {
        let h = harness(GraphBuilders::standard());
        h.rollback.trigger_rollback("incident");

        let result = h
            .selector
            .select_investigation_graph("inv-1", None, Some(GraphType::Orchestrator));
        assert_eq!(result.graph_type(), GraphType::Orchestrator);
        assert_eq!(
            result.spec().map(|s| s.selection_reason),
            Some(SelectionReason::Forced)
        );
    }

    #[test]
    fn test_rollback_wins_over_feature_flag() {
        let h = harness(GraphBuilders::standard());
        h.flags.enable_flag(HYBRID_GRAPH_V1, 100).unwrap();
        h.rollback.trigger_rollback("incident");

        let result = h.selector.select_investigation_graph("inv-1", None, None);
        assert_eq!(result.graph_type(), GraphType::Clean);
        let spec = result.spec().unwrap();
        assert_eq!(spec.selection_reason, SelectionReason::Rollback);
        assert!(spec.fallback_occurred);
    }

    #[test]
    fn test_manual_rollback_holds_until_cleared() {
        let h = harness(GraphBuilders::standard());
        h.flags.enable_flag(HYBRID_GRAPH_V1, 100).unwrap();
        h.rollback.trigger_rollback("manual test");

        for i in 0..10 {
            let result = h
                .selector
                .select_investigation_graph(&format!("inv-{}", i), None, None);
            let spec = result.spec().unwrap();
            assert_eq!(spec.graph_type, GraphType::Clean);
            assert_eq!(spec.selection_reason, SelectionReason::Rollback);
            assert!(spec.fallback_occurred);
        }

        assert!(h.rollback.clear_rollback());
        let result = h.selector.select_investigation_graph("inv-after", None, None);
        let spec = result.spec().unwrap();
        assert_eq!(spec.graph_type, GraphType::Hybrid);
        assert_eq!(spec.selection_reason, SelectionReason::FeatureFlag);
        assert!(!spec.fallback_occurred);
    }

    #[test]
    fn test_experiment_wins_over_feature_flag() {
        let h = harness(GraphBuilders::standard());
        h.flags.enable_flag(HYBRID_GRAPH_V1, 100).unwrap();
        h.ab_tests
            .create_experiment("orchestrator-trial", GraphType::Orchestrator, GraphType::Orchestrator, 100, 50)
            .unwrap();

        let result = h.selector.select_investigation_graph("inv-1", None, None);
        assert_eq!(result.graph_type(), GraphType::Orchestrator);
        assert_eq!(
            result.spec().map(|s| s.selection_reason),
            Some(SelectionReason::AbTest)
        );
    }

    #[test]
    fn test_failed_hybrid_build_falls_back_to_clean() {
        let builders = GraphBuilders::empty()
            .with_builder(Arc::new(CleanGraphBuilder::default()))
            .with_builder(Arc::new(HybridGraphBuilder::new(Vec::new())));
        let h = harness(builders);
        h.flags.enable_flag(HYBRID_GRAPH_V1, 100).unwrap();

        let result = h.selector.select_investigation_graph("inv-1", None, None);
        assert_eq!(result.graph_type(), GraphType::Clean);
        let spec = result.spec().unwrap();
        assert_eq!(spec.selection_reason, SelectionReason::Default);
        assert!(spec.fallback_occurred);
        assert_eq!(h.selector.fallback_count(), 1);
    }

    #[test]
    fn test_forced_build_failure_is_a_value() {
        let builders = GraphBuilders::empty().with_builder(Arc::new(CleanGraphBuilder::default()));
        let h = harness(builders);

        let result = h
            .selector
            .select_investigation_graph("inv-1", None, Some(GraphType::Hybrid));
        assert!(!result.is_success());
        assert!(result.error().is_some());
        assert!(h.selector.get_selection_record("inv-1").is_none());
    }

    #[test]
    fn test_no_builders_fails_after_emergency_attempt() {
        let h = harness(GraphBuilders::empty());
        let result = h.selector.select_investigation_graph("inv-1", None, None);

        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("emergency fallback failed"));
        assert_eq!(h.selector.get_selection_stats().failed_selections, 1);
    }
}

#[cfg(test)]
mod manager_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_health_breach_latches_until_cleared() {
        let mgr = MigrationManager::new(
            &RolloutConfig::default(),
            HealthConfig::default(),
            GraphBuilders::standard(),
        );
        mgr.flags().enable_flag(HYBRID_GRAPH_V1, 100).unwrap();

        for i in 0..20 {
            mgr.record_investigation_outcome(&format!("inv-{}", i), false, 500.0, false);
        }
        assert!(mgr.rollback().is_rollback_active());

        // Recovery does not release rollback on its own.
        mgr.health().reset();
        for i in 0..20 {
            mgr.record_investigation_outcome(&format!("ok-{}", i), true, 100.0, false);
        }
        let result = mgr.select_graph("inv-after", None, None).await;
        assert_eq!(result.graph_type(), GraphType::Clean);

        assert!(mgr.clear_rollback());
        let result = mgr.select_graph("inv-cleared", None, None).await;
        assert_eq!(result.graph_type(), GraphType::Hybrid);
    }

    #[tokio::test]
    async fn test_status_reports_selection_stats() {
        let mgr = MigrationManager::new(
            &RolloutConfig::default(),
            HealthConfig::default(),
            GraphBuilders::standard(),
        );
        mgr.select_graph("a", None, None).await;
        mgr.select_graph("b", None, Some(GraphType::Hybrid)).await;

        let status = mgr.status();
        assert_eq!(status.selection_stats.total_selections, 2);
        assert_eq!(status.selection_stats.by_graph_type.get("clean"), Some(&1));
        assert_eq!(status.selection_stats.by_graph_type.get("hybrid"), Some(&1));
        assert!(!status.rollback.rollback_active);
    }
}
