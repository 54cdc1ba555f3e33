//! Feature-flag governed graph selection with sticky rollback.
//!
//! # Selection precedence
//!
//! ```text
//! forced ─► rollback ─► A/B assignment ─► hybrid_graph_v1 ─► default (clean)
//!                                                                 │
//!                                         internal error ─► emergency clean
//! ```
//!
//! Rollback latches on a manual trigger or any health breach and is only
//! released by [`MigrationManager::clear_rollback`].

mod env_loader;
mod flags;
mod graph;
mod health;
mod manager;
mod rollback;
mod rollout;
mod selector;

pub use ab_test::{ABTestManager, ArmStats, Assignment, Experiment, ExperimentArm, ExperimentResults};
pub use env_loader::{parse_bool, EnvironmentLoader, OverrideReport, FLAG_ENV_PREFIX};
pub use flags::{DeploymentMode, FeatureFlag, FeatureFlags, FlagSnapshot, HYBRID_GRAPH_V1};
pub use graph::{
    CleanGraphBuilder, GraphBuilder, GraphBuilders, GraphEdge, GraphNode, GraphType,
    HybridGraphBuilder, InvestigationGraph, NodeKind, OrchestratorGraphBuilder,
};
pub use health::{HealthMonitor, HealthReport, MetricSample, SampleKind};
pub use manager::{MigrationManager, MigrationStatus};
pub use rollback::{RollbackState, RollbackTriggers};
pub use rollout::{RolloutCalculator, ROLLOUT_HASH_VERSION};
pub use selector::{
    FailureContext, GraphSelectionResult, GraphSelectionSpec, GraphSelector, SelectionReason,
    SelectionRecord, SelectionStats,
};
