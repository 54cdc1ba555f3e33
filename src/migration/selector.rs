//! Per-investigation graph selection.
//!
//! Selection walks a fixed precedence list, first match wins:
//!
//! ```text
//! Forced ──▶ Rollback ──▶ A/B Test ──▶ Feature Flag ──▶ Default
//!   │           │             │              │              │
//! Failure    Failure     fall through   fall through   Emergency
//! ```
//!
//! Forced and rollback build failures are returned as typed failures. A/B
//! and feature-flag failures fall through. A failing default build, or a
//! builder panic anywhere in the chain, triggers one last clean build.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::ab_test::ABTestManager;
use super::flags::{FeatureFlags, FlagSnapshot, HYBRID_GRAPH_V1};
use super::graph::{GraphBuilders, GraphType, InvestigationGraph};
use super::rollback::RollbackTriggers;

/// Maximum selection records retained for audit and stats.
const MAX_SELECTION_RECORDS: usize = 10_000;

/// Why a graph type was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Forced,
    Rollback,
    AbTest,
    FeatureFlag,
    Default,
    EmergencyFallback,
}

impl SelectionReason {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::Forced => "forced",
            SelectionReason::Rollback => "rollback",
            SelectionReason::AbTest => "ab_test",
            SelectionReason::FeatureFlag => "feature_flag",
            SelectionReason::Default => "default",
            SelectionReason::EmergencyFallback => "emergency_fallback",
        }
    }
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SelectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forced" => Ok(SelectionReason::Forced),
            "rollback" => Ok(SelectionReason::Rollback),
            "ab_test" => Ok(SelectionReason::AbTest),
            "feature_flag" => Ok(SelectionReason::FeatureFlag),
            "default" => Ok(SelectionReason::Default),
            "emergency_fallback" => Ok(SelectionReason::EmergencyFallback),
            _ => Err(format!("Unknown selection reason: {}", s)),
        }
    }
}

/// Description of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSelectionSpec {
    pub graph_type: GraphType,
    pub selection_reason: SelectionReason,
    pub investigation_id: String,
    pub entity_type: Option<String>,
    /// True for rollback/emergency selections or after an earlier attempt failed
    pub fallback_occurred: bool,
}

/// Diagnostic context attached to a failed selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Precedence rule that produced the failure
    pub selection_reason: SelectionReason,
    pub entity_type: Option<String>,
    pub rollback_active: bool,
    /// Error from the emergency clean build, if one was attempted
    pub fallback_error: Option<String>,
}

/// Outcome of a selection. Exactly one variant is ever produced.
#[derive(Debug, Clone)]
pub enum GraphSelectionResult {
    Success {
        graph: InvestigationGraph,
        spec: GraphSelectionSpec,
    },
    Failure {
        error: String,
        investigation_id: String,
        attempted_graph_type: GraphType,
        context: FailureContext,
    },
}

impl GraphSelectionResult {
    /// True for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, GraphSelectionResult::Success { .. })
    }

    /// Selected type on success, attempted type on failure.
    pub fn graph_type(&self) -> GraphType {
        match self {
            GraphSelectionResult::Success { spec, .. } => spec.graph_type,
            GraphSelectionResult::Failure {
                attempted_graph_type,
                ..
            } => *attempted_graph_type,
        }
    }

    /// The investigation this result belongs to.
    pub fn investigation_id(&self) -> &str {
        match self {
            GraphSelectionResult::Success { spec, .. } => &spec.investigation_id,
            GraphSelectionResult::Failure {
                investigation_id, ..
            } => investigation_id,
        }
    }

    /// Selection spec, present only on success.
    pub fn spec(&self) -> Option<&GraphSelectionSpec> {
        match self {
            GraphSelectionResult::Success { spec, .. } => Some(spec),
            GraphSelectionResult::Failure { .. } => None,
        }
    }

    /// Built graph, present only on success.
    pub fn graph(&self) -> Option<&InvestigationGraph> {
        match self {
            GraphSelectionResult::Success { graph, .. } => Some(graph),
            GraphSelectionResult::Failure { .. } => None,
        }
    }

    /// Error text, present only on failure.
    pub fn error(&self) -> Option<&str> {
        match self {
            GraphSelectionResult::Success { .. } => None,
            GraphSelectionResult::Failure { error, .. } => Some(error),
        }
    }
}

/// Audit record of a successful selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub investigation_id: String,
    pub graph_type: GraphType,
    pub selection_reason: SelectionReason,
    pub entity_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub feature_flags: BTreeMap<String, FlagSnapshot>,
    pub rollback_active: bool,
    pub fallback_occurred: bool,
    /// Running fallback counter at the time of selection
    pub fallback_count: u64,
}

/// Aggregated selection statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionStats {
    pub total_selections: usize,
    pub failed_selections: u64,
    pub by_graph_type: BTreeMap<String, usize>,
    pub by_reason: BTreeMap<String, usize>,
    pub fallback_count: u64,
    /// Share of recorded selections with `fallback_occurred`
    pub fallback_rate: f64,
}

/// Error that escapes the precedence chain and triggers emergency fallback.
struct ChainError {
    attempted_graph_type: GraphType,
    message: String,
}

/// Picks and builds the investigation graph for each investigation.
pub struct GraphSelector {
    builders: GraphBuilders,
    flags: Arc<FeatureFlags>,
    rollback: Arc<RollbackTriggers>,
    ab_tests: Arc<ABTestManager>,
    records: RwLock<VecDeque<SelectionRecord>>,
    fallback_count: AtomicU64,
    failure_count: AtomicU64,
}

impl GraphSelector {
    pub fn new(
        builders: GraphBuilders,
        flags: Arc<FeatureFlags>,
        rollback: Arc<RollbackTriggers>,
        ab_tests: Arc<ABTestManager>,
    ) -> Self {
        Self {
            builders,
            flags,
            rollback,
            ab_tests,
            records: RwLock::new(VecDeque::new()),
            fallback_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Select and build a graph for an investigation.
    pub fn select_investigation_graph(
        &self,
        investigation_id: &str,
        entity_type: Option<&str>,
        force_graph_type: Option<GraphType>,
    ) -> GraphSelectionResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_precedence(investigation_id, entity_type, force_graph_type)
        }));

        let chain_error = match outcome {
            Ok(Ok(result)) => return self.finish(result),
            Ok(Err(chain_error)) => chain_error,
            Err(payload) => {
                let message = format!("graph selection panicked: {}", panic_message(&payload));
                // A forced type is never substituted, not even by the emergency build.
                if let Some(graph_type) = force_graph_type {
                    return self.finish(self.failure(
                        graph_type,
                        SelectionReason::Forced,
                        investigation_id,
                        entity_type,
                        message,
                    ));
                }
                ChainError {
                    attempted_graph_type: GraphType::Clean,
                    message,
                }
            }
        };

        let result = self.emergency_fallback(investigation_id, entity_type, chain_error);
        self.finish(result)
    }

    /// The most recent selection record for an investigation.
    pub fn get_selection_record(&self, investigation_id: &str) -> Option<SelectionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.investigation_id == investigation_id)
            .cloned()
    }

    /// All retained selection records, oldest first.
    pub fn selection_records(&self) -> Vec<SelectionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Aggregate counts by graph type and reason, plus fallback rate.
    pub fn get_selection_stats(&self) -> SelectionStats {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = SelectionStats {
            total_selections: records.len(),
            failed_selections: self.failure_count.load(Ordering::Relaxed),
            fallback_count: self.fallback_count.load(Ordering::Relaxed),
            ..Default::default()
        };

        let mut fallbacks = 0usize;
        for record in records.iter() {
            *stats
                .by_graph_type
                .entry(record.graph_type.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_reason
                .entry(record.selection_reason.as_str().to_string())
                .or_insert(0) += 1;
            if record.fallback_occurred {
                fallbacks += 1;
            }
        }
        if !records.is_empty() {
            stats.fallback_rate = fallbacks as f64 / records.len() as f64;
        }
        stats
    }

    /// Running fallback counter.
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Precedence chain
    // ========================================================================

    fn run_precedence(
        &self,
        investigation_id: &str,
        entity_type: Option<&str>,
        force_graph_type: Option<GraphType>,
    ) -> Result<GraphSelectionResult, ChainError> {
        // 1. Forced type: no substitution on failure.
        if let Some(graph_type) = force_graph_type {
            return Ok(self.build_or_fail(
                graph_type,
                SelectionReason::Forced,
                investigation_id,
                entity_type,
                false,
            ));
        }

        // 2. Active rollback: clean graph or typed failure.
        if self.rollback.should_rollback() {
            return Ok(self.build_or_fail(
                GraphType::Clean,
                SelectionReason::Rollback,
                investigation_id,
                entity_type,
                true,
            ));
        }

        let mut fallback_occurred = false;

        // 3. A/B assignment: best effort.
        if let Some(assignment) = self.ab_tests.get_assignment(investigation_id) {
            match self.builders.build(assignment.graph_type, investigation_id) {
                Ok(graph) => {
                    return Ok(self.success(
                        graph,
                        SelectionReason::AbTest,
                        investigation_id,
                        entity_type,
                        fallback_occurred,
                    ))
                }
                Err(e) => {
                    warn!(
                        investigation_id = investigation_id,
                        experiment_id = %assignment.experiment_id,
                        graph_type = %assignment.graph_type,
                        error = %e,
                        "A/B graph build failed, falling through"
                    );
                    self.fallback_count.fetch_add(1, Ordering::Relaxed);
                    fallback_occurred = true;
                }
            }
        }

        // 4. Primary feature flag.
        if self.flags.is_enabled(HYBRID_GRAPH_V1, investigation_id) {
            match self.builders.build(GraphType::Hybrid, investigation_id) {
                Ok(graph) => {
                    return Ok(self.success(
                        graph,
                        SelectionReason::FeatureFlag,
                        investigation_id,
                        entity_type,
                        fallback_occurred,
                    ))
                }
                Err(e) => {
                    let count = self.fallback_count.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        investigation_id = investigation_id,
                        error = %e,
                        fallback_count = count,
                        "Hybrid graph build failed, falling back to default"
                    );
                    fallback_occurred = true;
                }
            }
        }

        // 5. Default.
        match self.builders.build(GraphType::Clean, investigation_id) {
            Ok(graph) => Ok(self.success(
                graph,
                SelectionReason::Default,
                investigation_id,
                entity_type,
                fallback_occurred,
            )),
            Err(e) => Err(ChainError {
                attempted_graph_type: GraphType::Clean,
                message: e.to_string(),
            }),
        }
    }

    fn emergency_fallback(
        &self,
        investigation_id: &str,
        entity_type: Option<&str>,
        chain_error: ChainError,
    ) -> GraphSelectionResult {
        error!(
            investigation_id = investigation_id,
            error = %chain_error.message,
            "Graph selection failed, attempting emergency clean graph"
        );
        self.fallback_count.fetch_add(1, Ordering::Relaxed);

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.builders.build(GraphType::Clean, investigation_id)
        }));
        let fallback_error = match attempt {
            Ok(Ok(graph)) => {
                return self.success(
                    graph,
                    SelectionReason::EmergencyFallback,
                    investigation_id,
                    entity_type,
                    true,
                )
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("emergency build panicked: {}", panic_message(&payload)),
        };

        GraphSelectionResult::Failure {
            error: format!(
                "{}; emergency fallback failed: {}",
                chain_error.message, fallback_error
            ),
            investigation_id: investigation_id.to_string(),
            attempted_graph_type: chain_error.attempted_graph_type,
            context: FailureContext {
                selection_reason: SelectionReason::EmergencyFallback,
                entity_type: entity_type.map(str::to_string),
                rollback_active: self.rollback.is_rollback_active(),
                fallback_error: Some(fallback_error),
            },
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn build_or_fail(
        &self,
        graph_type: GraphType,
        reason: SelectionReason,
        investigation_id: &str,
        entity_type: Option<&str>,
        fallback_occurred: bool,
    ) -> GraphSelectionResult {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.builders.build(graph_type, investigation_id)
        }));
        match attempt {
            Ok(Ok(graph)) => {
                self.success(graph, reason, investigation_id, entity_type, fallback_occurred)
            }
            Ok(Err(e)) => {
                self.failure(graph_type, reason, investigation_id, entity_type, e.to_string())
            }
            Err(payload) => self.failure(
                graph_type,
                reason,
                investigation_id,
                entity_type,
                format!("{} graph build panicked: {}", graph_type, panic_message(&payload)),
            ),
        }
    }

    fn failure(
        &self,
        graph_type: GraphType,
        reason: SelectionReason,
        investigation_id: &str,
        entity_type: Option<&str>,
        error: String,
    ) -> GraphSelectionResult {
        GraphSelectionResult::Failure {
            error,
            investigation_id: investigation_id.to_string(),
            attempted_graph_type: graph_type,
            context: FailureContext {
                selection_reason: reason,
                entity_type: entity_type.map(str::to_string),
                rollback_active: self.rollback.is_rollback_active(),
                fallback_error: None,
            },
        }
    }

    fn success(
        &self,
        graph: InvestigationGraph,
        reason: SelectionReason,
        investigation_id: &str,
        entity_type: Option<&str>,
        fallback_occurred: bool,
    ) -> GraphSelectionResult {
        let spec = GraphSelectionSpec {
            graph_type: graph.graph_type,
            selection_reason: reason,
            investigation_id: investigation_id.to_string(),
            entity_type: entity_type.map(str::to_string),
            fallback_occurred,
        };
        self.record(&spec);
        GraphSelectionResult::Success { graph, spec }
    }

    fn record(&self, spec: &GraphSelectionSpec) {
        let record = SelectionRecord {
            investigation_id: spec.investigation_id.clone(),
            graph_type: spec.graph_type,
            selection_reason: spec.selection_reason,
            entity_type: spec.entity_type.clone(),
            timestamp: Utc::now(),
            feature_flags: self.flags.snapshot(),
            rollback_active: self.rollback.is_rollback_active(),
            fallback_occurred: spec.fallback_occurred,
            fallback_count: self.fallback_count.load(Ordering::Relaxed),
        };

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.len() >= MAX_SELECTION_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn finish(&self, result: GraphSelectionResult) -> GraphSelectionResult {
        match &result {
            GraphSelectionResult::Success { spec, .. } => info!(
                investigation_id = %spec.investigation_id,
                graph_type = %spec.graph_type,
                reason = %spec.selection_reason,
                fallback = spec.fallback_occurred,
                "Investigation graph selected"
            ),
            GraphSelectionResult::Failure {
                error,
                investigation_id,
                attempted_graph_type,
                ..
            } => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                error!(
                    investigation_id = %investigation_id,
                    attempted = %attempted_graph_type,
                    error = %error,
                    "Investigation graph selection failed"
                );
            }
        }
        result
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
