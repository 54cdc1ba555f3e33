//! Command-line interface over the investigation services.
//!
//! Every command builds a fresh [`AppState`]; rollback and flag changes are
//! therefore process-local and only the audit trail persists between runs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::analysis::InvestigationResult;
use crate::domain::AgentDomain;
use crate::entity::{EntityType, RelationshipType};
use crate::error::{AppError, AppResult};
use crate::investigation::InvestigationState;
use crate::migration::GraphType;

const RULE: &str = "═══════════════════════════════════════════════════════════════════════════════\n";

/// Hybrid investigation control tool.
#[derive(Parser, Debug)]
#[command(name = "hybrid-investigation", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show feature flags and their rollout state
    Flags,

    /// Select an investigation graph
    Select {
        /// Investigation identifier (rollout bucketing key)
        investigation_id: String,

        /// Entity type of the investigation subject
        #[arg(long)]
        entity_type: Option<String>,

        /// Force a graph type: clean, orchestrator or hybrid
        #[arg(long)]
        force: Option<GraphType>,
    },

    /// Inspect or change rollback state
    Rollback {
        #[command(subcommand)]
        action: RollbackAction,
    },

    /// Run a full investigation over a JSON input file
    Analyze {
        /// Path to the input document
        #[arg(long)]
        input: PathBuf,
    },

    /// Print the state transition table
    Transitions {
        /// Only show successors of this state
        #[arg(long)]
        from: Option<InvestigationState>,
    },

    /// Show persisted selections and transitions for an investigation
    History {
        investigation_id: String,
    },
}

/// Rollback subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum RollbackAction {
    /// Show rollback state and health
    Status,
    /// Latch rollback with a reason
    Trigger {
        #[arg(long)]
        reason: String,
    },
    /// Release rollback
    Clear,
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

// ============================================================================
// Analyze input
// ============================================================================

/// Input document for the `analyze` command.
///
/// Entities are referenced by caller-chosen keys; the first entity is the
/// investigation subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeInput {
    pub investigation_id: String,
    pub entities: Vec<EntityInput>,
    #[serde(default)]
    pub relationships: Vec<RelationshipInput>,
    /// Agent results keyed by entity key
    #[serde(default)]
    pub results: BTreeMap<String, Vec<ResultInput>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInput {
    pub key: String,
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipInput {
    pub source: String,
    pub target: String,
    pub relationship_type: RelationshipType,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub bidirectional: bool,
}

fn default_strength() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultInput {
    pub agent_type: AgentDomain,
    pub risk_score: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub findings: serde_json::Value,
}

impl AnalyzeInput {
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| AppError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&raw).map_err(|e| AppError::Config {
            message: format!("Invalid analyze input: {}", e),
        })
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Execute a CLI command against the given application state.
pub async fn execute_command(command: Commands, app: &AppState) -> CliResult {
    let outcome = match command {
        Commands::Flags => Ok(execute_flags(app)),
        Commands::Select {
            investigation_id,
            entity_type,
            force,
        } => Ok(execute_select(app, &investigation_id, entity_type.as_deref(), force).await),
        Commands::Rollback { action } => Ok(execute_rollback(app, action)),
        Commands::Analyze { input } => execute_analyze(app, &input).await,
        Commands::Transitions { from } => Ok(execute_transitions(from)),
        Commands::History { investigation_id } => execute_history(app, &investigation_id).await,
    };

    outcome.unwrap_or_else(|e| CliResult::error(format!("Error: {}", e)))
}

fn execute_flags(app: &AppState) -> CliResult {
    let mut output = String::new();
    output.push_str("\nFeature Flags\n");
    output.push_str(RULE);

    for flag in app.migration.flags().list() {
        let _ = writeln!(
            output,
            "{:<28} {:<9} {:>3}%  {:<13} {}",
            flag.name,
            if flag.enabled { "enabled" } else { "disabled" },
            flag.rollout_percentage,
            flag.deployment_mode,
            flag.description
        );
    }

    let rollback = app.migration.rollback().state();
    let _ = writeln!(
        output,
        "\nRollback: {}",
        if rollback.rollback_active { "ACTIVE" } else { "inactive" }
    );
    CliResult::success(output)
}

async fn execute_select(
    app: &AppState,
    investigation_id: &str,
    entity_type: Option<&str>,
    force: Option<GraphType>,
) -> CliResult {
    let result = app.migration.select_graph(investigation_id, entity_type, force).await;

    let (Some(spec), Some(graph)) = (result.spec(), result.graph()) else {
        return CliResult::error(format!(
            "Graph selection failed for {}: {}",
            investigation_id,
            result.error().unwrap_or("unknown error")
        ));
    };

    let mut output = String::new();
    let _ = writeln!(output, "Investigation: {}", spec.investigation_id);
    let _ = writeln!(output, "Graph type:    {}", spec.graph_type.as_str());
    let _ = writeln!(output, "Reason:        {}", spec.selection_reason);
    let _ = writeln!(output, "Fallback:      {}", spec.fallback_occurred);
    let _ = writeln!(
        output,
        "Graph:         {} nodes, {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );
    CliResult::success(output)
}

fn execute_rollback(app: &AppState, action: RollbackAction) -> CliResult {
    match action {
        RollbackAction::Status => {}
        RollbackAction::Trigger { reason } => app.migration.trigger_rollback(&reason),
        RollbackAction::Clear => {
            if !app.migration.clear_rollback() {
                return CliResult::success("Rollback was not active\n");
            }
        }
    }

    let status = app.migration.status();
    let mut output = String::new();
    output.push_str("\nRollback Status\n");
    output.push_str(RULE);
    let _ = writeln!(output, "Active:    {}", status.rollback.rollback_active);
    let _ = writeln!(
        output,
        "Reason:    {}",
        status.rollback.trigger_reason.as_deref().unwrap_or("-")
    );
    if let Some(at) = status.rollback.activated_at {
        let _ = writeln!(output, "Since:     {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    let breaches = status.health.breaches();
    let _ = writeln!(
        output,
        "Health:    {} ({} requests in window)",
        if breaches.is_empty() { "ok".to_string() } else { breaches.join(", ") },
        status.health.request_count
    );
    CliResult::success(output)
}

async fn execute_analyze(app: &AppState, path: &Path) -> AppResult<CliResult> {
    let input = AnalyzeInput::from_file(path)?;
    let Some((subject, others)) = input.entities.split_first() else {
        return Ok(CliResult::error("Analyze input needs at least one entity"));
    };

    let started = std::time::Instant::now();
    let start = app
        .start_investigation(&input.investigation_id, subject.entity_type, &subject.name)
        .await?;
    if start.state != InvestigationState::Running {
        return Ok(CliResult::error(format!(
            "Investigation {} did not start: {}",
            input.investigation_id,
            start.selection.error().unwrap_or("unknown error")
        )));
    }

    let mut ids = BTreeMap::new();
    ids.insert(subject.key.clone(), start.entity_id.clone());
    for entity in others {
        let id = app.entities.create_entity(
            entity.entity_type,
            &entity.name,
            entity.attributes.clone(),
            Some(&input.investigation_id),
        );
        ids.insert(entity.key.clone(), id);
    }

    let resolve = |key: &str| -> AppResult<String> {
        ids.get(key).cloned().ok_or_else(|| AppError::Config {
            message: format!("Unknown entity key: {}", key),
        })
    };

    for rel in &input.relationships {
        app.entities.create_relationship(
            &resolve(&rel.source)?,
            &resolve(&rel.target)?,
            rel.relationship_type,
            rel.strength,
            rel.bidirectional,
        )?;
    }

    let mut results = BTreeMap::new();
    for (key, entries) in &input.results {
        let entity_id = resolve(key)?;
        let converted: Vec<InvestigationResult> = entries
            .iter()
            .map(|r| {
                let result = InvestigationResult::new(entity_id.clone(), r.agent_type, r.risk_score)
                    .with_findings(r.findings.clone());
                match r.confidence {
                    Some(c) => result.with_confidence(c),
                    None => result,
                }
            })
            .collect();
        results.insert(entity_id, converted);
    }

    let analysis = match app
        .analyze_investigation(&input.investigation_id, &results)
        .await
    {
        Ok(analysis) => analysis,
        Err(e) => {
            let elapsed = started.elapsed().as_secs_f64() * 1000.0;
            app.complete_investigation(&input.investigation_id, false, elapsed)
                .await?;
            return Err(e);
        }
    };

    let elapsed = started.elapsed().as_secs_f64() * 1000.0;
    app.complete_investigation(&input.investigation_id, true, elapsed)
        .await?;

    let body = serde_json::to_string_pretty(&analysis).map_err(|e| AppError::Internal {
        message: format!("Failed to encode analysis: {}", e),
    })?;
    Ok(CliResult::success(body))
}

fn execute_transitions(from: Option<InvestigationState>) -> CliResult {
    let states: Vec<InvestigationState> = match from {
        Some(state) => vec![state],
        None => InvestigationState::ALL.to_vec(),
    };

    let mut output = String::new();
    for state in states {
        let successors: Vec<&str> = state
            .allowed_transitions()
            .iter()
            .map(InvestigationState::as_str)
            .collect();
        let _ = writeln!(
            output,
            "{:<14} -> {}",
            state.as_str(),
            if successors.is_empty() { "(none)".to_string() } else { successors.join(", ") }
        );
    }
    CliResult::success(output)
}

async fn execute_history(app: &AppState, investigation_id: &str) -> AppResult<CliResult> {
    let history = app.history(investigation_id).await?;
    if history.selections.is_empty() && history.transitions.is_empty() {
        return Ok(CliResult::success(format!(
            "No history recorded for {}\n",
            investigation_id
        )));
    }

    let mut output = String::new();
    let _ = writeln!(output, "\nHistory for {}", investigation_id);
    output.push_str(RULE);

    output.push_str("Graph selections:\n");
    for record in &history.selections {
        let _ = writeln!(
            output,
            "  {} | {} | {}{}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.graph_type.as_str(),
            record.selection_reason,
            if record.fallback_occurred { " (fallback)" } else { "" }
        );
    }

    output.push_str("\nState transitions:\n");
    for t in &history.transitions {
        let _ = writeln!(
            output,
            "  {} | {} → {}{}{}",
            t.timestamp.format("%Y-%m-%d %H:%M:%S"),
            t.from_state,
            t.to_state,
            if t.forced { " [forced]" } else { "" },
            t.reason
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );
    }
    Ok(CliResult::success(output))
}
