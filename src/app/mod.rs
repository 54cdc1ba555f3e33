//! Application context: owns every service and runs the end-to-end flows.

pub mod cli;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::analysis::{CrossEntityAnalysis, CrossEntityAnalyzer, InvestigationResult};
use crate::config::Config;
use crate::entity::{EntityManager, EntityType};
use crate::error::{AppError, AppResult, StateError};
use crate::events::{
    AgentCommunicationHub, AgentMessage, Event, EventBus, EventPriority, EventType,
};
use crate::investigation::{
    InvestigationContext, InvestigationState, InvestigationStateManager, StateTransition,
};
use crate::migration::{GraphBuilders, GraphSelectionResult, MigrationManager, SelectionRecord};
use crate::rag::{AugmentedContext, KnowledgeBase, RagOrchestrator};
use crate::resilience::ErrorHandler;
use crate::storage::AuditStorage;

const TRIGGERED_BY: &str = "investigation_service";

/// Shared handle to the application state.
pub type SharedState = Arc<AppState>;

/// Outcome of [`AppState::start_investigation`].
#[derive(Debug, Clone)]
pub struct InvestigationStart {
    pub investigation_id: String,
    pub entity_id: String,
    pub selection: GraphSelectionResult,
    pub state: InvestigationState,
    /// Knowledge context per agent domain in the selected graph
    pub agent_contexts: Vec<AugmentedContext>,
}

/// Persisted audit trail of one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationHistory {
    pub investigation_id: String,
    pub selections: Vec<SelectionRecord>,
    pub transitions: Vec<StateTransition>,
}

/// Application state shared across commands.
///
/// Built once at startup; nothing in the crate is a global.
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn AuditStorage>,
    pub event_bus: Arc<EventBus>,
    pub error_handler: Arc<ErrorHandler>,
    pub hub: Arc<AgentCommunicationHub>,
    pub migration: MigrationManager,
    pub entities: EntityManager,
    pub states: InvestigationStateManager,
    pub analyzer: CrossEntityAnalyzer,
    pub rag: RagOrchestrator,
}

impl AppState {
    /// Wire every service together. Does not start background tasks.
    pub fn new(config: Config, storage: Arc<dyn AuditStorage>) -> AppResult<Self> {
        let event_bus = Arc::new(EventBus::new(config.bus.clone()));
        let error_handler = Arc::new(ErrorHandler::new(config.circuit_breaker.clone()));
        let hub = Arc::new(AgentCommunicationHub::with_event_bus(
            config.bus.clone(),
            Arc::clone(&error_handler),
            Arc::clone(&event_bus),
        ));

        let migration = MigrationManager::new(&config.rollout, config.health.clone(), GraphBuilders::standard())
            .with_storage(Arc::clone(&storage))
            .with_event_bus(Arc::clone(&event_bus));
        migration.apply_process_env();

        let states =
            InvestigationStateManager::new(config.state.clone()).with_event_bus(Arc::clone(&event_bus));
        let analyzer = CrossEntityAnalyzer::new(config.analysis.clone());

        let knowledge_base = Arc::new(KnowledgeBase::from_config(&config.rag));
        if config.rag.enabled {
            knowledge_base.load_defaults()?;
        }
        let rag = RagOrchestrator::new(knowledge_base, &config.rag);

        info!(
            rag_enabled = config.rag.enabled,
            bus_queue = config.bus.queue_size,
            "Application state initialized"
        );

        Ok(Self {
            config,
            storage,
            event_bus,
            error_handler,
            hub,
            migration,
            entities: EntityManager::new(),
            states,
            analyzer,
            rag,
        })
    }

    /// Start the bus and hub consumers. Requires a Tokio runtime.
    pub fn start(&self) {
        self.event_bus.start();
        self.hub.start();
    }

    /// Stop consumers, draining queued events.
    pub async fn shutdown(&self) {
        self.hub.stop().await;
        self.event_bus.stop().await;
    }

    /// Commit a transition and append it to the audit store.
    pub async fn transition(
        &self,
        investigation_id: &str,
        to_state: InvestigationState,
        reason: Option<&str>,
    ) -> AppResult<StateTransition> {
        let transition =
            self.states
                .transition_state(investigation_id, to_state, TRIGGERED_BY, reason, false)?;
        self.storage.record_transition(&transition).await?;
        Ok(transition)
    }

    /// Register the subject entity, walk the lifecycle to `Running` and
    /// select the investigation graph.
    ///
    /// A failed selection moves the investigation through `Error` to `Failed`;
    /// it is reported in the returned value, not as an `Err`.
    pub async fn start_investigation(
        &self,
        investigation_id: &str,
        entity_type: EntityType,
        entity_name: &str,
    ) -> AppResult<InvestigationStart> {
        if self.states.get_state(investigation_id).is_ok() {
            return Err(StateError::AlreadyExists {
                investigation_id: investigation_id.to_string(),
            }
            .into());
        }
        let entity_id =
            self.entities
                .create_entity(entity_type, entity_name, BTreeMap::new(), Some(investigation_id));
        self.states.create_investigation(
            investigation_id,
            InvestigationContext::for_entity(entity_id.clone(), entity_type.as_str()),
        )?;

        for state in [
            InvestigationState::Initializing,
            InvestigationState::Initialized,
            InvestigationState::Starting,
        ] {
            self.transition(investigation_id, state, None).await?;
        }

        let selection = self
            .migration
            .select_graph(investigation_id, Some(entity_type.as_str()), None)
            .await;

        let state = match selection.error() {
            None => {
                self.transition(investigation_id, InvestigationState::Running, None)
                    .await?
                    .to_state
            }
            Some(error) => {
                let error = error.to_string();
                warn!(investigation_id = investigation_id, error = %error, "Graph selection failed");
                self.transition(investigation_id, InvestigationState::Error, Some(&error))
                    .await?;
                self.transition(investigation_id, InvestigationState::Failed, Some(&error))
                    .await?
                    .to_state
            }
        };

        let agent_contexts: Vec<AugmentedContext> = match selection.graph() {
            Some(graph) if state == InvestigationState::Running => graph
                .agent_domains()
                .into_iter()
                .map(|domain| self.rag.augment_domain_context(domain, &entity_id, entity_type))
                .collect(),
            _ => Vec::new(),
        };
        self.dispatch_contexts(investigation_id, &agent_contexts);

        Ok(InvestigationStart {
            investigation_id: investigation_id.to_string(),
            entity_id,
            selection,
            state,
            agent_contexts,
        })
    }

    /// Correlate agent results across the investigation's entities and fold
    /// each result into the entity's running risk score.
    pub async fn analyze_investigation(
        &self,
        investigation_id: &str,
        results: &BTreeMap<String, Vec<InvestigationResult>>,
    ) -> AppResult<CrossEntityAnalysis> {
        let running = self.states.get_state(investigation_id).ok() == Some(InvestigationState::Running);
        if running {
            self.transition(investigation_id, InvestigationState::Analyzing, None)
                .await?;
        }

        let entities = self.entities.get_investigation_entities(investigation_id);
        let entity_ids: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
        let relationships = self.entities.get_relationships_between(&entity_ids);

        let analysis = match self.analyzer.analyze_cross_entity_patterns(
            investigation_id,
            results,
            &relationships,
            &entities,
        ) {
            Ok(analysis) => analysis,
            Err(e) => {
                if running {
                    self.transition(investigation_id, InvestigationState::Error, Some(&e.to_string()))
                        .await?;
                }
                return Err(AppError::from(e));
            }
        };

        for (entity_id, entity_results) in results {
            for result in entity_results {
                if let Err(e) =
                    self.entities
                        .update_risk_score(entity_id, result.risk_score, result.confidence)
                {
                    warn!(entity_id = %entity_id, error = %e, "Risk score not updated");
                }
            }
        }

        self.publish(
            Event::new(EventType::CrossEntityCompleted, TRIGGERED_BY)
                .with_investigation(investigation_id)
                .with_data(json!({
                    "findings": analysis.finding_counts(),
                    "overall_confidence": analysis.overall_confidence,
                })),
        );
        for cluster in &analysis.anomaly_clusters {
            self.publish(
                Event::new(EventType::AnomalyDetected, TRIGGERED_BY)
                    .with_investigation(investigation_id)
                    .with_priority(EventPriority::High)
                    .with_data(json!({
                        "cluster_id": cluster.cluster_id,
                        "entity_ids": cluster.entity_ids,
                        "risk_amplification": cluster.risk_amplification,
                    })),
            );
        }

        if running {
            self.transition(investigation_id, InvestigationState::Running, None)
                .await?;
        }
        Ok(analysis)
    }

    /// Close a running investigation and report the outcome to the migration
    /// health monitor. A failure from `Error` goes straight to `Failed`.
    pub async fn complete_investigation(
        &self,
        investigation_id: &str,
        success: bool,
        duration_ms: f64,
    ) -> AppResult<InvestigationState> {
        let path: &[InvestigationState] = if success {
            &[InvestigationState::Completing, InvestigationState::Completed]
        } else {
            &[InvestigationState::Error, InvestigationState::Failed]
        };
        let mut state = self.states.get_state(investigation_id)?;
        for to_state in path {
            if state == *to_state {
                continue;
            }
            state = self.transition(investigation_id, *to_state, None).await?.to_state;
        }

        if self
            .migration
            .record_investigation_outcome(investigation_id, success, duration_ms, false)
        {
            warn!(investigation_id = investigation_id, "Outcome breached health thresholds; rollback active");
        }
        Ok(state)
    }

    pub async fn history(&self, investigation_id: &str) -> AppResult<InvestigationHistory> {
        Ok(InvestigationHistory {
            investigation_id: investigation_id.to_string(),
            selections: self.storage.get_selections(investigation_id).await?,
            transitions: self.storage.get_transitions(investigation_id).await?,
        })
    }

    /// Hand each registered domain agent its knowledge context.
    fn dispatch_contexts(&self, investigation_id: &str, contexts: &[AugmentedContext]) {
        let registered = self.hub.registered_agents();
        for context in contexts {
            let agent = context.domain.agent_name();
            if !registered.contains(&agent) {
                continue;
            }
            let message = AgentMessage::notification(
                TRIGGERED_BY,
                agent.as_str(),
                json!({
                    "entity_id": context.entity_id,
                    "entity_type": context.entity_type,
                    "knowledge_section": context.knowledge_section,
                    "sources": context.sources,
                }),
            )
            .with_investigation(investigation_id);
            if let Err(e) = self.hub.send(message) {
                warn!(agent = %agent, error = %e, "Agent context not sent");
            }
        }
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.event_bus.publish(event) {
            warn!(error = %e, "Event not published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn state() -> AppState {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        AppState::new(Config::default(), Arc::new(storage)).unwrap()
    }

    #[tokio::test]
    async fn test_start_investigation_reaches_running() {
        let app = state().await;
        let start = app
            .start_investigation("inv-1", EntityType::User, "alice")
            .await
            .unwrap();

        assert_eq!(start.state, InvestigationState::Running);
        assert!(start.selection.is_success());
        assert_eq!(app.entities.get_investigation_entities("inv-1").len(), 1);

        let history = app.history("inv-1").await.unwrap();
        assert_eq!(history.selections.len(), 1);
        assert_eq!(history.transitions.len(), 4);
        assert_eq!(history.transitions[3].to_state, InvestigationState::Running);
    }

    #[tokio::test]
    async fn test_duplicate_investigation_is_rejected() {
        let app = state().await;
        app.start_investigation("inv-1", EntityType::User, "alice")
            .await
            .unwrap();
        let err = app
            .start_investigation("inv-1", EntityType::User, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::State(_)));
    }

    #[tokio::test]
    async fn test_complete_investigation() {
        let app = state().await;
        app.start_investigation("inv-1", EntityType::Account, "acct")
            .await
            .unwrap();
        let state = app.complete_investigation("inv-1", true, 1200.0).await.unwrap();
        assert_eq!(state, InvestigationState::Completed);
        assert_eq!(app.migration.health().sample_count(), 1);
    }
}
