//! End-to-end investigation lifecycle through the application context.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use hybrid_investigation::analysis::InvestigationResult;
use hybrid_investigation::config::Config;
use hybrid_investigation::domain::AgentDomain;
use hybrid_investigation::entity::{EntityType, RelationshipType};
use hybrid_investigation::error::{AppError, StateError};
use hybrid_investigation::events::{AgentMessage, EventFilter, EventType, MessageHandler};
use hybrid_investigation::investigation::InvestigationState;
use hybrid_investigation::storage::SqliteStorage;
use hybrid_investigation::AppState;

async fn create_app() -> AppState {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    AppState::new(Config::default(), Arc::new(storage)).expect("Failed to build app state")
}

/// Forwards every message it receives to a channel.
struct Forwarder(mpsc::UnboundedSender<AgentMessage>);

#[async_trait]
impl MessageHandler for Forwarder {
    async fn handle(&self, message: AgentMessage) -> Result<Option<serde_json::Value>, String> {
        let _ = self.0.send(message);
        Ok(None)
    }
}

#[tokio::test]
async fn test_full_lifecycle_is_audited() {
    let app = create_app().await;
    let (_id, mut events) = app
        .event_bus
        .subscribe(EventFilter::for_types([EventType::StateChanged]));
    app.start();

    let start = app
        .start_investigation("inv-life", EntityType::User, "alice")
        .await
        .unwrap();
    assert_eq!(start.state, InvestigationState::Running);
    assert_eq!(start.agent_contexts.len(), AgentDomain::ALL.len());

    let state = app
        .complete_investigation("inv-life", true, 900.0)
        .await
        .unwrap();
    assert_eq!(state, InvestigationState::Completed);

    let history = app.history("inv-life").await.unwrap();
    let path: Vec<InvestigationState> = history.transitions.iter().map(|t| t.to_state).collect();
    assert_eq!(
        path,
        vec![
            InvestigationState::Initializing,
            InvestigationState::Initialized,
            InvestigationState::Starting,
            InvestigationState::Running,
            InvestigationState::Completing,
            InvestigationState::Completed,
        ]
    );
    assert_eq!(history.selections.len(), 1);

    let mut seen = 0;
    while seen < path.len() {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("state change event")
            .expect("bus open");
        assert_eq!(event.investigation_id.as_deref(), Some("inv-life"));
        seen += 1;
    }

    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_outcome_goes_through_error() {
    let app = create_app().await;
    app.start_investigation("inv-fail", EntityType::Account, "acct-9")
        .await
        .unwrap();

    let state = app
        .complete_investigation("inv-fail", false, 100.0)
        .await
        .unwrap();
    assert_eq!(state, InvestigationState::Failed);

    let history = app.history("inv-fail").await.unwrap();
    let last_two: Vec<InvestigationState> = history
        .transitions
        .iter()
        .rev()
        .take(2)
        .map(|t| t.to_state)
        .collect();
    assert_eq!(
        last_two,
        vec![InvestigationState::Failed, InvestigationState::Error]
    );
}

#[tokio::test]
async fn test_illegal_transition_is_rejected() {
    let app = create_app().await;
    app.start_investigation("inv-x", EntityType::User, "bob")
        .await
        .unwrap();

    let err = app
        .transition("inv-x", InvestigationState::Archived, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::State(StateError::InvalidTransition { .. })
    ));
    assert_eq!(
        app.states.get_state("inv-x").unwrap(),
        InvestigationState::Running
    );
}

#[tokio::test]
async fn test_analysis_round_trip_updates_entities() {
    let app = create_app().await;
    let start = app
        .start_investigation("inv-a", EntityType::User, "carol")
        .await
        .unwrap();
    let device = app.entities.create_entity(
        EntityType::Device,
        "phone",
        BTreeMap::new(),
        Some("inv-a"),
    );
    app.entities
        .create_relationship(&start.entity_id, &device, RelationshipType::Uses, 0.9, false)
        .unwrap();

    let mut results = BTreeMap::new();
    results.insert(
        start.entity_id.clone(),
        vec![InvestigationResult::new(&start.entity_id, AgentDomain::Network, 0.85).with_confidence(0.8)],
    );
    results.insert(
        device.clone(),
        vec![InvestigationResult::new(&device, AgentDomain::Device, 0.9).with_confidence(0.8)],
    );

    let analysis = app.analyze_investigation("inv-a", &results).await.unwrap();
    assert_eq!(analysis.strong_correlations().count(), 1);
    assert_eq!(
        app.states.get_state("inv-a").unwrap(),
        InvestigationState::Running
    );

    let entity = app.entities.get_entity(&device).unwrap();
    assert!(entity.risk_score > 0.0);

    let states: Vec<InvestigationState> = app
        .states
        .get_history("inv-a")
        .unwrap()
        .iter()
        .map(|t| t.to_state)
        .collect();
    assert!(states.contains(&InvestigationState::Analyzing));
}

#[tokio::test]
async fn test_registered_agents_receive_context() {
    let app = create_app().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    app.hub
        .register_agent(AgentDomain::Network.agent_name(), Arc::new(Forwarder(tx)));
    app.start();

    app.start_investigation("inv-rag", EntityType::IpAddress, "203.0.113.9")
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("context delivered")
        .expect("channel open");
    assert_eq!(message.investigation_id.as_deref(), Some("inv-rag"));
    assert!(message.payload["knowledge_section"].is_string());

    app.shutdown().await;
}
