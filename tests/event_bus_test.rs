//! Event bus and agent hub working together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use hybrid_investigation::config::{CircuitBreakerConfig, EventBusConfig};
use hybrid_investigation::events::{
    AgentCommunicationHub, AgentMessage, Event, EventBus, EventFilter, EventPriority, EventType,
    MessageHandler, MessageType,
};
use hybrid_investigation::resilience::ErrorHandler;

/// Scores whatever entity it is asked about.
struct ScoringAgent {
    risk: f64,
}

#[async_trait]
impl MessageHandler for ScoringAgent {
    async fn handle(&self, message: AgentMessage) -> Result<Option<serde_json::Value>, String> {
        let entity = message.payload["entity_id"]
            .as_str()
            .ok_or_else(|| "missing entity_id".to_string())?;
        Ok(Some(json!({"entity_id": entity, "risk_score": self.risk})))
    }
}

async fn recv(rx: &mut tokio::sync::mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event within timeout")
        .expect("bus open")
}

#[tokio::test]
async fn test_investigation_scoped_subscription() {
    let bus = EventBus::new(EventBusConfig::default());
    let (_id, mut scoped) = bus.subscribe(EventFilter::all().with_investigation("inv-1"));
    let (_id, mut urgent) = bus.subscribe(EventFilter::all().with_min_priority(EventPriority::High));
    bus.start();

    bus.publish(Event::new(EventType::AnalysisStarted, "test").with_investigation("inv-2"))
        .unwrap();
    bus.publish(
        Event::new(EventType::RiskEscalated, "test")
            .with_investigation("inv-1")
            .with_priority(EventPriority::Critical),
    )
    .unwrap();

    let event = recv(&mut scoped).await;
    assert_eq!(event.event_type, EventType::RiskEscalated);
    let event = recv(&mut urgent).await;
    assert_eq!(event.event_type, EventType::RiskEscalated);

    bus.stop().await;
    assert_eq!(bus.stats().published, 2);
}

#[tokio::test]
async fn test_envelope_serialization() {
    let event = Event::new(EventType::GraphSelected, "migration_manager")
        .with_investigation("inv-9")
        .with_data(json!({"graph_type": "hybrid"}));
    let value = serde_json::to_value(&event).unwrap();

    assert_eq!(value["event_type"], "graph_selected");
    assert_eq!(value["investigation_id"], "inv-9");
    assert_eq!(value["data"]["graph_type"], "hybrid");
    assert!(value["event_id"].is_string());
    assert!(value["timestamp"].is_string());
}

#[tokio::test]
async fn test_agents_answer_requests_through_hub() {
    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let handler = Arc::new(ErrorHandler::new(CircuitBreakerConfig::default()));
    let hub = AgentCommunicationHub::with_event_bus(
        EventBusConfig::default(),
        handler,
        Arc::clone(&bus),
    );
    hub.register_agent("network_agent", Arc::new(ScoringAgent { risk: 0.8 }));
    hub.register_agent("device_agent", Arc::new(ScoringAgent { risk: 0.3 }));
    bus.start();
    hub.start();

    let mut scores = Vec::new();
    for agent in ["network_agent", "device_agent"] {
        let request = AgentMessage::request(
            "orchestrator",
            agent,
            json!({"entity_id": "ent_1"}),
        )
        .with_investigation("inv-1");
        let response = hub.request(request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.message_type, MessageType::Response);
        assert_eq!(response.investigation_id.as_deref(), Some("inv-1"));
        scores.push(response.payload["risk_score"].as_f64().unwrap());
    }
    assert_eq!(scores, vec![0.8, 0.3]);

    // A malformed request comes back as an error response, not a timeout.
    let bad = AgentMessage::request("orchestrator", "device_agent", json!({}));
    let response = hub.request(bad, Duration::from_secs(1)).await.unwrap();
    assert_eq!(response.message_type, MessageType::Error);

    let stats = hub.stats();
    assert_eq!(stats.registered_agents, 2);
    assert_eq!(stats.pending_requests, 0);
    assert_eq!(stats.failed, 1);

    hub.stop().await;
    bus.stop().await;
}
