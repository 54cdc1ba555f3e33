//! Cross-entity analysis over entities managed by the entity graph.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use hybrid_investigation::analysis::{
    CorrelationType, CrossEntityAnalyzer, InvestigationResult, TemporalPatternType,
};
use hybrid_investigation::config::AnalysisConfig;
use hybrid_investigation::domain::AgentDomain;
use hybrid_investigation::entity::{EntityManager, EntityType, RelationshipType};

struct Ring {
    manager: EntityManager,
    user_a: String,
    user_b: String,
    device: String,
    merchant: String,
}

/// Two users sharing a device, plus an unrelated merchant.
fn ring() -> Ring {
    let manager = EntityManager::new();
    let user_a = manager.create_entity(EntityType::User, "alice", BTreeMap::new(), Some("inv-ring"));
    let user_b = manager.create_entity(EntityType::User, "bob", BTreeMap::new(), Some("inv-ring"));
    let device = manager.create_entity(EntityType::Device, "dev-1", BTreeMap::new(), Some("inv-ring"));
    let merchant =
        manager.create_entity(EntityType::Merchant, "shop", BTreeMap::new(), Some("inv-ring"));

    manager
        .create_relationship(&user_a, &device, RelationshipType::Uses, 0.9, false)
        .unwrap();
    manager
        .create_relationship(&user_b, &device, RelationshipType::Uses, 0.9, false)
        .unwrap();
    manager
        .create_relationship(&user_a, &user_b, RelationshipType::SharedDevice, 0.95, true)
        .unwrap();

    Ring {
        manager,
        user_a,
        user_b,
        device,
        merchant,
    }
}

fn result(entity_id: &str, agent: AgentDomain, risk: f64, at: &str) -> InvestigationResult {
    InvestigationResult::new(entity_id, agent, risk).with_findings(json!({
        "indicators": [{"observed_at": at, "kind": "login"}]
    }))
}

#[test]
fn test_shared_device_ring_is_correlated() {
    let ring = ring();
    let mut results = BTreeMap::new();
    results.insert(
        ring.user_a.clone(),
        vec![result(&ring.user_a, AgentDomain::Network, 0.9, "2024-06-01T10:00:00Z")],
    );
    results.insert(
        ring.user_b.clone(),
        vec![result(&ring.user_b, AgentDomain::Network, 0.92, "2024-06-01T10:20:00Z")],
    );
    results.insert(
        ring.device.clone(),
        vec![result(&ring.device, AgentDomain::Device, 0.88, "2024-06-01T10:40:00Z")],
    );
    results.insert(
        ring.merchant.clone(),
        vec![result(&ring.merchant, AgentDomain::Risk, 0.05, "2024-06-01T18:00:00Z")],
    );

    let entities = ring.manager.get_investigation_entities("inv-ring");
    let ids: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
    let relationships = ring.manager.get_relationships_between(&ids);
    assert_eq!(relationships.len(), 3);

    let analyzer = CrossEntityAnalyzer::new(AnalysisConfig::default());
    let now = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
    let analysis = analyzer
        .analyze_at("inv-ring", &results, &relationships, &entities, now)
        .unwrap();

    // Every related pair in the ring is strongly positive.
    let strong: Vec<_> = analysis.strong_correlations().collect();
    assert_eq!(strong.len(), 3);
    assert!(strong
        .iter()
        .all(|c| c.correlation_type == CorrelationType::StrongPositive));

    // The merchant is far from every ring member.
    assert!(analysis
        .risk_correlations
        .iter()
        .all(|c| c.entity_a != ring.merchant && c.entity_b != ring.merchant));

    // Three high-risk events inside one hour.
    assert_eq!(analysis.anomaly_clusters.len(), 1);
    assert_eq!(analysis.anomaly_clusters[0].entity_ids.len(), 3);

    // Timeline carries one event per result, in time order.
    assert_eq!(analysis.timeline.len(), 4);
    assert!(analysis
        .timeline
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(analysis.timeline.iter().all(|e| !e.inferred));

    assert!(analysis.overall_confidence > 0.0 && analysis.overall_confidence <= 1.0);
}

#[test]
fn test_synchronized_activity_on_related_pair() {
    let ring = ring();
    let mut results = BTreeMap::new();
    results.insert(
        ring.user_a.clone(),
        vec![result(&ring.user_a, AgentDomain::Logs, 0.4, "2024-06-01T03:05:00Z")],
    );
    results.insert(
        ring.user_b.clone(),
        vec![result(&ring.user_b, AgentDomain::Logs, 0.45, "2024-06-01T03:50:00Z")],
    );

    let entities = ring.manager.get_investigation_entities("inv-ring");
    let ids: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
    let relationships = ring.manager.get_relationships_between(&ids);

    // The device has no results; its inferred event lands at midnight.
    let now = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
    let analysis = CrossEntityAnalyzer::new(AnalysisConfig::default())
        .analyze_at("inv-ring", &results, &relationships, &entities, now)
        .unwrap();

    let synchronized = analysis
        .temporal_patterns
        .iter()
        .find(|p| p.pattern_type == TemporalPatternType::SynchronizedActivity)
        .expect("synchronized pattern");
    assert_eq!(synchronized.hours, vec![3]);
    assert_eq!(synchronized.entity_ids.len(), 2);
}

#[test]
fn test_no_findings_means_zero_confidence() {
    // Fresh entities all carry the same stored score; without agent results
    // that must not read as similarity or shared activity.
    let ring = ring();
    let entities = ring.manager.get_investigation_entities("inv-ring");
    let ids: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
    let relationships = ring.manager.get_relationships_between(&ids);
    assert_eq!(entities.len(), 4);

    let analysis = CrossEntityAnalyzer::new(AnalysisConfig::default())
        .analyze_cross_entity_patterns("inv-ring", &BTreeMap::new(), &relationships, &entities)
        .unwrap();

    assert_eq!(analysis.overall_confidence, 0.0);
    assert!(analysis.timeline.is_empty());
    assert!(analysis.risk_correlations.is_empty());
    assert!(analysis.temporal_patterns.is_empty());
    assert!(analysis.behavioral_insights.is_empty());
    assert!(analysis.anomaly_clusters.is_empty());
}
