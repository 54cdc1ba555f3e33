//! Cross-entity correlation engine.
//!
//! Every stage reads the same input snapshot:
//!
//! ```text
//! results + entities ─► timeline ─┬─► behavioral patterns
//!                                 ├─► anomaly clusters
//!                                 └─► temporal patterns
//! relationships + risk map ─────────► risk correlations
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, error, info, warn};

use super::timeline::build_timeline;
use super::types::{
    risk_amplification, AnomalyCluster, BehavioralPattern, BehavioralPatternType,
    CorrelationType, CrossEntityAnalysis, EntityInteraction, InvestigationResult,
    RiskCorrelation, TemporalPattern, TemporalPatternType, TimelineEvent,
};
use crate::config::AnalysisConfig;
use crate::domain::AgentDomain;
use crate::entity::{Entity, EntityRelationship};
use crate::error::AnalysisError;

/// Strength at or above which a related pair may be strong_positive.
const STRONG_POSITIVE_STRENGTH: f64 = 0.8;
/// Both risks must reach this for strong_positive.
const STRONG_POSITIVE_MIN_RISK: f64 = 0.5;
/// Strength below which a related pair is strong_negative.
const STRONG_NEGATIVE_STRENGTH: f64 = 0.3;
/// Peak hour needs this share of events...
const PEAK_HOUR_SHARE: f64 = 0.3;
/// ...and at least this many.
const PEAK_HOUR_MIN_EVENTS: usize = 3;
/// Finding count at which a finding kind contributes its full weight.
const CONFIDENCE_SATURATION: f64 = 3.0;

const WEIGHT_STRONG_CORRELATIONS: f64 = 0.3;
const WEIGHT_BEHAVIORAL: f64 = 0.25;
const WEIGHT_ANOMALY_CLUSTERS: f64 = 0.25;
const WEIGHT_TEMPORAL: f64 = 0.2;

/// Correlates agent results across the entities of one investigation.
#[derive(Debug, Clone)]
pub struct CrossEntityAnalyzer {
    config: AnalysisConfig,
}

impl CrossEntityAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the full pipeline with the current time as "now".
    pub fn analyze_cross_entity_patterns(
        &self,
        investigation_id: &str,
        entity_results: &BTreeMap<String, Vec<InvestigationResult>>,
        relationships: &[EntityRelationship],
        entities: &[Entity],
    ) -> Result<CrossEntityAnalysis, AnalysisError> {
        self.analyze_at(investigation_id, entity_results, relationships, entities, Utc::now())
    }

    /// Run the full pipeline. `now` stamps inferred timeline events.
    pub fn analyze_at(
        &self,
        investigation_id: &str,
        entity_results: &BTreeMap<String, Vec<InvestigationResult>>,
        relationships: &[EntityRelationship],
        entities: &[Entity],
        now: DateTime<Utc>,
    ) -> Result<CrossEntityAnalysis, AnalysisError> {
        if let Err(e) = validate_input(entity_results, entities) {
            error!(investigation_id = investigation_id, error = %e, "Cross-entity analysis rejected input");
            return Err(e);
        }

        let in_scope = entities_in_scope(entity_results, relationships, entities);
        let timeline = build_timeline(entity_results, &in_scope, now);
        let risks = entity_risks(entity_results);

        let entity_interactions = interactions(relationships, &risks);
        let (risk_correlations, pairwise_scan_performed) =
            self.risk_correlations(relationships, &risks, investigation_id);
        let behavioral_insights = self.behavioral_patterns(&timeline);
        let anomaly_clusters = self.anomaly_clusters(&timeline);
        let temporal_patterns = self.temporal_patterns(&timeline, relationships);

        let strong = risk_correlations
            .iter()
            .filter(|c| c.correlation_type == CorrelationType::StrongPositive)
            .count();
        let overall_confidence = overall_confidence(
            strong,
            behavioral_insights.len(),
            anomaly_clusters.len(),
            temporal_patterns.len(),
        );

        info!(
            investigation_id = investigation_id,
            entities = risks.len(),
            timeline_events = timeline.len(),
            correlations = risk_correlations.len(),
            behavioral = behavioral_insights.len(),
            anomaly_clusters = anomaly_clusters.len(),
            temporal = temporal_patterns.len(),
            overall_confidence = overall_confidence,
            "Cross-entity analysis complete"
        );

        Ok(CrossEntityAnalysis {
            investigation_id: investigation_id.to_string(),
            timeline,
            entity_interactions,
            risk_correlations,
            temporal_patterns,
            anomaly_clusters,
            behavioral_insights,
            overall_confidence,
            pairwise_scan_performed,
            analyzed_at: Utc::now(),
        })
    }

    // ========================================================================
    // Risk correlation
    // ========================================================================

    fn risk_correlations(
        &self,
        relationships: &[EntityRelationship],
        risks: &BTreeMap<String, f64>,
        investigation_id: &str,
    ) -> (Vec<RiskCorrelation>, bool) {
        let mut correlations = Vec::new();
        let mut linked: HashSet<(&str, &str)> = HashSet::new();

        for rel in relationships {
            let (Some(&risk_a), Some(&risk_b)) = (
                risks.get(&rel.source_entity_id),
                risks.get(&rel.target_entity_id),
            ) else {
                continue;
            };
            let key = ordered(&rel.source_entity_id, &rel.target_entity_id);
            if !linked.insert(key) {
                continue;
            }

            let strength = 1.0 - (risk_a - risk_b).abs();
            let correlation_type = if strength >= STRONG_POSITIVE_STRENGTH
                && risk_a >= STRONG_POSITIVE_MIN_RISK
                && risk_b >= STRONG_POSITIVE_MIN_RISK
            {
                CorrelationType::StrongPositive
            } else if strength < STRONG_NEGATIVE_STRENGTH {
                CorrelationType::StrongNegative
            } else {
                CorrelationType::Moderate
            };

            if strength >= self.config.correlation_threshold
                || correlation_type == CorrelationType::StrongNegative
            {
                correlations.push(RiskCorrelation {
                    entity_a: rel.source_entity_id.clone(),
                    entity_b: rel.target_entity_id.clone(),
                    risk_a,
                    risk_b,
                    correlation_strength: strength,
                    correlation_type,
                    relationship_type: Some(rel.relationship_type),
                });
            }
        }

        if risks.len() > self.config.max_pairwise_entities {
            warn!(
                investigation_id = investigation_id,
                entities = risks.len(),
                limit = self.config.max_pairwise_entities,
                "Skipping unrelated-pair similarity scan"
            );
            return (correlations, false);
        }

        let ids: Vec<(&String, f64)> = risks.iter().map(|(id, r)| (id, *r)).collect();
        for (i, (id_a, risk_a)) in ids.iter().enumerate() {
            for (id_b, risk_b) in &ids[i + 1..] {
                if linked.contains(&ordered(id_a, id_b)) {
                    continue;
                }
                let strength = 1.0 - (risk_a - risk_b).abs();
                if strength > self.config.correlation_threshold {
                    correlations.push(RiskCorrelation {
                        entity_a: (*id_a).clone(),
                        entity_b: (*id_b).clone(),
                        risk_a: *risk_a,
                        risk_b: *risk_b,
                        correlation_strength: strength,
                        correlation_type: CorrelationType::UnexpectedSimilarity,
                        relationship_type: None,
                    });
                }
            }
        }
        (correlations, true)
    }

    // ========================================================================
    // Behavioral patterns
    // ========================================================================

    fn behavioral_patterns(&self, timeline: &[TimelineEvent]) -> Vec<BehavioralPattern> {
        let tolerance = self.config.behavioral_tolerance;
        let mut patterns = Vec::new();

        let mut by_agent: BTreeMap<AgentDomain, Vec<&TimelineEvent>> = BTreeMap::new();
        for event in timeline {
            if let Some(agent) = event.agent_type {
                by_agent.entry(agent).or_default().push(event);
            }
        }

        for (agent, mut events) in by_agent {
            events.sort_by(|a, b| a.risk_score.total_cmp(&b.risk_score));
            let mut start = 0;
            while start < events.len() {
                let anchor = events[start].risk_score;
                let mut end = start + 1;
                while end < events.len() && events[end].risk_score - anchor <= tolerance {
                    end += 1;
                }
                let group = &events[start..end];
                let members: BTreeSet<&str> = group.iter().map(|e| e.entity_id.as_str()).collect();
                if members.len() >= 2 {
                    let scores: Vec<f64> = group.iter().map(|e| e.risk_score).collect();
                    patterns.push(BehavioralPattern {
                        pattern_type: BehavioralPatternType::SharedAgentPattern,
                        agent_type: Some(agent),
                        entity_ids: members.into_iter().map(str::to_string).collect(),
                        mean_risk: mean(&scores),
                        risk_spread: group[group.len() - 1].risk_score - anchor,
                        event_count: group.len(),
                    });
                }
                start = end;
            }
        }

        // Per-entity, per-agent mean risk; consistent across agents?
        let mut per_entity: BTreeMap<&str, BTreeMap<AgentDomain, Vec<f64>>> = BTreeMap::new();
        for event in timeline {
            if let Some(agent) = event.agent_type {
                per_entity
                    .entry(event.entity_id.as_str())
                    .or_default()
                    .entry(agent)
                    .or_default()
                    .push(event.risk_score);
            }
        }
        for (entity_id, agents) in per_entity {
            if agents.len() < 2 {
                continue;
            }
            let means: Vec<f64> = agents.values().map(|v| mean(v)).collect();
            if stdev(&means) < self.config.consistency_stdev {
                let lo = means.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                patterns.push(BehavioralPattern {
                    pattern_type: BehavioralPatternType::CrossAgentConsistency,
                    agent_type: None,
                    entity_ids: vec![entity_id.to_string()],
                    mean_risk: mean(&means),
                    risk_spread: hi - lo,
                    event_count: agents.values().map(Vec::len).sum(),
                });
            }
        }

        debug!(patterns = patterns.len(), "Behavioral patterns detected");
        patterns
    }

    // ========================================================================
    // Anomaly clusters
    // ========================================================================

    fn anomaly_clusters(&self, timeline: &[TimelineEvent]) -> Vec<AnomalyCluster> {
        let window = Duration::minutes(self.config.anomaly_window_minutes);
        let mut high: Vec<&TimelineEvent> = timeline
            .iter()
            .filter(|e| e.risk_score > self.config.anomaly_risk_threshold)
            .collect();
        high.sort_by_key(|e| e.timestamp);

        let mut clusters = Vec::new();
        let mut start = 0;
        while start < high.len() {
            let opened = high[start].timestamp;
            let mut end = start + 1;
            while end < high.len() && high[end].timestamp - opened <= window {
                end += 1;
            }
            let group = &high[start..end];
            let members: BTreeSet<&str> = group.iter().map(|e| e.entity_id.as_str()).collect();
            if group.len() >= 2 && members.len() >= 2 {
                let scores: Vec<f64> = group.iter().map(|e| e.risk_score).collect();
                let average_risk = mean(&scores);
                clusters.push(AnomalyCluster {
                    cluster_id: format!("anomaly_{}", clusters.len() + 1),
                    event_count: group.len(),
                    start: opened,
                    end: group[group.len() - 1].timestamp,
                    average_risk,
                    risk_amplification: risk_amplification(average_risk, members.len()),
                    entity_ids: members.into_iter().map(str::to_string).collect(),
                });
            }
            start = end;
        }
        clusters
    }

    // ========================================================================
    // Temporal patterns
    // ========================================================================

    fn temporal_patterns(
        &self,
        timeline: &[TimelineEvent],
        relationships: &[EntityRelationship],
    ) -> Vec<TemporalPattern> {
        let mut patterns = Vec::new();

        let mut per_entity: BTreeMap<&str, Vec<&TimelineEvent>> = BTreeMap::new();
        for event in timeline {
            per_entity.entry(event.entity_id.as_str()).or_default().push(event);
        }

        // Escalation: most consecutive deltas rise by more than the threshold.
        for (entity_id, events) in &per_entity {
            if events.len() < 3 {
                continue;
            }
            let mut ordered_events = events.clone();
            ordered_events.sort_by_key(|e| e.timestamp);
            let deltas = ordered_events.len() - 1;
            let rising = ordered_events
                .windows(2)
                .filter(|w| w[1].risk_score - w[0].risk_score > self.config.escalation_delta)
                .count();
            if rising * 2 > deltas {
                let first = ordered_events[0].risk_score;
                let last = ordered_events[deltas].risk_score;
                patterns.push(TemporalPattern {
                    pattern_type: TemporalPatternType::RiskEscalation,
                    entity_ids: vec![entity_id.to_string()],
                    description: format!(
                        "Risk rose in {} of {} steps ({:.2} -> {:.2})",
                        rising, deltas, first, last
                    ),
                    strength: rising as f64 / deltas as f64,
                    hours: Vec::new(),
                });
            }
        }

        // Peak hour across the whole timeline.
        let mut histogram = [0usize; 24];
        for event in timeline {
            histogram[event.timestamp.hour() as usize] += 1;
        }
        let total = timeline.len();
        for (hour, &count) in histogram.iter().enumerate() {
            if count >= PEAK_HOUR_MIN_EVENTS && count as f64 >= PEAK_HOUR_SHARE * total as f64 {
                let entity_ids: BTreeSet<String> = timeline
                    .iter()
                    .filter(|e| e.timestamp.hour() as usize == hour)
                    .map(|e| e.entity_id.clone())
                    .collect();
                patterns.push(TemporalPattern {
                    pattern_type: TemporalPatternType::PeakActivity,
                    entity_ids: entity_ids.into_iter().collect(),
                    description: format!("{} of {} events at {:02}:00 UTC", count, total, hour),
                    strength: count as f64 / total as f64,
                    hours: vec![hour as u32],
                });
            }
        }

        // Linked entities active in the same hours.
        let hours: BTreeMap<&str, BTreeSet<u32>> = per_entity
            .iter()
            .map(|(id, events)| (*id, events.iter().map(|e| e.timestamp.hour()).collect()))
            .collect();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for rel in relationships {
            let (Some(a), Some(b)) = (
                hours.get(rel.source_entity_id.as_str()),
                hours.get(rel.target_entity_id.as_str()),
            ) else {
                continue;
            };
            if !seen.insert(ordered(&rel.source_entity_id, &rel.target_entity_id)) {
                continue;
            }
            let shared: Vec<u32> = a.intersection(b).copied().collect();
            if shared.is_empty() {
                continue;
            }
            let union = a.union(b).count();
            patterns.push(TemporalPattern {
                pattern_type: TemporalPatternType::SynchronizedActivity,
                entity_ids: vec![rel.source_entity_id.clone(), rel.target_entity_id.clone()],
                description: format!("{} shared active hour(s)", shared.len()),
                strength: shared.len() as f64 / union as f64,
                hours: shared,
            });
        }

        patterns
    }
}

/// Saturating weighted sum over finding kinds, in `[0, 1]`.
pub fn overall_confidence(
    strong_correlations: usize,
    behavioral: usize,
    anomaly_clusters: usize,
    temporal: usize,
) -> f64 {
    let saturate = |n: usize| (n as f64 / CONFIDENCE_SATURATION).min(1.0);
    let score = WEIGHT_STRONG_CORRELATIONS * saturate(strong_correlations)
        + WEIGHT_BEHAVIORAL * saturate(behavioral)
        + WEIGHT_ANOMALY_CLUSTERS * saturate(anomaly_clusters)
        + WEIGHT_TEMPORAL * saturate(temporal);
    score.clamp(0.0, 1.0)
}

fn validate_input(
    entity_results: &BTreeMap<String, Vec<InvestigationResult>>,
    entities: &[Entity],
) -> Result<(), AnalysisError> {
    for entity in entities {
        if entity.risk_score.is_nan() {
            return Err(AnalysisError::InvalidInput {
                message: format!("entity {} has NaN risk score", entity.entity_id),
            });
        }
    }
    for (entity_id, results) in entity_results {
        for result in results {
            if result.risk_score.is_nan() || result.confidence.is_nan() {
                return Err(AnalysisError::InvalidInput {
                    message: format!(
                        "{} result for {} has NaN score",
                        result.agent_type, entity_id
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Risk per entity: mean of its agent results. Entities without results are
/// left out so stored scores never correlate on their own.
fn entity_risks(entity_results: &BTreeMap<String, Vec<InvestigationResult>>) -> BTreeMap<String, f64> {
    entity_results
        .iter()
        .filter(|(_, results)| !results.is_empty())
        .map(|(entity_id, results)| {
            let scores: Vec<f64> = results.iter().map(|r| r.risk_score.clamp(0.0, 1.0)).collect();
            (entity_id.clone(), mean(&scores))
        })
        .collect()
}

/// Entities that belong on the timeline: those with results, plus their
/// direct neighbours. Empty when no entity has results.
fn entities_in_scope(
    entity_results: &BTreeMap<String, Vec<InvestigationResult>>,
    relationships: &[EntityRelationship],
    entities: &[Entity],
) -> Vec<Entity> {
    let assessed: HashSet<&str> = entity_results
        .iter()
        .filter(|(_, results)| !results.is_empty())
        .map(|(id, _)| id.as_str())
        .collect();
    if assessed.is_empty() {
        return Vec::new();
    }
    let mut keep = assessed.clone();
    for rel in relationships {
        let (source, target) = (rel.source_entity_id.as_str(), rel.target_entity_id.as_str());
        if assessed.contains(source) {
            keep.insert(target);
        }
        if assessed.contains(target) {
            keep.insert(source);
        }
    }
    entities
        .iter()
        .filter(|e| keep.contains(e.entity_id.as_str()))
        .cloned()
        .collect()
}

fn interactions(
    relationships: &[EntityRelationship],
    risks: &BTreeMap<String, f64>,
) -> Vec<EntityInteraction> {
    relationships
        .iter()
        .filter(|r| risks.contains_key(&r.source_entity_id) && risks.contains_key(&r.target_entity_id))
        .map(|r| EntityInteraction {
            source_entity_id: r.source_entity_id.clone(),
            target_entity_id: r.target_entity_id.clone(),
            relationship_type: r.relationship_type,
            strength: r.strength,
            observation_count: r.observation_count,
            bidirectional: r.bidirectional,
        })
        .collect()
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityType, RelationshipType};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> AnalysisConfig {
        AnalysisConfig::default()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn entity(id: &str, risk: f64) -> Entity {
        Entity::new(id, EntityType::User, id).with_risk(risk, 0.5)
    }

    /// One risk-agent result per `(entity, risk)` pair.
    fn scored(pairs: &[(&str, f64)]) -> BTreeMap<String, Vec<InvestigationResult>> {
        pairs
            .iter()
            .map(|(id, risk)| {
                (id.to_string(), vec![InvestigationResult::new(*id, AgentDomain::Risk, *risk)])
            })
            .collect()
    }

    fn rel(a: &str, b: &str, t: RelationshipType) -> EntityRelationship {
        EntityRelationship::new(format!("{a}-{b}"), a, b, t, 0.9, false)
    }

    #[test]
    fn test_shared_device_pair_is_strong_positive() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("u1", 0.0), entity("u2", 0.0)];
        let rels = vec![rel("u1", "u2", RelationshipType::SharedDevice)];
        let results = scored(&[("u1", 0.9), ("u2", 0.92)]);

        let analysis = analyzer
            .analyze_at("inv", &results, &rels, &entities, now())
            .unwrap();

        assert_eq!(analysis.risk_correlations.len(), 1);
        let c = &analysis.risk_correlations[0];
        assert!((c.correlation_strength - 0.98).abs() < 1e-9);
        assert_eq!(c.correlation_type, CorrelationType::StrongPositive);
        assert_eq!(c.relationship_type, Some(RelationshipType::SharedDevice));
        assert_eq!(analysis.entity_interactions.len(), 1);
    }

    #[test]
    fn test_strong_negative_and_unexpected_similarity() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("a", 0.0), entity("b", 0.0), entity("c", 0.0)];
        let rels = vec![rel("a", "b", RelationshipType::Uses)];
        let results = scored(&[("a", 0.95), ("b", 0.1), ("c", 0.9)]);

        let analysis = analyzer
            .analyze_at("inv", &results, &rels, &entities, now())
            .unwrap();

        let types: Vec<(String, String, CorrelationType)> = analysis
            .risk_correlations
            .iter()
            .map(|c| (c.entity_a.clone(), c.entity_b.clone(), c.correlation_type))
            .collect();
        assert_eq!(
            types,
            vec![
                ("a".into(), "b".into(), CorrelationType::StrongNegative),
                ("a".into(), "c".into(), CorrelationType::UnexpectedSimilarity),
            ]
        );
        assert!(analysis.pairwise_scan_performed);
    }

    #[test]
    fn test_pairwise_scan_is_capped() {
        let analyzer = CrossEntityAnalyzer::new(AnalysisConfig {
            max_pairwise_entities: 2,
            ..config()
        });
        let entities = vec![entity("a", 0.0), entity("b", 0.0), entity("c", 0.0)];
        let results = scored(&[("a", 0.5), ("b", 0.5), ("c", 0.5)]);
        let analysis = analyzer
            .analyze_at("inv", &results, &[], &entities, now())
            .unwrap();
        assert!(!analysis.pairwise_scan_performed);
        assert!(analysis.risk_correlations.is_empty());
    }

    #[test]
    fn test_stored_scores_alone_yield_no_findings() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("a", 0.0), entity("b", 0.0), entity("c", 0.0)];
        let rels = vec![rel("a", "b", RelationshipType::Uses)];

        let analysis = analyzer
            .analyze_at("inv", &BTreeMap::new(), &rels, &entities, now())
            .unwrap();

        assert!(analysis.timeline.is_empty());
        assert!(analysis.risk_correlations.is_empty());
        assert!(analysis.behavioral_insights.is_empty());
        assert!(analysis.anomaly_clusters.is_empty());
        assert!(analysis.temporal_patterns.is_empty());
        assert_eq!(analysis.overall_confidence, 0.0);
    }

    #[test]
    fn test_unassessed_neighbours_stay_out_of_correlations() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("a", 0.0), entity("b", 0.0), entity("lonely", 0.0)];
        let rels = vec![rel("a", "b", RelationshipType::Uses)];
        let results = scored(&[("a", 0.2)]);

        let analysis = analyzer
            .analyze_at("inv", &results, &rels, &entities, now())
            .unwrap();

        assert!(analysis.risk_correlations.is_empty());
        let on_timeline: Vec<&str> = analysis.timeline.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(on_timeline, vec!["a", "b"]);
    }

    #[test]
    fn test_anomaly_cluster_within_window() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("a", 0.0), entity("b", 0.0), entity("c", 0.0)];
        let mut results = BTreeMap::new();
        results.insert(
            "a".to_string(),
            vec![InvestigationResult::new("a", AgentDomain::Network, 0.9)
                .with_findings(json!({"seen_at": "2024-06-01T10:00:00Z"}))],
        );
        results.insert(
            "b".to_string(),
            vec![InvestigationResult::new("b", AgentDomain::Device, 0.8)
                .with_findings(json!({"seen_at": "2024-06-01T10:30:00Z"}))],
        );
        // Outside the 60 minute window.
        results.insert(
            "c".to_string(),
            vec![InvestigationResult::new("c", AgentDomain::Device, 0.95)
                .with_findings(json!({"seen_at": "2024-06-01T15:00:00Z"}))],
        );

        let analysis = analyzer
            .analyze_at("inv", &results, &[], &entities, now())
            .unwrap();
        assert_eq!(analysis.anomaly_clusters.len(), 1);
        let cluster = &analysis.anomaly_clusters[0];
        assert_eq!(cluster.entity_ids, vec!["a".to_string(), "b".to_string()]);
        assert!((cluster.average_risk - 0.85).abs() < 1e-9);
        assert!((cluster.risk_amplification - 0.85 * 1.5 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_behavioral_patterns() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("a", 0.0), entity("b", 0.0)];
        let mut results = BTreeMap::new();
        results.insert(
            "a".to_string(),
            vec![
                InvestigationResult::new("a", AgentDomain::Network, 0.60),
                InvestigationResult::new("a", AgentDomain::Device, 0.65),
            ],
        );
        results.insert(
            "b".to_string(),
            vec![InvestigationResult::new("b", AgentDomain::Network, 0.65)],
        );

        let analysis = analyzer
            .analyze_at("inv", &results, &[], &entities, now())
            .unwrap();
        let kinds: Vec<BehavioralPatternType> = analysis
            .behavioral_insights
            .iter()
            .map(|p| p.pattern_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                BehavioralPatternType::SharedAgentPattern,
                BehavioralPatternType::CrossAgentConsistency,
            ]
        );
        assert_eq!(analysis.behavioral_insights[0].agent_type, Some(AgentDomain::Network));
        assert_eq!(analysis.behavioral_insights[1].entity_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_escalation_and_peak_hour() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let entities = vec![entity("a", 0.0)];
        let mut results = BTreeMap::new();
        results.insert(
            "a".to_string(),
            vec![
                InvestigationResult::new("a", AgentDomain::Logs, 0.2)
                    .with_findings(json!({"event_time": "2024-06-01T03:00:00Z"})),
                InvestigationResult::new("a", AgentDomain::Logs, 0.5)
                    .with_findings(json!({"event_time": "2024-06-01T03:10:00Z"})),
                InvestigationResult::new("a", AgentDomain::Logs, 0.8)
                    .with_findings(json!({"event_time": "2024-06-01T03:20:00Z"})),
            ],
        );

        let analysis = analyzer
            .analyze_at("inv", &results, &[], &entities, now())
            .unwrap();
        let kinds: Vec<TemporalPatternType> = analysis
            .temporal_patterns
            .iter()
            .map(|p| p.pattern_type)
            .collect();
        assert_eq!(
            kinds,
            vec![TemporalPatternType::RiskEscalation, TemporalPatternType::PeakActivity]
        );
        assert_eq!(analysis.temporal_patterns[0].strength, 1.0);
        assert_eq!(analysis.temporal_patterns[1].hours, vec![3]);
    }

    #[test]
    fn test_nan_is_rejected() {
        let analyzer = CrossEntityAnalyzer::new(config());
        let mut results = BTreeMap::new();
        results.insert(
            "a".to_string(),
            vec![InvestigationResult::new("a", AgentDomain::Risk, f64::NAN)],
        );
        let err = analyzer
            .analyze_at("inv", &results, &[], &[entity("a", 0.1)], now())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput { .. }));
    }

    #[test]
    fn test_overall_confidence() {
        assert_eq!(overall_confidence(0, 0, 0, 0), 0.0);
        assert!((overall_confidence(3, 0, 0, 0) - 0.3).abs() < 1e-9);
        assert!((overall_confidence(30, 30, 30, 30) - 1.0).abs() < 1e-9);
        // Diverse evidence beats more of one kind.
        assert!(overall_confidence(1, 1, 1, 1) > overall_confidence(4, 0, 0, 0));
    }
}
