//! Input and output types for cross-entity analysis.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AgentDomain;
use crate::entity::{EntityType, RelationshipType};
use crate::macros::string_enum;

// ============================================================================
// Input
// ============================================================================

/// One agent's assessment of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub entity_id: String,
    pub agent_type: AgentDomain,
    pub risk_score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Free-form agent output. Timestamps are extracted from anywhere inside.
    #[serde(default)]
    pub findings: serde_json::Value,
}

fn default_confidence() -> f64 {
    0.5
}

impl InvestigationResult {
    pub fn new(entity_id: impl Into<String>, agent_type: AgentDomain, risk_score: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            agent_type,
            risk_score,
            confidence: default_confidence(),
            findings: serde_json::Value::Null,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_findings(mut self, findings: serde_json::Value) -> Self {
        self.findings = findings;
        self
    }
}

/// A point on the investigation timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub agent_type: Option<AgentDomain>,
    /// Finding key the timestamp came from, or `assessment` when inferred
    pub event_type: String,
    pub risk_score: f64,
    pub confidence: f64,
    /// True when no timestamp was found and "now" was used
    pub inferred: bool,
}

// ============================================================================
// Findings
// ============================================================================

/// A relationship as observed by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInteraction {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f64,
    pub observation_count: u32,
    pub bidirectional: bool,
}

string_enum! {
    /// Classification of a pairwise risk correlation.
    pub enum CorrelationType {
        StrongPositive = "strong_positive",
        StrongNegative = "strong_negative",
        Moderate = "moderate",
        UnexpectedSimilarity = "unexpected_similarity",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCorrelation {
    pub entity_a: String,
    pub entity_b: String,
    pub risk_a: f64,
    pub risk_b: f64,
    /// `1 - |risk_a - risk_b|`
    pub correlation_strength: f64,
    pub correlation_type: CorrelationType,
    /// Relationship linking the pair, if any
    pub relationship_type: Option<RelationshipType>,
}

string_enum! {
    pub enum BehavioralPatternType {
        SharedAgentPattern = "shared_agent_pattern",
        CrossAgentConsistency = "cross_agent_consistency",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralPattern {
    pub pattern_type: BehavioralPatternType,
    /// Agent whose events formed the pattern; `None` for cross-agent patterns
    pub agent_type: Option<AgentDomain>,
    pub entity_ids: Vec<String>,
    pub mean_risk: f64,
    /// Max minus min risk inside the pattern
    pub risk_spread: f64,
    pub event_count: usize,
}

/// A burst of high-risk events across several entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCluster {
    pub cluster_id: String,
    pub entity_ids: Vec<String>,
    pub event_count: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub average_risk: f64,
    pub risk_amplification: f64,
}

/// Super-linear amplification for coordinated high-risk bursts.
pub fn risk_amplification(average_risk: f64, entity_count: usize) -> f64 {
    let extra = entity_count.saturating_sub(1) as f64;
    average_risk * 1.5 * (1.0 + 0.2 * extra)
}

string_enum! {
    pub enum TemporalPatternType {
        RiskEscalation = "risk_escalation",
        PeakActivity = "peak_activity",
        SynchronizedActivity = "synchronized_activity",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPattern {
    pub pattern_type: TemporalPatternType,
    pub entity_ids: Vec<String>,
    pub description: String,
    /// 0.0 - 1.0
    pub strength: f64,
    /// Hours of day (UTC) involved, when relevant
    #[serde(default)]
    pub hours: Vec<u32>,
}

/// Result of one analysis run. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossEntityAnalysis {
    pub investigation_id: String,
    pub timeline: Vec<TimelineEvent>,
    pub entity_interactions: Vec<EntityInteraction>,
    pub risk_correlations: Vec<RiskCorrelation>,
    pub temporal_patterns: Vec<TemporalPattern>,
    pub anomaly_clusters: Vec<AnomalyCluster>,
    pub behavioral_insights: Vec<BehavioralPattern>,
    pub overall_confidence: f64,
    /// Whether the all-pairs similarity scan ran
    pub pairwise_scan_performed: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl CrossEntityAnalysis {
    /// Count of findings by kind, for summaries.
    pub fn finding_counts(&self) -> BTreeMap<&'static str, usize> {
        BTreeMap::from([
            ("risk_correlations", self.risk_correlations.len()),
            ("behavioral_insights", self.behavioral_insights.len()),
            ("anomaly_clusters", self.anomaly_clusters.len()),
            ("temporal_patterns", self.temporal_patterns.len()),
        ])
    }

    pub fn strong_correlations(&self) -> impl Iterator<Item = &RiskCorrelation> {
        self.risk_correlations
            .iter()
            .filter(|c| c.correlation_type == CorrelationType::StrongPositive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplification_is_superlinear() {
        assert!((risk_amplification(0.8, 1) - 1.2).abs() < 1e-9);
        assert!((risk_amplification(0.8, 3) - 1.68).abs() < 1e-9);
        assert_eq!(risk_amplification(0.8, 0), risk_amplification(0.8, 1));
    }

    #[test]
    fn test_result_defaults_from_json() {
        let r: InvestigationResult = serde_json::from_str(
            r#"{"entity_id": "e1", "agent_type": "network", "risk_score": 0.4}"#,
        )
        .unwrap();
        assert_eq!(r.agent_type, AgentDomain::Network);
        assert_eq!(r.confidence, 0.5);
        assert!(r.findings.is_null());
    }
}
