//! Cross-entity correlation over agent results.

mod cross_entity;
mod timeline;
mod types;

pub use cross_entity::{overall_confidence, CrossEntityAnalyzer};
pub use timeline::{build_timeline, extract_timestamps, is_timestamp_key, parse_timestamp};
pub use types::{
    risk_amplification, AnomalyCluster, BehavioralPattern, BehavioralPatternType,
    CorrelationType, CrossEntityAnalysis, EntityInteraction, InvestigationResult,
    RiskCorrelation, TemporalPattern, TemporalPatternType, TimelineEvent,
};
