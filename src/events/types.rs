//! Event taxonomy and the event envelope.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Event category, used for coarse subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Lifecycle,
    Agent,
    Pattern,
    Tool,
    Data,
    Analysis,
    Coordination,
    Quality,
    Error,
    Performance,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Lifecycle => "lifecycle",
            EventCategory::Agent => "agent",
            EventCategory::Pattern => "pattern",
            EventCategory::Tool => "tool",
            EventCategory::Data => "data",
            EventCategory::Analysis => "analysis",
            EventCategory::Coordination => "coordination",
            EventCategory::Quality => "quality",
            EventCategory::Error => "error",
            EventCategory::Performance => "performance",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

macro_rules! event_types {
    ($($category:ident => [$($variant:ident = $name:literal),+ $(,)?]),+ $(,)?) => {
        /// Every event the bus can carry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum EventType {
            $($($variant,)+)+
        }

        impl EventType {
            /// All event types, grouped by category.
            pub const ALL: &'static [EventType] = &[$($(EventType::$variant,)+)+];

            /// Wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($(EventType::$variant => $name,)+)+
                }
            }

            /// Category the event belongs to.
            pub fn category(&self) -> EventCategory {
                match self {
                    $($(EventType::$variant => EventCategory::$category,)+)+
                }
            }
        }

        impl std::str::FromStr for EventType {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($($name => Ok(EventType::$variant),)+)+
                    _ => Err(format!("Unknown event type: {}", s)),
                }
            }
        }
    };
}

event_types! {
    Lifecycle => [
        InvestigationCreated = "investigation_created",
        InvestigationStarted = "investigation_started",
        InvestigationPaused = "investigation_paused",
        InvestigationResumed = "investigation_resumed",
        InvestigationCompleted = "investigation_completed",
        InvestigationFailed = "investigation_failed",
        InvestigationCancelled = "investigation_cancelled",
        StateChanged = "state_changed",
    ],
    Agent => [
        AgentRegistered = "agent_registered",
        AgentUnregistered = "agent_unregistered",
        AgentStarted = "agent_started",
        AgentProgress = "agent_progress",
        AgentCompleted = "agent_completed",
        AgentFailed = "agent_failed",
    ],
    Pattern => [
        PatternDetected = "pattern_detected",
        PatternConfirmed = "pattern_confirmed",
        PatternRejected = "pattern_rejected",
        AnomalyDetected = "anomaly_detected",
        RiskEscalated = "risk_escalated",
    ],
    Tool => [
        ToolSelected = "tool_selected",
        ToolInvoked = "tool_invoked",
        ToolCompleted = "tool_completed",
        ToolFailed = "tool_failed",
        ToolTimeout = "tool_timeout",
    ],
    Data => [
        DataReceived = "data_received",
        DataValidated = "data_validated",
        DataEnriched = "data_enriched",
        DataMissing = "data_missing",
        EvidenceCollected = "evidence_collected",
    ],
    Analysis => [
        AnalysisStarted = "analysis_started",
        AnalysisCompleted = "analysis_completed",
        CorrelationFound = "correlation_found",
        TimelineBuilt = "timeline_built",
        CrossEntityCompleted = "cross_entity_completed",
        ConfidenceUpdated = "confidence_updated",
    ],
    Coordination => [
        GraphSelected = "graph_selected",
        GraphSelectionFailed = "graph_selection_failed",
        HandoffRequested = "handoff_requested",
        HandoffCompleted = "handoff_completed",
        MessageSent = "message_sent",
        MessageDelivered = "message_delivered",
        MessageExpired = "message_expired",
        RollbackTriggered = "rollback_triggered",
        RollbackCleared = "rollback_cleared",
    ],
    Quality => [
        ValidationPassed = "validation_passed",
        ValidationFailed = "validation_failed",
        QualityCheck = "quality_check",
        SafetyOverride = "safety_override",
    ],
    Error => [
        ErrorOccurred = "error_occurred",
        ErrorRecovered = "error_recovered",
        CircuitOpened = "circuit_opened",
        CircuitClosed = "circuit_closed",
    ],
    Performance => [
        PerformanceMetric = "performance_metric",
        HealthCheck = "health_check",
        ThresholdBreached = "threshold_breached",
    ],
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery priority. Ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub priority: EventPriority,
    /// Component or agent that emitted the event
    pub source: String,
    pub target: Option<String>,
    pub investigation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Assigned by the bus on publish
    pub sequence_number: u64,
    pub tags: BTreeSet<String>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            priority: EventPriority::Normal,
            source: source.into(),
            target: None,
            investigation_id: None,
            timestamp: Utc::now(),
            sequence_number: 0,
            tags: BTreeSet::new(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_investigation(mut self, investigation_id: impl Into<String>) -> Self {
        self.investigation_id = Some(investigation_id.into());
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// JSON envelope for streaming consumers.
    pub fn to_envelope(&self) -> serde_json::Value {
        json!({
            "event_id": self.event_id,
            "event_type": self.event_type.as_str(),
            "category": self.event_type.category().as_str(),
            "priority": self.priority,
            "source": self.source,
            "target": self.target,
            "investigation_id": self.investigation_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "sequence_number": self.sequence_number,
            "tags": self.tags,
            "data": self.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_event_type_names_are_unique_and_parse() {
        let names: HashSet<_> = EventType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), EventType::ALL.len());
        assert!(EventType::ALL.len() >= 50);

        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), *t);
        }
    }

    #[test]
    fn test_serde_name_matches_as_str() {
        let value = serde_json::to_value(EventType::CrossEntityCompleted).unwrap();
        assert_eq!(value, json!("cross_entity_completed"));
        assert_eq!(EventType::RollbackTriggered.category(), EventCategory::Coordination);
        assert_eq!(EventType::StateChanged.category(), EventCategory::Lifecycle);
    }

    #[test]
    fn test_envelope_fields() {
        let mut event = Event::new(EventType::AnomalyDetected, "analyzer")
            .with_investigation("inv-1")
            .with_priority(EventPriority::High)
            .with_tag("fraud")
            .with_data(json!({"cluster_size": 3}));
        event.sequence_number = 7;

        let envelope = event.to_envelope();
        assert_eq!(envelope["event_type"], "anomaly_detected");
        assert_eq!(envelope["category"], "pattern");
        assert_eq!(envelope["priority"], "high");
        assert_eq!(envelope["investigation_id"], "inv-1");
        assert_eq!(envelope["sequence_number"], 7);
        assert_eq!(envelope["tags"], json!(["fraud"]));
        assert_eq!(envelope["data"]["cluster_size"], 3);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::Low < EventPriority::Normal);
    }
}
