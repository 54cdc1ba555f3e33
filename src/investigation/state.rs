//! Investigation lifecycle states and their legal transitions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationState {
    Created,
    Initializing,
    Initialized,
    Starting,
    Running,
    Analyzing,
    Processing,
    Coordinating,
    Validating,
    Pausing,
    Paused,
    Resuming,
    Completing,
    Completed,
    Error,
    Recovering,
    Timeout,
    Failed,
    Cancelled,
    Archived,
}

impl InvestigationState {
    /// All states in lifecycle order.
    pub const ALL: [InvestigationState; 20] = [
        InvestigationState::Created,
        InvestigationState::Initializing,
        InvestigationState::Initialized,
        InvestigationState::Starting,
        InvestigationState::Running,
        InvestigationState::Analyzing,
        InvestigationState::Processing,
        InvestigationState::Coordinating,
        InvestigationState::Validating,
        InvestigationState::Pausing,
        InvestigationState::Paused,
        InvestigationState::Resuming,
        InvestigationState::Completing,
        InvestigationState::Completed,
        InvestigationState::Error,
        InvestigationState::Recovering,
        InvestigationState::Timeout,
        InvestigationState::Failed,
        InvestigationState::Cancelled,
        InvestigationState::Archived,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationState::Created => "created",
            InvestigationState::Initializing => "initializing",
            InvestigationState::Initialized => "initialized",
            InvestigationState::Starting => "starting",
            InvestigationState::Running => "running",
            InvestigationState::Analyzing => "analyzing",
            InvestigationState::Processing => "processing",
            InvestigationState::Coordinating => "coordinating",
            InvestigationState::Validating => "validating",
            InvestigationState::Pausing => "pausing",
            InvestigationState::Paused => "paused",
            InvestigationState::Resuming => "resuming",
            InvestigationState::Completing => "completing",
            InvestigationState::Completed => "completed",
            InvestigationState::Error => "error",
            InvestigationState::Recovering => "recovering",
            InvestigationState::Timeout => "timeout",
            InvestigationState::Failed => "failed",
            InvestigationState::Cancelled => "cancelled",
            InvestigationState::Archived => "archived",
        }
    }

    /// Legal successor states.
    pub fn allowed_transitions(&self) -> &'static [InvestigationState] {
        use InvestigationState::*;
        match self {
            Created => &[Initializing, Cancelled, Error],
            Initializing => &[Initialized, Error, Failed, Cancelled],
            Initialized => &[Starting, Cancelled, Error],
            Starting => &[Running, Error, Failed, Cancelled],
            Running => &[
                Analyzing,
                Processing,
                Coordinating,
                Pausing,
                Validating,
                Completing,
                Error,
                Timeout,
            ],
            Analyzing => &[Processing, Coordinating, Validating, Running, Pausing, Error, Timeout],
            Processing => &[Analyzing, Coordinating, Validating, Running, Pausing, Error, Timeout],
            Coordinating => &[Analyzing, Processing, Validating, Running, Pausing, Error, Timeout],
            Validating => &[Completing, Running, Analyzing, Error, Failed],
            Pausing => &[Paused, Error],
            Paused => &[Resuming, Cancelled, Timeout],
            Resuming => &[Running, Error],
            Completing => &[Completed, Error, Failed],
            Completed => &[Archived],
            Error => &[Recovering, Failed, Cancelled],
            Recovering => &[Running, Error, Failed],
            Timeout => &[Recovering, Failed, Cancelled],
            Failed => &[Archived],
            Cancelled => &[Archived],
            Archived => &[],
        }
    }

    pub fn can_transition_to(&self, to: InvestigationState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Completed, Failed, Cancelled and Archived.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestigationState::Completed
                | InvestigationState::Failed
                | InvestigationState::Cancelled
                | InvestigationState::Archived
        )
    }
}

impl std::fmt::Display for InvestigationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InvestigationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        InvestigationState::ALL
            .iter()
            .find(|state| state.as_str() == lower)
            .copied()
            .ok_or_else(|| format!("Unknown investigation state: {}", s))
    }
}

/// Typed investigation context consulted by validators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigationContext {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl InvestigationContext {
    pub fn for_entity(entity_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            entity_type: Some(entity_type.into()),
            metadata: BTreeMap::new(),
        }
    }
}

/// One committed state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub transition_id: String,
    pub investigation_id: String,
    pub from_state: InvestigationState,
    pub to_state: InvestigationState,
    pub triggered_by: String,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// False when optional validators reported problems
    pub validation_passed: bool,
    pub validation_errors: Vec<String>,
    /// Seconds spent in `from_state`
    pub duration_seconds: f64,
    pub forced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twenty_states_round_trip_names() {
        assert_eq!(InvestigationState::ALL.len(), 20);
        for state in InvestigationState::ALL {
            assert_eq!(state.as_str().parse::<InvestigationState>().unwrap(), state);
        }
        assert!("limbo".parse::<InvestigationState>().is_err());
    }

    #[test]
    fn test_running_successors() {
        use InvestigationState::*;
        let successors = Running.allowed_transitions();
        for s in [Analyzing, Processing, Coordinating, Pausing, Validating, Completing, Error, Timeout] {
            assert!(successors.contains(&s), "{} missing", s);
        }
        assert!(!Running.can_transition_to(Created));
    }

    #[test]
    fn test_archived_is_a_sink() {
        assert!(InvestigationState::Archived.allowed_transitions().is_empty());
        assert!(InvestigationState::Archived.is_terminal());
    }

    #[test]
    fn test_every_state_reachable_from_created() {
        let mut seen = vec![InvestigationState::Created];
        let mut frontier = vec![InvestigationState::Created];
        while let Some(state) = frontier.pop() {
            for next in state.allowed_transitions() {
                if !seen.contains(next) {
                    seen.push(*next);
                    frontier.push(*next);
                }
            }
        }
        assert_eq!(seen.len(), 20);
    }
}
