//! Investigation state manager.
//!
//! Owns every investigation's current state, context and bounded transition
//! history. Transitions follow the adjacency table on
//! [`InvestigationState`] unless forced; validators run before commit.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{InvestigationContext, InvestigationState, StateTransition};
use super::validators::{
    RequiredFieldsValidator, StateTimeoutValidator, StateValidator, TransitionContext,
};
use crate::config::StateConfig;
use crate::error::{StateError, StateResult};
use crate::events::{Event, EventBus, EventPriority, EventType};

/// Snapshot of one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub investigation_id: String,
    pub state: InvestigationState,
    pub context: InvestigationContext,
    pub created_at: DateTime<Utc>,
    pub state_entered_at: DateTime<Utc>,
    pub history: VecDeque<StateTransition>,
}

/// Aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateStatistics {
    pub total_investigations: usize,
    pub by_state: BTreeMap<String, usize>,
    pub total_transitions: u64,
    pub forced_transitions: u64,
    pub validation_failures: u64,
}

/// Validated lifecycle FSM for investigations.
pub struct InvestigationStateManager {
    config: StateConfig,
    investigations: RwLock<HashMap<String, InvestigationRecord>>,
    validators: RwLock<Vec<Arc<dyn StateValidator>>>,
    bus: Option<Arc<EventBus>>,
    total_transitions: AtomicU64,
    forced_transitions: AtomicU64,
    validation_failures: AtomicU64,
}

impl InvestigationStateManager {
    /// Manager with the built-in validators registered.
    pub fn new(config: StateConfig) -> Self {
        let timeout = Duration::from_secs(config.state_timeout_secs);
        let manager = Self {
            config,
            investigations: RwLock::new(HashMap::new()),
            validators: RwLock::new(Vec::new()),
            bus: None,
            total_transitions: AtomicU64::new(0),
            forced_transitions: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
        };
        manager.register_validator(Arc::new(RequiredFieldsValidator));
        manager.register_validator(Arc::new(StateTimeoutValidator::new(timeout)));
        manager
    }

    /// Publish `StateChanged` events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn register_validator(&self, validator: Arc<dyn StateValidator>) {
        debug!(validator = validator.name(), required = validator.required(), "Validator registered");
        self.validators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(validator);
    }

    /// Start tracking an investigation in `Created`.
    pub fn create_investigation(
        &self,
        investigation_id: &str,
        context: InvestigationContext,
    ) -> StateResult<InvestigationRecord> {
        let mut investigations = self
            .investigations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if investigations.contains_key(investigation_id) {
            return Err(StateError::AlreadyExists {
                investigation_id: investigation_id.to_string(),
            });
        }

        let now = Utc::now();
        let record = InvestigationRecord {
            investigation_id: investigation_id.to_string(),
            state: InvestigationState::Created,
            context,
            created_at: now,
            state_entered_at: now,
            history: VecDeque::new(),
        };
        investigations.insert(investigation_id.to_string(), record.clone());
        drop(investigations);

        info!(investigation_id = investigation_id, "Investigation created");
        self.emit(
            Event::new(EventType::InvestigationCreated, "state_manager")
                .with_investigation(investigation_id),
        );
        Ok(record)
    }

    /// Replace the investigation's context.
    pub fn update_context(
        &self,
        investigation_id: &str,
        context: InvestigationContext,
    ) -> StateResult<()> {
        let mut investigations = self
            .investigations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let record = investigations
            .get_mut(investigation_id)
            .ok_or_else(|| not_found(investigation_id))?;
        record.context = context;
        Ok(())
    }

    /// Move an investigation to `to_state`.
    ///
    /// Illegal transitions are rejected unless `force` is set; forcing also
    /// skips validators. A failing required validator blocks the transition.
    pub fn transition_state(
        &self,
        investigation_id: &str,
        to_state: InvestigationState,
        triggered_by: &str,
        reason: Option<&str>,
        force: bool,
    ) -> StateResult<StateTransition> {
        // Snapshot under a read lock; validators run with no lock held so they
        // may call back into the manager.
        let (from_state, entered_at, context) = self.with_record(investigation_id, |r| {
            (r.state, r.state_entered_at, r.context.clone())
        })?;

        if !force && !from_state.can_transition_to(to_state) {
            warn!(
                investigation_id = investigation_id,
                from = %from_state,
                to = %to_state,
                "Illegal state transition rejected"
            );
            return Err(StateError::InvalidTransition {
                investigation_id: investigation_id.to_string(),
                from: from_state,
                to: to_state,
            });
        }

        let soft_errors = if self.config.validation_enabled && !force {
            let time_in_state = (Utc::now() - entered_at).to_std().unwrap_or(Duration::ZERO);
            self.run_validators(investigation_id, from_state, to_state, &context, time_in_state)?
        } else {
            Vec::new()
        };

        let mut investigations = self
            .investigations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let record = investigations
            .get_mut(investigation_id)
            .ok_or_else(|| not_found(investigation_id))?;
        if record.state != from_state || record.state_entered_at != entered_at {
            warn!(
                investigation_id = investigation_id,
                expected = %from_state,
                actual = %record.state,
                "State changed during validation"
            );
            return Err(StateError::ConcurrentTransition {
                investigation_id: investigation_id.to_string(),
                expected: from_state,
                actual: record.state,
            });
        }

        let now = Utc::now();
        let time_in_state = (now - record.state_entered_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let transition = StateTransition {
            transition_id: Uuid::new_v4().to_string(),
            investigation_id: investigation_id.to_string(),
            from_state,
            to_state,
            triggered_by: triggered_by.to_string(),
            reason: reason.map(str::to_string),
            timestamp: now,
            validation_passed: soft_errors.is_empty(),
            validation_errors: soft_errors,
            duration_seconds: time_in_state.as_secs_f64(),
            forced: force,
        };

        record.state = to_state;
        record.state_entered_at = now;
        if record.history.len() >= self.config.max_history.max(1) {
            record.history.pop_front();
        }
        record.history.push_back(transition.clone());
        drop(investigations);

        self.total_transitions.fetch_add(1, Ordering::Relaxed);
        if force {
            self.forced_transitions.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            investigation_id = investigation_id,
            from = %from_state,
            to = %to_state,
            triggered_by = triggered_by,
            forced = force,
            "Investigation state changed"
        );
        self.publish_transition(&transition);
        Ok(transition)
    }

    pub fn get_state(&self, investigation_id: &str) -> StateResult<InvestigationState> {
        self.with_record(investigation_id, |r| r.state)
    }

    pub fn get_investigation(&self, investigation_id: &str) -> StateResult<InvestigationRecord> {
        self.with_record(investigation_id, |r| r.clone())
    }

    /// Transition history, oldest first.
    pub fn get_history(&self, investigation_id: &str) -> StateResult<Vec<StateTransition>> {
        self.with_record(investigation_id, |r| r.history.iter().cloned().collect())
    }

    /// Seconds spent in each state, from history.
    pub fn time_in_states(&self, investigation_id: &str) -> StateResult<BTreeMap<InvestigationState, f64>> {
        self.with_record(investigation_id, |r| {
            let mut totals = BTreeMap::new();
            for t in &r.history {
                *totals.entry(t.from_state).or_insert(0.0) += t.duration_seconds;
            }
            totals
        })
    }

    /// Ids of all tracked investigations, sorted.
    pub fn investigation_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .investigations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn statistics(&self) -> StateStatistics {
        let investigations = self
            .investigations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut by_state = BTreeMap::new();
        for record in investigations.values() {
            *by_state.entry(record.state.as_str().to_string()).or_insert(0) += 1;
        }
        StateStatistics {
            total_investigations: investigations.len(),
            by_state,
            total_transitions: self.total_transitions.load(Ordering::Relaxed),
            forced_transitions: self.forced_transitions.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }

    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Run applicable validators. Returns optional failures; a required
    /// failure becomes `ValidationFailed`.
    fn run_validators(
        &self,
        investigation_id: &str,
        from_state: InvestigationState,
        to_state: InvestigationState,
        context: &InvestigationContext,
        time_in_state: Duration,
    ) -> StateResult<Vec<String>> {
        let ctx = TransitionContext {
            investigation_id,
            from: from_state,
            to: to_state,
            context,
            time_in_current_state: time_in_state,
        };
        let validators: Vec<Arc<dyn StateValidator>> = self
            .validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|v| v.scope().applies(from_state, to_state))
            .cloned()
            .collect();

        let mut hard_errors = Vec::new();
        let mut soft_errors = Vec::new();
        for validator in &validators {
            if let Err(message) = validator.validate(&ctx) {
                let entry = format!("{}: {}", validator.name(), message);
                if validator.required() {
                    hard_errors.push(entry);
                } else {
                    warn!(
                        investigation_id = investigation_id,
                        validator = validator.name(),
                        message = %message,
                        "Optional validator failed"
                    );
                    soft_errors.push(entry);
                }
            }
        }

        if !hard_errors.is_empty() {
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                investigation_id = investigation_id,
                from = %from_state,
                to = %to_state,
                errors = ?hard_errors,
                "Transition blocked by validation"
            );
            return Err(StateError::ValidationFailed {
                investigation_id: investigation_id.to_string(),
                errors: hard_errors,
            });
        }
        Ok(soft_errors)
    }

    fn with_record<T>(
        &self,
        investigation_id: &str,
        f: impl FnOnce(&InvestigationRecord) -> T,
    ) -> StateResult<T> {
        self.investigations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(investigation_id)
            .map(f)
            .ok_or_else(|| not_found(investigation_id))
    }

    fn publish_transition(&self, transition: &StateTransition) {
        let lifecycle = match transition.to_state {
            InvestigationState::Running if transition.from_state == InvestigationState::Starting => {
                Some(EventType::InvestigationStarted)
            }
            InvestigationState::Paused => Some(EventType::InvestigationPaused),
            InvestigationState::Resuming => Some(EventType::InvestigationResumed),
            InvestigationState::Completed => Some(EventType::InvestigationCompleted),
            InvestigationState::Failed => Some(EventType::InvestigationFailed),
            InvestigationState::Cancelled => Some(EventType::InvestigationCancelled),
            _ => None,
        };

        let priority = match transition.to_state {
            InvestigationState::Error | InvestigationState::Failed | InvestigationState::Timeout => {
                EventPriority::High
            }
            _ => EventPriority::Normal,
        };

        self.emit(
            Event::new(EventType::StateChanged, "state_manager")
                .with_investigation(transition.investigation_id.clone())
                .with_priority(priority)
                .with_data(json!({
                    "from_state": transition.from_state,
                    "to_state": transition.to_state,
                    "triggered_by": transition.triggered_by,
                    "forced": transition.forced,
                    "duration_seconds": transition.duration_seconds,
                })),
        );
        if let Some(event_type) = lifecycle {
            self.emit(
                Event::new(event_type, "state_manager")
                    .with_investigation(transition.investigation_id.clone()),
            );
        }
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(event) {
                warn!(error = %e, "State event not published");
            }
        }
    }
}

fn not_found(investigation_id: &str) -> StateError {
    StateError::InvestigationNotFound {
        investigation_id: investigation_id.to_string(),
    }
}
