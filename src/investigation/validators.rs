//! Transition validators.
//!
//! A validator declares which transitions it applies to through a
//! [`ValidatorScope`]. Required validators block a transition when they
//! fail; optional ones only produce warnings.

use std::sync::Arc;
use std::time::Duration;

use super::state::{InvestigationContext, InvestigationState};

/// States a validator applies to. Empty lists match any state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorScope {
    pub from_states: Vec<InvestigationState>,
    pub to_states: Vec<InvestigationState>,
}

impl ValidatorScope {
    /// Applies to every transition.
    pub fn any() -> Self {
        Self::default()
    }

    /// Applies to transitions entering one of `states`.
    pub fn entering(states: impl IntoIterator<Item = InvestigationState>) -> Self {
        Self {
            from_states: Vec::new(),
            to_states: states.into_iter().collect(),
        }
    }

    /// Applies to one specific transition.
    pub fn between(from: InvestigationState, to: InvestigationState) -> Self {
        Self {
            from_states: vec![from],
            to_states: vec![to],
        }
    }

    pub fn applies(&self, from: InvestigationState, to: InvestigationState) -> bool {
        (self.from_states.is_empty() || self.from_states.contains(&from))
            && (self.to_states.is_empty() || self.to_states.contains(&to))
    }
}

/// What a validator sees about the pending transition.
#[derive(Debug, Clone)]
pub struct TransitionContext<'a> {
    pub investigation_id: &'a str,
    pub from: InvestigationState,
    pub to: InvestigationState,
    pub context: &'a InvestigationContext,
    pub time_in_current_state: Duration,
}

/// Checks a pending transition.
pub trait StateValidator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failure blocks the transition.
    fn required(&self) -> bool;

    fn scope(&self) -> ValidatorScope;

    /// `Err` carries a human-readable reason.
    fn validate(&self, transition: &TransitionContext<'_>) -> Result<(), String>;
}

/// Entering Running needs an entity to investigate.
pub struct RequiredFieldsValidator;

impl StateValidator for RequiredFieldsValidator {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn required(&self) -> bool {
        true
    }

    fn scope(&self) -> ValidatorScope {
        ValidatorScope::entering([InvestigationState::Running])
    }

    fn validate(&self, transition: &TransitionContext<'_>) -> Result<(), String> {
        let ctx = transition.context;
        let missing: Vec<&str> = [
            ("entity_id", ctx.entity_id.as_deref()),
            ("entity_type", ctx.entity_type.as_deref()),
        ]
        .into_iter()
        .filter(|(_, v)| v.map(str::trim).unwrap_or("").is_empty())
        .map(|(k, _)| k)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required fields: {}", missing.join(", ")))
        }
    }
}

/// Warns when an investigation sat in one state for too long.
pub struct StateTimeoutValidator {
    timeout: Duration,
}

impl StateTimeoutValidator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl StateValidator for StateTimeoutValidator {
    fn name(&self) -> &str {
        "state_timeout"
    }

    fn required(&self) -> bool {
        false
    }

    fn scope(&self) -> ValidatorScope {
        ValidatorScope::any()
    }

    fn validate(&self, transition: &TransitionContext<'_>) -> Result<(), String> {
        if transition.time_in_current_state > self.timeout {
            Err(format!(
                "spent {}s in {} (limit {}s)",
                transition.time_in_current_state.as_secs(),
                transition.from,
                self.timeout.as_secs()
            ))
        } else {
            Ok(())
        }
    }
}

type ValidateFn = dyn Fn(&TransitionContext<'_>) -> Result<(), String> + Send + Sync;

/// Validator backed by a closure.
pub struct FnValidator {
    name: String,
    required: bool,
    scope: ValidatorScope,
    check: Arc<ValidateFn>,
}

impl FnValidator {
    pub fn new<F>(name: impl Into<String>, required: bool, scope: ValidatorScope, check: F) -> Self
    where
        F: Fn(&TransitionContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            required,
            scope,
            check: Arc::new(check),
        }
    }
}

impl StateValidator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn required(&self) -> bool {
        self.required
    }

    fn scope(&self) -> ValidatorScope {
        self.scope.clone()
    }

    fn validate(&self, transition: &TransitionContext<'_>) -> Result<(), String> {
        (self.check)(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvestigationState::*;

    fn transition<'a>(ctx: &'a InvestigationContext, secs: u64) -> TransitionContext<'a> {
        TransitionContext {
            investigation_id: "inv-1",
            from: Starting,
            to: Running,
            context: ctx,
            time_in_current_state: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_scope_matching() {
        assert!(ValidatorScope::any().applies(Created, Initializing));
        assert!(ValidatorScope::entering([Running]).applies(Resuming, Running));
        assert!(!ValidatorScope::entering([Running]).applies(Running, Paused));
        assert!(ValidatorScope::between(Paused, Resuming).applies(Paused, Resuming));
        assert!(!ValidatorScope::between(Paused, Resuming).applies(Paused, Cancelled));
    }

    #[test]
    fn test_required_fields() {
        let empty = InvestigationContext::default();
        let err = RequiredFieldsValidator.validate(&transition(&empty, 0)).unwrap_err();
        assert_eq!(err, "missing required fields: entity_id, entity_type");

        let blank_type = InvestigationContext {
            entity_id: Some("user-1".into()),
            entity_type: Some("  ".into()),
            ..Default::default()
        };
        let err = RequiredFieldsValidator
            .validate(&transition(&blank_type, 0))
            .unwrap_err();
        assert_eq!(err, "missing required fields: entity_type");

        let full = InvestigationContext::for_entity("user-1", "user");
        assert!(RequiredFieldsValidator.validate(&transition(&full, 0)).is_ok());
    }

    #[test]
    fn test_state_timeout() {
        let ctx = InvestigationContext::default();
        let v = StateTimeoutValidator::new(Duration::from_secs(60));
        assert!(v.validate(&transition(&ctx, 30)).is_ok());
        assert!(v.validate(&transition(&ctx, 61)).unwrap_err().contains("starting"));
        assert!(!v.required());
    }
}
