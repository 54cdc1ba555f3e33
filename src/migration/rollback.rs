//! Sticky rollback triggers.
//!
//! Rollback is activated manually or by a health threshold breach and stays
//! active until [`RollbackTriggers::clear_rollback`] is called, even if the
//! monitored metrics recover.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::health::{HealthMonitor, HealthReport};

/// Current rollback state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackState {
    pub rollback_active: bool,
    pub trigger_reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Decides when graph selection must be forced into safe mode.
pub struct RollbackTriggers {
    state: RwLock<RollbackState>,
    monitor: Arc<HealthMonitor>,
}

impl RollbackTriggers {
    /// Create triggers observing the given monitor.
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self {
            state: RwLock::new(RollbackState::default()),
            monitor,
        }
    }

    /// The observed health monitor.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Manually activate rollback.
    pub fn trigger_rollback(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.rollback_active {
            info!(
                existing_reason = ?state.trigger_reason,
                new_reason = %reason,
                "Rollback already active"
            );
            return;
        }
        warn!(reason = %reason, "Rollback activated");
        *state = RollbackState {
            rollback_active: true,
            trigger_reason: Some(reason),
            activated_at: Some(Utc::now()),
        };
    }

    /// Clear an active rollback.
    ///
    /// Returns `true` if a rollback was active.
    pub fn clear_rollback(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let was_active = state.rollback_active;
        if was_active {
            info!(reason = ?state.trigger_reason, "Rollback cleared");
        }
        *state = RollbackState::default();
        was_active
    }

    /// Whether rollback is latched, without consulting health.
    pub fn is_rollback_active(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rollback_active
    }

    /// Copy of the current state.
    pub fn state(&self) -> RollbackState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True if rollback is latched or any health threshold is breached.
    ///
    /// A breach latches rollback with the breached check names as reason.
    pub fn should_rollback(&self) -> bool {
        if self.is_rollback_active() {
            return true;
        }

        let report = self.monitor.health_report();
        self.latch_on_breach(&report)
    }

    /// Evaluate health and return the report used.
    pub fn evaluate(&self) -> (bool, HealthReport) {
        let report = self.monitor.health_report();
        let active = self.is_rollback_active() || self.latch_on_breach(&report);
        (active, report)
    }

    fn latch_on_breach(&self, report: &HealthReport) -> bool {
        let breaches = report.breaches();
        if breaches.is_empty() {
            return false;
        }
        self.trigger_rollback(format!("health threshold breached: {}", breaches.join(", ")));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;

    fn triggers() -> RollbackTriggers {
        RollbackTriggers::new(Arc::new(HealthMonitor::new(HealthConfig::default())))
    }

    #[test]
    fn test_manual_rollback_is_sticky() {
        let t = triggers();
        assert!(!t.should_rollback());

        t.trigger_rollback("manual test");
        assert!(t.should_rollback());
        let state = t.state();
        assert_eq!(state.trigger_reason.as_deref(), Some("manual test"));
        assert!(state.activated_at.is_some());

        assert!(t.clear_rollback());
        assert!(!t.should_rollback());
        assert!(!t.clear_rollback());
    }

    #[test]
    fn test_breach_latches_until_cleared() {
        let t = triggers();
        for _ in 0..10 {
            t.monitor().record_request(false, 100.0, false);
        }
        assert!(t.should_rollback());
        assert!(t
            .state()
            .trigger_reason
            .unwrap()
            .contains("error_rate"));

        // Recovery alone does not clear.
        t.monitor().reset();
        assert!(t.monitor().health_report().is_healthy());
        assert!(t.should_rollback());

        t.clear_rollback();
        assert!(!t.should_rollback());
    }

    #[test]
    fn test_second_trigger_keeps_first_reason() {
        let t = triggers();
        t.trigger_rollback("first");
        t.trigger_rollback("second");
        assert_eq!(t.state().trigger_reason.as_deref(), Some("first"));
    }
}
