//! Per-category circuit breaker.
//!
//! Standard closed/open/half-open state machine:
//!
//! - **Closed**: calls pass through, consecutive failures are counted
//! - **Open**: calls short-circuit to a fallback until the recovery timeout
//! - **Half-Open**: trial calls pass; a failure reopens, enough successes close

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Circuit breaker guarding one error category.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    category: String,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_failures: u64,
    total_successes: u64,
    /// Calls rejected while open
    short_circuited: u64,
    opened_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker for a category.
    pub fn new(category: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            category: category.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_failures: 0,
            total_successes: 0,
            short_circuited: 0,
            opened_at: None,
            last_state_change: Utc::now(),
            config,
        }
    }

    /// Check whether a call may proceed.
    ///
    /// An open breaker moves to half-open once the recovery timeout has
    /// elapsed since it opened. Rejected calls are counted.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.recovery_elapsed(Utc::now()) {
                    self.transition_to(CircuitState::HalfOpen);
                    return true;
                }
                self.short_circuited += 1;
                false
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.total_successes += 1;

        match self.state {
            CircuitState::HalfOpen => {
                if self.consecutive_successes >= self.config.success_threshold.max(1) {
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                warn!(
                    category = %self.category,
                    "Success recorded while circuit is open, moving to half-open"
                );
                self.transition_to(CircuitState::HalfOpen);
            }
            CircuitState::Closed => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.total_failures += 1;

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn recovery_elapsed(&self, now: DateTime<Utc>) -> bool {
        let timeout = ChronoDuration::seconds(self.config.recovery_timeout_secs as i64);
        self.opened_at
            .map(|opened| now - opened >= timeout)
            .unwrap_or(true)
    }

    fn transition_to(&mut self, new_state: CircuitState) {
        info!(
            category = %self.category,
            from = %self.state,
            to = %new_state,
            consecutive_failures = self.consecutive_failures,
            "Circuit breaker state transition"
        );
        if new_state == CircuitState::Open {
            self.opened_at = Some(Utc::now());
        }
        if new_state == CircuitState::HalfOpen {
            self.consecutive_successes = 0;
        }
        self.state = new_state;
        self.last_state_change = Utc::now();
    }

    /// Category this breaker guards.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Check if the circuit is open.
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Time until a half-open attempt is allowed, if open.
    pub fn time_until_recovery(&self) -> Option<ChronoDuration> {
        if self.state != CircuitState::Open {
            return None;
        }
        self.opened_at.map(|opened| {
            let timeout = ChronoDuration::seconds(self.config.recovery_timeout_secs as i64);
            let elapsed = Utc::now() - opened;
            if elapsed >= timeout {
                ChronoDuration::zero()
            } else {
                timeout - elapsed
            }
        })
    }

    /// Manually reset to closed.
    pub fn reset(&mut self) {
        info!(category = %self.category, from = %self.state, "Circuit breaker manually reset");
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
        self.last_state_change = Utc::now();
    }

    /// Snapshot for status output.
    pub fn summary(&self) -> CircuitBreakerSummary {
        CircuitBreakerSummary {
            category: self.category.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            short_circuited: self.short_circuited,
            recovery_in_secs: self.time_until_recovery().map(|d| d.num_seconds()),
            last_state_change: self.last_state_change,
        }
    }
}

/// Serializable breaker snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSummary {
    pub category: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub short_circuited: u64,
    pub recovery_in_secs: Option<i64>,
    pub last_state_change: DateTime<Utc>,
}

impl std::fmt::Display for CircuitBreakerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ", self.category, self.state.as_str().to_uppercase())?;
        match (self.state, self.recovery_in_secs) {
            (CircuitState::Open, Some(secs)) if secs > 60 => write!(f, "(recovery in {}m)", secs / 60),
            (CircuitState::Open, Some(secs)) => write!(f, "(recovery in {}s)", secs),
            _ => write!(f, "({} consecutive failures)", self.consecutive_failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(recovery_timeout_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout_secs,
        }
    }

    fn opened(recovery_timeout_secs: u64) -> CircuitBreaker {
        let mut cb = CircuitBreaker::new("agent:device_agent", config(recovery_timeout_secs));
        for _ in 0..3 {
            cb.record_failure();
        }
        cb
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut cb = CircuitBreaker::new("tool", config(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.can_execute());
        assert_eq!(cb.summary().short_circuited, 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut cb = CircuitBreaker::new("tool", config(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let mut cb = opened(0);
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = opened(0);
        assert!(cb.can_execute());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn test_time_until_recovery() {
        let cb = opened(300);
        let remaining = cb.time_until_recovery().unwrap();
        assert!(remaining.num_seconds() > 290);
        assert!(cb.summary().to_string().contains("OPEN"));
    }

    #[test]
    fn test_reset() {
        let mut cb = opened(300);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.time_until_recovery().is_none());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
        assert_eq!("open".parse::<CircuitState>().unwrap(), CircuitState::Open);
        assert!("ajar".parse::<CircuitState>().is_err());
    }
}
