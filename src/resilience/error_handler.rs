//! Error handler keeping one circuit breaker per error category.
//!
//! Categories are free-form strings such as `tool`, `graph_build` or
//! `agent:device_agent`. Once a category's breaker opens, calls in that
//! category short-circuit to a [`FallbackResponse`] until the recovery
//! timeout lets a half-open trial through.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState};
use crate::config::CircuitBreakerConfig;

const MAX_RECENT_ERRORS: usize = 200;

/// Degraded response returned while a category's breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub category: String,
    pub message: String,
    pub recovery_in_secs: Option<i64>,
}

/// What the handler did with a reported error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Counted; the breaker is still letting calls through
    Recorded { consecutive_failures: u32 },
    /// The breaker is open; callers should degrade
    Fallback(FallbackResponse),
}

/// Outcome of [`ErrorHandler::call`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Completed(T),
    Failed { category: String, error: String },
    ShortCircuited(FallbackResponse),
}

impl<T> CallOutcome<T> {
    /// Value of a completed call.
    pub fn ok(self) -> Option<T> {
        match self {
            CallOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_short_circuited(&self) -> bool {
        matches!(self, CallOutcome::ShortCircuited(_))
    }
}

/// A reported error, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Category-keyed error accounting with circuit breaking.
pub struct ErrorHandler {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    recent: Mutex<VecDeque<ErrorRecord>>,
    total_errors: AtomicU64,
}

impl ErrorHandler {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::new()),
            total_errors: AtomicU64::new(0),
        }
    }

    /// Report an error in a category.
    pub fn handle_error(&self, category: &str, error: &str) -> ErrorDisposition {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() >= MAX_RECENT_ERRORS {
                recent.pop_front();
            }
            recent.push_back(ErrorRecord {
                category: category.to_string(),
                message: error.to_string(),
                timestamp: Utc::now(),
            });
        }

        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let breaker = self.breaker_entry(&mut breakers, category);
        breaker.record_failure();
        warn!(
            category = category,
            error = error,
            consecutive_failures = breaker.summary().consecutive_failures,
            state = %breaker.state(),
            "Error recorded"
        );

        if breaker.is_open() {
            ErrorDisposition::Fallback(fallback_for(breaker))
        } else {
            ErrorDisposition::Recorded {
                consecutive_failures: breaker.summary().consecutive_failures,
            }
        }
    }

    /// Ask whether a call in `category` may proceed.
    pub fn allow(&self, category: &str) -> Result<(), FallbackResponse> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let breaker = self.breaker_entry(&mut breakers, category);
        if breaker.can_execute() {
            Ok(())
        } else {
            Err(fallback_for(breaker))
        }
    }

    /// Report a successful call.
    pub fn record_success(&self, category: &str) {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        self.breaker_entry(&mut breakers, category).record_success();
    }

    /// Run `fut` guarded by the category's breaker.
    ///
    /// The lock is not held across the await.
    pub async fn call<T, E, Fut>(&self, category: &str, fut: Fut) -> CallOutcome<T>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(fallback) = self.allow(category) {
            debug!(category = category, "Call short-circuited");
            return CallOutcome::ShortCircuited(fallback);
        }

        match fut.await {
            Ok(value) => {
                self.record_success(category);
                CallOutcome::Completed(value)
            }
            Err(e) => {
                let error = e.to_string();
                self.handle_error(category, &error);
                CallOutcome::Failed {
                    category: category.to_string(),
                    error,
                }
            }
        }
    }

    /// Breaker state for a category; unknown categories are closed.
    pub fn circuit_state(&self, category: &str) -> CircuitState {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Reset a category's breaker. Returns `false` if unknown.
    pub fn reset(&self, category: &str) -> bool {
        match self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(category)
        {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Summaries of all known breakers, sorted by category.
    pub fn summaries(&self) -> Vec<CircuitBreakerSummary> {
        let mut summaries: Vec<_> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.summary())
            .collect();
        summaries.sort_by(|a, b| a.category.cmp(&b.category));
        summaries
    }

    /// Most recent errors, oldest first.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    fn breaker_entry<'a>(
        &self,
        breakers: &'a mut HashMap<String, CircuitBreaker>,
        category: &str,
    ) -> &'a mut CircuitBreaker {
        breakers
            .entry(category.to_string())
            .or_insert_with(|| CircuitBreaker::new(category, self.config.clone()))
    }
}

fn fallback_for(breaker: &CircuitBreaker) -> FallbackResponse {
    let recovery_in_secs = breaker.time_until_recovery().map(|d| d.num_seconds());
    FallbackResponse {
        category: breaker.category().to_string(),
        message: format!(
            "{} is temporarily unavailable after repeated failures",
            breaker.category()
        ),
        recovery_in_secs,
    }
}
