//! Health monitoring for graph rollouts.
//!
//! Keeps metric samples in a rolling time window and evaluates them against
//! independent thresholds:
//!
//! ```text
//! Samples → Window Prune → Aggregation → Threshold Checks → HealthReport
//! ```
//!
//! The performance check compares the average response time of the newer
//! half of the window against the older half.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HealthConfig;

// ============================================================================
// Samples
// ============================================================================

/// A single observation fed into the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleKind {
    /// One investigation request
    Request {
        success: bool,
        response_time_ms: f64,
        safety_override: bool,
    },
    /// Resource utilisation, 0.0 - 1.0
    Resources { memory_usage: f64, cpu_usage: f64 },
}

/// Timestamped sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub kind: SampleKind,
}

impl MetricSample {
    /// Request sample stamped now.
    pub fn request(success: bool, response_time_ms: f64, safety_override: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: SampleKind::Request {
                success,
                response_time_ms,
                safety_override,
            },
        }
    }

    /// Resource sample stamped now.
    pub fn resources(memory_usage: f64, cpu_usage: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: SampleKind::Resources {
                memory_usage,
                cpu_usage,
            },
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ============================================================================
// Report
// ============================================================================

/// Result of evaluating the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub request_count: usize,
    pub error_rate: f64,
    pub error_rate_breached: bool,
    /// Relative increase of recent vs baseline response time, if measurable
    pub performance_degradation: Option<f64>,
    pub performance_breached: bool,
    pub override_rate: f64,
    pub override_rate_breached: bool,
    pub memory_usage: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub resource_breached: bool,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    /// True when no threshold is breached.
    pub fn is_healthy(&self) -> bool {
        self.breaches().is_empty()
    }

    /// Names of breached checks.
    pub fn breaches(&self) -> Vec<&'static str> {
        let mut breaches = Vec::new();
        if self.error_rate_breached {
            breaches.push("error_rate");
        }
        if self.performance_breached {
            breaches.push("performance_degradation");
        }
        if self.override_rate_breached {
            breaches.push("safety_override_rate");
        }
        if self.resource_breached {
            breaches.push("resource_usage");
        }
        breaches
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Rolling-window health monitor.
pub struct HealthMonitor {
    config: HealthConfig,
    samples: RwLock<VecDeque<MetricSample>>,
}

impl HealthMonitor {
    /// Create a monitor with the given thresholds.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            samples: RwLock::new(VecDeque::new()),
        }
    }

    /// Thresholds in use.
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record a sample, pruning anything outside the window.
    pub fn record(&self, sample: MetricSample) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let pos = samples
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map(|p| p + 1)
            .unwrap_or(0);
        samples.insert(pos, sample);
        Self::prune(&mut samples, self.window_start());
        debug!(retained = samples.len(), "Recorded health sample");
    }

    /// Record a request outcome.
    pub fn record_request(&self, success: bool, response_time_ms: f64, safety_override: bool) {
        self.record(MetricSample::request(success, response_time_ms, safety_override));
    }

    /// Record resource utilisation.
    pub fn record_resources(&self, memory_usage: f64, cpu_usage: f64) {
        self.record(MetricSample::resources(memory_usage, cpu_usage));
    }

    /// Number of samples currently inside the window.
    pub fn sample_count(&self) -> usize {
        self.window_samples().len()
    }

    /// Error rate over the window.
    pub fn error_rate(&self) -> f64 {
        let requests = self.requests();
        if requests.is_empty() {
            return 0.0;
        }
        let errors = requests.iter().filter(|r| !r.success).count();
        errors as f64 / requests.len() as f64
    }

    /// Safety override rate over the window.
    pub fn override_rate(&self) -> f64 {
        let requests = self.requests();
        if requests.is_empty() {
            return 0.0;
        }
        let overrides = requests.iter().filter(|r| r.safety_override).count();
        overrides as f64 / requests.len() as f64
    }

    /// Relative response-time increase of the newer half over the older half.
    ///
    /// `None` until `min_samples` requests are in the window or when the
    /// baseline average is zero.
    pub fn performance_degradation(&self) -> Option<f64> {
        let requests = self.requests();
        if requests.len() < self.config.min_samples.max(2) {
            return None;
        }
        let mid = requests.len() / 2;
        let baseline = average(requests[..mid].iter().map(|r| r.response_time_ms));
        let recent = average(requests[mid..].iter().map(|r| r.response_time_ms));
        if baseline <= 0.0 {
            return None;
        }
        Some((recent - baseline) / baseline)
    }

    /// Most recent resource sample inside the window.
    pub fn latest_resources(&self) -> Option<(f64, f64)> {
        self.window_samples().iter().rev().find_map(|s| match s.kind {
            SampleKind::Resources {
                memory_usage,
                cpu_usage,
            } => Some((memory_usage, cpu_usage)),
            _ => None,
        })
    }

    /// Evaluate all checks.
    pub fn health_report(&self) -> HealthReport {
        let requests = self.requests();
        let error_rate = self.error_rate();
        let override_rate = self.override_rate();
        let performance_degradation = self.performance_degradation();
        let resources = self.latest_resources();

        let resource_breached = resources
            .map(|(mem, cpu)| mem > self.config.memory_threshold || cpu > self.config.cpu_threshold)
            .unwrap_or(false);

        // Rates over a handful of requests are noise; a breach latches rollback.
        let enough_requests = requests.len() >= self.config.min_samples.max(1);

        HealthReport {
            request_count: requests.len(),
            error_rate,
            error_rate_breached: enough_requests && error_rate > self.config.error_rate_threshold,
            performance_degradation,
            performance_breached: performance_degradation
                .map(|d| d > self.config.performance_degradation_threshold)
                .unwrap_or(false),
            override_rate,
            override_rate_breached: enough_requests
                && override_rate > self.config.override_rate_threshold,
            memory_usage: resources.map(|(m, _)| m),
            cpu_usage: resources.map(|(_, c)| c),
            resource_breached,
            generated_at: Utc::now(),
        }
    }

    /// Drop all samples.
    pub fn reset(&self) {
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn window_start(&self) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::seconds(self.config.window_secs as i64)
    }

    fn prune(samples: &mut VecDeque<MetricSample>, window_start: DateTime<Utc>) {
        while samples
            .front()
            .map(|s| s.timestamp < window_start)
            .unwrap_or(false)
        {
            samples.pop_front();
        }
    }

    fn window_samples(&self) -> Vec<MetricSample> {
        let window_start = self.window_start();
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.timestamp >= window_start)
            .cloned()
            .collect()
    }

    fn requests(&self) -> Vec<RequestObservation> {
        self.window_samples()
            .into_iter()
            .filter_map(|s| match s.kind {
                SampleKind::Request {
                    success,
                    response_time_ms,
                    safety_override,
                } => Some(RequestObservation {
                    success,
                    response_time_ms,
                    safety_override,
                }),
                _ => None,
            })
            .collect()
    }
}

struct RequestObservation {
    success: bool,
    response_time_ms: f64,
    safety_override: bool,
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(HealthConfig::default())
    }

    #[test]
    fn test_empty_monitor_is_healthy() {
        let report = monitor().health_report();
        assert!(report.is_healthy());
        assert_eq!(report.request_count, 0);
        assert_eq!(report.performance_degradation, None);
    }

    #[test]
    fn test_error_rate_breach() {
        let m = monitor();
        for i in 0..10 {
            m.record_request(i >= 2, 100.0, false);
        }
        let report = m.health_report();
        assert!((report.error_rate - 0.2).abs() < 1e-9);
        assert!(report.error_rate_breached);
        assert_eq!(report.breaches(), vec!["error_rate"]);
    }

    #[test]
    fn test_rates_need_min_samples() {
        let m = monitor();
        for _ in 0..3 {
            m.record_request(false, 100.0, true);
        }
        let report = m.health_report();
        assert_eq!(report.error_rate, 1.0);
        assert!(!report.error_rate_breached);
        assert!(!report.override_rate_breached);

        m.record_request(false, 100.0, true);
        let report = m.health_report();
        assert_eq!(report.request_count, 4);
        assert!(report.error_rate_breached);
        assert!(report.override_rate_breached);
    }

    #[test]
    fn test_error_rate_at_threshold_is_not_breach() {
        let m = monitor();
        for i in 0..10 {
            m.record_request(i != 0, 100.0, false);
        }
        assert!(!m.health_report().error_rate_breached);
    }

    #[test]
    fn test_performance_degradation() {
        let m = monitor();
        let base = Utc::now() - ChronoDuration::seconds(60);
        for i in 0..4 {
            m.record(MetricSample::request(true, 100.0, false).at(base + ChronoDuration::seconds(i)));
        }
        for i in 4..8 {
            m.record(MetricSample::request(true, 150.0, false).at(base + ChronoDuration::seconds(i)));
        }
        let degradation = m.performance_degradation().unwrap();
        assert!((degradation - 0.5).abs() < 1e-9);
        assert!(m.health_report().performance_breached);
    }

    #[test]
    fn test_override_rate_breach() {
        let m = monitor();
        for i in 0..10 {
            m.record_request(true, 50.0, i < 4);
        }
        let report = m.health_report();
        assert!(report.override_rate_breached);
        assert!(!report.error_rate_breached);
    }

    #[test]
    fn test_resource_breach_uses_latest_sample() {
        let m = monitor();
        m.record(MetricSample::resources(0.95, 0.2).at(Utc::now() - ChronoDuration::seconds(30)));
        assert!(m.health_report().resource_breached);

        m.record_resources(0.5, 0.5);
        let report = m.health_report();
        assert!(!report.resource_breached);
        assert_eq!(report.memory_usage, Some(0.5));

        m.record_resources(0.5, 0.95);
        assert!(m.health_report().resource_breached);
    }

    #[test]
    fn test_samples_outside_window_are_pruned() {
        let m = monitor();
        let old = Utc::now() - ChronoDuration::minutes(20);
        for _ in 0..5 {
            m.record(MetricSample::request(false, 100.0, false).at(old));
        }
        m.record_request(true, 100.0, false);
        assert_eq!(m.sample_count(), 1);
        assert_eq!(m.error_rate(), 0.0);
    }
}
