use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub rollout: RolloutConfig,
    pub health: HealthConfig,
    pub state: StateConfig,
    pub analysis: AnalysisConfig,
    pub bus: EventBusConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rag: RagConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Database configuration for the audit store
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Rollout bucketing configuration
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Seed mixed into every rollout hash. Changing it reshuffles all buckets.
    pub seed: String,
}

/// Health monitor thresholds and window
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Rolling window for retained samples (seconds)
    pub window_secs: u64,
    /// Error rate threshold (0.0 - 1.0)
    pub error_rate_threshold: f64,
    /// Relative response-time increase of recent vs baseline (0.0 - 1.0)
    pub performance_degradation_threshold: f64,
    /// Safety override rate threshold (0.0 - 1.0)
    pub override_rate_threshold: f64,
    /// Memory usage threshold (0.0 - 1.0)
    pub memory_threshold: f64,
    /// CPU usage threshold (0.0 - 1.0)
    pub cpu_threshold: f64,
    /// Minimum samples before the performance check is meaningful
    pub min_samples: usize,
}

/// Investigation state machine configuration
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Maximum transitions kept per investigation
    pub max_history: usize,
    /// Run registered validators before committing transitions
    pub validation_enabled: bool,
    /// Time in a single state before the timeout validator warns (seconds)
    pub state_timeout_secs: u64,
}

/// Cross-entity analyzer tuning
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub correlation_threshold: f64,
    pub anomaly_risk_threshold: f64,
    pub anomaly_window_minutes: i64,
    pub behavioral_tolerance: f64,
    pub consistency_stdev: f64,
    pub escalation_delta: f64,
    /// Upper bound on entity count for the all-pairs similarity scan
    pub max_pairwise_entities: usize,
}

/// Event bus and communication hub sizing
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub queue_size: usize,
    pub hub_queue_size: usize,
    pub default_message_ttl_secs: u64,
}

/// Configuration for per-category circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening circuit
    pub failure_threshold: u32,

    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,

    /// Time to wait before attempting recovery (seconds)
    pub recovery_timeout_secs: u64,
}

/// Retrieval-augmented generation configuration
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub min_similarity: f64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_context_chars: usize,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/investigations.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let rollout = RolloutConfig {
            seed: env::var("ROLLOUT_SEED").unwrap_or_else(|_| RolloutConfig::default().seed),
        };

        let defaults = HealthConfig::default();
        let health = HealthConfig {
            window_secs: env_or("HEALTH_WINDOW_SECS", defaults.window_secs),
            error_rate_threshold: env_or(
                "HEALTH_ERROR_RATE_THRESHOLD",
                defaults.error_rate_threshold,
            ),
            performance_degradation_threshold: env_or(
                "HEALTH_PERF_DEGRADATION_THRESHOLD",
                defaults.performance_degradation_threshold,
            ),
            override_rate_threshold: env_or(
                "HEALTH_OVERRIDE_RATE_THRESHOLD",
                defaults.override_rate_threshold,
            ),
            memory_threshold: env_or("HEALTH_MEMORY_THRESHOLD", defaults.memory_threshold),
            cpu_threshold: env_or("HEALTH_CPU_THRESHOLD", defaults.cpu_threshold),
            min_samples: defaults.min_samples,
        };
        health.validate()?;

        let state = StateConfig {
            max_history: env_or("STATE_MAX_HISTORY", 100),
            validation_enabled: env::var("STATE_VALIDATION_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            state_timeout_secs: env_or("STATE_TIMEOUT_SECS", 3600),
        };

        let defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            correlation_threshold: env_or(
                "ANALYSIS_CORRELATION_THRESHOLD",
                defaults.correlation_threshold,
            ),
            anomaly_window_minutes: env_or(
                "ANALYSIS_ANOMALY_WINDOW_MINUTES",
                defaults.anomaly_window_minutes,
            ),
            max_pairwise_entities: env_or(
                "ANALYSIS_MAX_PAIRWISE_ENTITIES",
                defaults.max_pairwise_entities,
            ),
            ..defaults
        };

        let bus = EventBusConfig {
            queue_size: env_or("EVENT_BUS_QUEUE_SIZE", 1000),
            hub_queue_size: env_or("HUB_QUEUE_SIZE", 1000),
            default_message_ttl_secs: env_or("HUB_MESSAGE_TTL_SECS", 300),
        };
        if bus.queue_size == 0 || bus.hub_queue_size == 0 {
            return Err(AppError::Config {
                message: "EVENT_BUS_QUEUE_SIZE and HUB_QUEUE_SIZE must be positive".to_string(),
            });
        }

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_or("CB_FAILURE_THRESHOLD", 5),
            success_threshold: env_or("CB_SUCCESS_THRESHOLD", 1),
            recovery_timeout_secs: env_or("CB_RECOVERY_TIMEOUT_SECS", 300),
        };

        let defaults = RagConfig::default();
        let rag = RagConfig {
            enabled: env::var("RAG_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            top_k: env_or("RAG_TOP_K", defaults.top_k),
            ..defaults
        };

        Ok(Config {
            logging,
            database,
            rollout,
            health,
            state,
            analysis,
            bus,
            circuit_breaker,
            rag,
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/investigations.db"),
            max_connections: 5,
        }
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            seed: "hybrid-rollout".to_string(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_secs: 600, // 10 minutes
            error_rate_threshold: 0.10,
            performance_degradation_threshold: 0.20,
            override_rate_threshold: 0.30,
            memory_threshold: 0.85,
            cpu_threshold: 0.90,
            min_samples: 4,
        }
    }
}

impl HealthConfig {
    /// Reject thresholds outside 0.0 - 1.0.
    pub fn validate(&self) -> Result<(), AppError> {
        let checks = [
            ("error_rate_threshold", self.error_rate_threshold),
            (
                "performance_degradation_threshold",
                self.performance_degradation_threshold,
            ),
            ("override_rate_threshold", self.override_rate_threshold),
            ("memory_threshold", self.memory_threshold),
            ("cpu_threshold", self.cpu_threshold),
        ];
        for (name, value) in checks {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config {
                    message: format!("{} must be between 0.0 and 1.0, got {}", name, value),
                });
            }
        }
        Ok(())
    }

    /// Get the rolling window as Duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            validation_enabled: true,
            state_timeout_secs: 3600,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.7,
            anomaly_risk_threshold: 0.7,
            anomaly_window_minutes: 60,
            behavioral_tolerance: 0.1,
            consistency_stdev: 0.2,
            escalation_delta: 0.05,
            max_pairwise_entities: 200,
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            hub_queue_size: 1000,
            default_message_ttl_secs: 300,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout_secs: 300, // 5 minutes
        }
    }
}

impl CircuitBreakerConfig {
    /// Get recovery timeout as Duration.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 5,
            min_similarity: 0.1,
            chunk_size: 200,
            chunk_overlap: 40,
            max_context_chars: 4000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = Config::default();
        assert_eq!(config.health.window_secs, 600);
        assert_eq!(config.health.error_rate_threshold, 0.10);
        assert_eq!(config.health.cpu_threshold, 0.90);
        assert_eq!(config.state.max_history, 100);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.analysis.max_pairwise_entities, 200);
    }

    #[test]
    fn test_health_config_validation() {
        let mut config = HealthConfig::default();
        assert!(config.validate().is_ok());

        config.memory_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("memory_threshold"));
    }

    #[test]
    fn test_duration_helpers() {
        assert_eq!(HealthConfig::default().window(), Duration::from_secs(600));
        assert_eq!(
            CircuitBreakerConfig::default().recovery_timeout(),
            Duration::from_secs(300)
        );
    }
}
