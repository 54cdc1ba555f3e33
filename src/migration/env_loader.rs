//! Environment variable overrides for feature flags.
//!
//! `HYBRID_FLAG_<NAME>` sets the master switch and
//! `HYBRID_FLAG_<NAME>_PERCENTAGE` sets the rollout percentage, where `<NAME>`
//! is the upper-cased flag name. Invalid values are logged and skipped.

use tracing::{info, warn};

use super::flags::FeatureFlags;

/// Prefix shared by all flag override variables.
pub const FLAG_ENV_PREFIX: &str = "HYBRID_FLAG_";

const PERCENTAGE_SUFFIX: &str = "_PERCENTAGE";

/// Parse a truthy/falsy string.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Outcome of applying overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideReport {
    /// Variables that changed a flag
    pub applied: Vec<String>,
    /// Variables that were recognised but rejected
    pub ignored: Vec<String>,
}

/// Applies `HYBRID_FLAG_*` overrides to a flag registry.
pub struct EnvironmentLoader;

impl EnvironmentLoader {
    /// Apply overrides from arbitrary key/value pairs.
    pub fn apply_overrides<I, K, V>(flags: &FeatureFlags, vars: I) -> OverrideReport
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut report = OverrideReport::default();

        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref();
            let Some(rest) = key.strip_prefix(FLAG_ENV_PREFIX) else {
                continue;
            };

            let outcome = match rest.strip_suffix(PERCENTAGE_SUFFIX) {
                Some(name) => Self::apply_percentage(flags, &name.to_lowercase(), value),
                None => Self::apply_switch(flags, &rest.to_lowercase(), value),
            };

            match outcome {
                Ok(()) => report.applied.push(key.to_string()),
                Err(reason) => {
                    warn!(variable = key, value = value, reason = %reason, "Ignoring flag override");
                    report.ignored.push(key.to_string());
                }
            }
        }

        if !report.applied.is_empty() {
            info!(count = report.applied.len(), "Applied feature flag overrides from environment");
        }
        report
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(flags: &FeatureFlags) -> OverrideReport {
        Self::apply_overrides(flags, std::env::vars())
    }

    fn apply_switch(flags: &FeatureFlags, flag_name: &str, value: &str) -> Result<(), String> {
        let enabled = parse_bool(value).ok_or_else(|| format!("not a boolean: '{}'", value))?;
        flags.set_enabled(flag_name, enabled).map_err(|e| e.to_string())
    }

    fn apply_percentage(flags: &FeatureFlags, flag_name: &str, value: &str) -> Result<(), String> {
        let percentage: i64 = value
            .trim()
            .parse()
            .map_err(|_| format!("not an integer: '{}'", value))?;
        flags
            .set_rollout_percentage(flag_name, percentage)
            .map_err(|e| e.to_string())
    }
}
