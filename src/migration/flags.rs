//! Feature flag registry with percentage rollouts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::rollout::RolloutCalculator;
use crate::error::FlagError;

/// Flag gating the hybrid investigation graph.
pub const HYBRID_GRAPH_V1: &str = "hybrid_graph_v1";

/// How a flag is being deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Not deployed anywhere
    Disabled,
    /// Runs alongside the existing path, results not used
    Shadow,
    /// Serves a fraction of traffic
    Canary,
    /// Serves all traffic
    FullRollout,
}

impl DeploymentMode {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Disabled => "disabled",
            DeploymentMode::Shadow => "shadow",
            DeploymentMode::Canary => "canary",
            DeploymentMode::FullRollout => "full_rollout",
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single feature flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name
    pub name: String,
    /// Master switch; `false` forces a 0% rollout
    pub enabled: bool,
    /// Fraction of investigations enabled, 0 - 100
    pub rollout_percentage: u8,
    /// Deployment mode
    pub deployment_mode: DeploymentMode,
    /// Human-readable description
    pub description: String,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl FeatureFlag {
    /// Create a flag, rejecting percentages outside 0 - 100.
    pub fn new(
        name: impl Into<String>,
        enabled: bool,
        rollout_percentage: i64,
        deployment_mode: DeploymentMode,
    ) -> Result<Self, FlagError> {
        let name = name.into();
        let rollout_percentage = validate_percentage(&name, rollout_percentage)?;
        Ok(Self {
            name,
            enabled,
            rollout_percentage,
            deployment_mode,
            description: String::new(),
            updated_at: Utc::now(),
        })
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Percentage actually applied, honoring the master switch.
    pub fn effective_percentage(&self) -> u8 {
        if self.enabled {
            self.rollout_percentage
        } else {
            0
        }
    }
}

/// Point-in-time flag values recorded with graph selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub enabled: bool,
    pub rollout_percentage: u8,
}

pub(crate) fn validate_percentage(flag_name: &str, value: i64) -> Result<u8, FlagError> {
    if !(0..=100).contains(&value) {
        return Err(FlagError::InvalidPercentage {
            flag_name: flag_name.to_string(),
            value,
        });
    }
    Ok(value as u8)
}

/// Thread-safe feature flag registry.
///
/// Reads never mutate state; [`FeatureFlags::is_enabled`] is a pure function
/// of the flag configuration and the investigation id.
pub struct FeatureFlags {
    flags: RwLock<HashMap<String, FeatureFlag>>,
    calculator: RolloutCalculator,
}

impl FeatureFlags {
    /// Create an empty registry.
    pub fn new(calculator: RolloutCalculator) -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
            calculator,
        }
    }

    /// Create a registry with the built-in flags registered.
    pub fn with_defaults(calculator: RolloutCalculator) -> Self {
        let registry = Self::new(calculator);
        for flag in default_flags() {
            registry.register(flag);
        }
        registry
    }

    /// Register or replace a flag.
    pub fn register(&self, flag: FeatureFlag) {
        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        flags.insert(flag.name.clone(), flag);
    }

    /// Get a copy of a flag.
    pub fn get(&self, flag_name: &str) -> Option<FeatureFlag> {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flag_name)
            .cloned()
    }

    /// List all flags sorted by name.
    pub fn list(&self) -> Vec<FeatureFlag> {
        let mut flags: Vec<_> = self
            .flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }

    /// Decide whether a flag is on for an investigation.
    ///
    /// Unknown flags are off. Same inputs always produce the same answer.
    pub fn is_enabled(&self, flag_name: &str, investigation_id: &str) -> bool {
        let flags = self.flags.read().unwrap_or_else(PoisonError::into_inner);
        let Some(flag) = flags.get(flag_name) else {
            warn!(flag = flag_name, "Unknown feature flag requested, treating as disabled");
            return false;
        };

        self.calculator
            .is_in_rollout(flag_name, investigation_id, flag.effective_percentage())
    }

    /// Turn a flag's master switch on or off.
    pub fn set_enabled(&self, flag_name: &str, enabled: bool) -> Result<(), FlagError> {
        self.update(flag_name, |flag| flag.enabled = enabled)?;
        info!(flag = flag_name, enabled = enabled, "Feature flag switched");
        Ok(())
    }

    /// Change a flag's rollout percentage.
    pub fn set_rollout_percentage(&self, flag_name: &str, percentage: i64) -> Result<(), FlagError> {
        let percentage = validate_percentage(flag_name, percentage)?;
        self.update(flag_name, |flag| {
            flag.rollout_percentage = percentage;
            flag.deployment_mode = match percentage {
                0 => flag.deployment_mode,
                100 => DeploymentMode::FullRollout,
                _ => DeploymentMode::Canary,
            };
        })?;
        info!(flag = flag_name, percentage = percentage, "Feature flag rollout changed");
        Ok(())
    }

    /// Enable a flag at the given percentage.
    pub fn enable_flag(&self, flag_name: &str, percentage: i64) -> Result<(), FlagError> {
        self.set_rollout_percentage(flag_name, percentage)?;
        self.set_enabled(flag_name, true)
    }

    /// Disable a flag without touching its percentage.
    pub fn disable_flag(&self, flag_name: &str) -> Result<(), FlagError> {
        self.set_enabled(flag_name, false)
    }

    /// Current values of every flag, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, FlagSnapshot> {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|flag| {
                (
                    flag.name.clone(),
                    FlagSnapshot {
                        enabled: flag.enabled,
                        rollout_percentage: flag.rollout_percentage,
                    },
                )
            })
            .collect()
    }

    /// The calculator used for bucketing.
    pub fn calculator(&self) -> &RolloutCalculator {
        &self.calculator
    }

    fn update(&self, flag_name: &str, apply: impl FnOnce(&mut FeatureFlag)) -> Result<(), FlagError> {
        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        let flag = flags.get_mut(flag_name).ok_or_else(|| FlagError::UnknownFlag {
            flag_name: flag_name.to_string(),
        })?;
        apply(flag);
        flag.updated_at = Utc::now();
        Ok(())
    }
}

fn default_flags() -> Vec<FeatureFlag> {
    let specs: [(&str, bool, u8, DeploymentMode, &str); 6] = [
        (
            HYBRID_GRAPH_V1,
            false,
            0,
            DeploymentMode::Disabled,
            "Route investigations through the hybrid graph",
        ),
        (
            "ai_confidence_engine",
            false,
            0,
            DeploymentMode::Disabled,
            "Confidence scoring for routing decisions",
        ),
        (
            "advanced_safety_manager",
            false,
            0,
            DeploymentMode::Disabled,
            "Safety overrides for autonomous routing",
        ),
        (
            "intelligent_tool_selection",
            false,
            0,
            DeploymentMode::Disabled,
            "Per-domain tool selection",
        ),
        (
            "hybrid_performance_monitoring",
            false,
            0,
            DeploymentMode::Shadow,
            "Extended performance metrics for hybrid graphs",
        ),
        (
            "enhanced_logging",
            true,
            100,
            DeploymentMode::FullRollout,
            "Structured selection audit logging",
        ),
    ];

    specs
        .into_iter()
        .map(|(name, enabled, pct, mode, description)| FeatureFlag {
            name: name.to_string(),
            enabled,
            rollout_percentage: pct,
            deployment_mode: mode,
            description: description.to_string(),
            updated_at: Utc::now(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FeatureFlags {
        FeatureFlags::with_defaults(RolloutCalculator::new("test-seed"))
    }

    #[test]
    fn test_defaults_registered() {
        let flags = registry();
        let hybrid = flags.get(HYBRID_GRAPH_V1).unwrap();
        assert!(!hybrid.enabled);
        assert_eq!(hybrid.rollout_percentage, 0);
        assert!(flags.get("enhanced_logging").unwrap().enabled);
        assert_eq!(flags.list().len(), 6);
    }

    #[test]
    fn test_unknown_flag_is_disabled() {
        let flags = registry();
        assert!(!flags.is_enabled("does_not_exist", "inv-1"));
    }

    #[test]
    fn test_disabled_flag_ignores_percentage() {
        let flags = registry();
        flags.set_rollout_percentage(HYBRID_GRAPH_V1, 100).unwrap();
        flags.set_enabled(HYBRID_GRAPH_V1, false).unwrap();
        for i in 0..100 {
            assert!(!flags.is_enabled(HYBRID_GRAPH_V1, &format!("inv-{}", i)));
        }
    }

    #[test]
    fn test_full_and_zero_rollout() {
        let flags = registry();
        flags.enable_flag(HYBRID_GRAPH_V1, 100).unwrap();
        assert!((0..100).all(|i| flags.is_enabled(HYBRID_GRAPH_V1, &format!("inv-{}", i))));

        flags.set_rollout_percentage(HYBRID_GRAPH_V1, 0).unwrap();
        assert!((0..100).all(|i| !flags.is_enabled(HYBRID_GRAPH_V1, &format!("inv-{}", i))));
    }

    #[test]
    fn test_partial_rollout_is_deterministic() {
        let flags = registry();
        flags.enable_flag(HYBRID_GRAPH_V1, 50).unwrap();
        let first = flags.is_enabled(HYBRID_GRAPH_V1, "inv-123");
        for _ in 0..1000 {
            assert_eq!(flags.is_enabled(HYBRID_GRAPH_V1, "inv-123"), first);
        }
    }

    #[test]
    fn test_invalid_percentage_rejected() {
        let flags = registry();
        let err = flags.set_rollout_percentage(HYBRID_GRAPH_V1, 101).unwrap_err();
        assert!(matches!(err, FlagError::InvalidPercentage { value: 101, .. }));
        assert!(FeatureFlag::new("x", true, -1, DeploymentMode::Canary).is_err());
        assert_eq!(flags.get(HYBRID_GRAPH_V1).unwrap().rollout_percentage, 0);
    }

    #[test]
    fn test_update_unknown_flag_fails() {
        let flags = registry();
        assert!(matches!(
            flags.set_enabled("missing", true),
            Err(FlagError::UnknownFlag { .. })
        ));
    }

    #[test]
    fn test_snapshot_reflects_changes() {
        let flags = registry();
        flags.enable_flag(HYBRID_GRAPH_V1, 25).unwrap();
        let snapshot = flags.snapshot();
        assert_eq!(
            snapshot.get(HYBRID_GRAPH_V1),
            Some(&FlagSnapshot {
                enabled: true,
                rollout_percentage: 25
            })
        );
        assert_eq!(
            flags.get(HYBRID_GRAPH_V1).unwrap().deployment_mode,
            DeploymentMode::Canary
        );
    }
}
