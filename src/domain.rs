//! Investigation domains handled by dedicated agents.

use serde::{Deserialize, Serialize};

/// An investigation sub-area analyzed by its own agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDomain {
    /// IP, ASN, proxy and connection analysis.
    Network,
    /// Device fingerprint and hardware analysis.
    Device,
    /// Geolocation and travel analysis.
    Location,
    /// Authentication and activity log analysis.
    Logs,
    /// Aggregated risk assessment.
    Risk,
}

impl AgentDomain {
    /// All domains in canonical execution order.
    pub const ALL: [AgentDomain; 5] = [
        AgentDomain::Network,
        AgentDomain::Device,
        AgentDomain::Location,
        AgentDomain::Logs,
        AgentDomain::Risk,
    ];

    /// Get the domain name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentDomain::Network => "network",
            AgentDomain::Device => "device",
            AgentDomain::Location => "location",
            AgentDomain::Logs => "logs",
            AgentDomain::Risk => "risk",
        }
    }

    /// Name of the agent responsible for this domain.
    pub fn agent_name(&self) -> String {
        format!("{}_agent", self.as_str())
    }
}

impl std::fmt::Display for AgentDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "network" => Ok(AgentDomain::Network),
            "device" => Ok(AgentDomain::Device),
            "location" => Ok(AgentDomain::Location),
            "logs" => Ok(AgentDomain::Logs),
            "risk" => Ok(AgentDomain::Risk),
            _ => Err(format!("Unknown agent domain: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_round_trip_names() {
        for domain in AgentDomain::ALL {
            assert_eq!(domain.as_str().parse::<AgentDomain>().unwrap(), domain);
        }
        assert_eq!(AgentDomain::Device.agent_name(), "device_agent");
        assert!("billing".parse::<AgentDomain>().is_err());
    }
}
