//! The loaded roster and its trait implementations.
//!
//! `Roster` is read-only after construction. It answers two questions for
//! the bus: who resolves a conflict at a given level (`EscalationPolicy`),
//! and what each agent can do (`CapabilityDirectory`).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, info};

use concord_contracts::{
    agent::AgentId,
    capability::CapabilitySet,
    config::BusConfig,
    error::{CoordError, CoordResult},
    payload::EscalationLevel,
};
use concord_core::{
    traits::{CapabilityDirectory, EscalationPolicy},
    SYSTEM_SENDER,
};

use crate::profile::RosterConfig;

/// A validated roster.
///
/// ```rust,ignore
/// use concord_roster::Roster;
///
/// let roster = Roster::from_file(Path::new("config/roster.toml"))?;
/// let bus = CoordinationBus::new(roster.timing().clone(), clock, Arc::new(roster.clone()), Arc::new(roster), history);
/// ```
#[derive(Debug, Clone)]
pub struct Roster {
    config: RosterConfig,
    profiles: BTreeMap<AgentId, CapabilitySet>,
}

impl Roster {
    /// Parse `s` as TOML and validate it.
    ///
    /// Returns `CoordError::ConfigError` if the TOML is malformed, an agent id
    /// is blank, reserved or listed twice, or a timing value is out of range.
    pub fn from_toml_str(s: &str) -> CoordResult<Self> {
        let config: RosterConfig = toml::from_str(s).map_err(|e| CoordError::ConfigError {
            reason: format!("failed to parse roster TOML: {}", e),
        })?;
        Self::from_config(config)
    }

    /// Read the file at `path` and parse it as a roster.
    pub fn from_file(path: &Path) -> CoordResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CoordError::ConfigError {
            reason: format!("failed to read roster file '{}': {}", path.display(), e),
        })?;
        let roster = Self::from_toml_str(&contents)?;
        info!(
            path = %path.display(),
            agents = roster.profiles.len(),
            "roster loaded"
        );
        Ok(roster)
    }

    pub fn from_config(config: RosterConfig) -> CoordResult<Self> {
        validate_timing(&config.timing)?;

        let escalation = &config.escalation;
        for (level, role) in [
            ("peer", &escalation.peer),
            ("superior", &escalation.superior),
            ("executive", &escalation.executive),
        ] {
            if role.trim().is_empty() {
                return Err(config_error(format!("escalation.{} must name an agent", level)));
            }
        }

        let mut profiles = BTreeMap::new();
        for agent in &config.agents {
            let id = agent.id.trim();
            if id.is_empty() {
                return Err(config_error("agent id must not be blank"));
            }
            if id == SYSTEM_SENDER {
                return Err(config_error(format!(
                    "agent id '{}' is reserved for the bus itself",
                    SYSTEM_SENDER
                )));
            }
            let capabilities: CapabilitySet = agent.capabilities.iter().map(String::as_str).collect();
            if profiles.insert(AgentId::new(id), capabilities).is_some() {
                return Err(config_error(format!("agent '{}' is listed more than once", id)));
            }
            debug!(agent_id = %id, capabilities = agent.capabilities.len(), "agent profile loaded");
        }

        Ok(Self { config, profiles })
    }

    pub fn timing(&self) -> &BusConfig {
        &self.config.timing
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }
}

fn validate_timing(timing: &BusConfig) -> CoordResult<()> {
    let intervals = [
        ("health_check_interval_secs", timing.health_check_interval_secs),
        ("retry_sweep_interval_secs", timing.retry_sweep_interval_secs),
        ("timeout_sweep_interval_ms", timing.timeout_sweep_interval_ms),
        ("history_cleanup_interval_secs", timing.history_cleanup_interval_secs),
    ];
    for (name, value) in intervals {
        if value == 0 {
            return Err(config_error(format!("timing.{} must be greater than zero", name)));
        }
    }
    if timing.degraded_after_secs > timing.heartbeat_timeout_secs {
        return Err(config_error(
            "timing.degraded_after_secs must not exceed timing.heartbeat_timeout_secs",
        ));
    }
    let threshold = timing.redistribution_load_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(config_error(format!(
            "timing.redistribution_load_threshold must be in (0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

fn config_error(reason: impl Into<String>) -> CoordError {
    CoordError::ConfigError {
        reason: reason.into(),
    }
}

impl EscalationPolicy for Roster {
    fn resolver_for(&self, level: EscalationLevel) -> AgentId {
        let table = &self.config.escalation;
        let role = match level {
            EscalationLevel::Peer => &table.peer,
            EscalationLevel::Superior => &table.superior,
            EscalationLevel::Executive => &table.executive,
        };
        AgentId::new(role.trim())
    }

    fn executive_roles(&self) -> Vec<AgentId> {
        self.config
            .escalation
            .executive_roles
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(|r| AgentId::new(r))
            .collect()
    }
}

impl CapabilityDirectory for Roster {
    fn capabilities_of(&self, agent_id: &AgentId) -> CapabilitySet {
        self.profiles.get(agent_id).cloned().unwrap_or_default()
    }

    fn agents(&self) -> Vec<AgentId> {
        self.profiles.keys().cloned().collect()
    }
}
