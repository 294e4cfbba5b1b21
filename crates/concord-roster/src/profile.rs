//! Roster configuration schema.
//!
//! A `RosterConfig` is deserialized from TOML. Every table is optional:
//! an empty document yields default timing, the default escalation table,
//! and no pre-registered agents.

use serde::{Deserialize, Serialize};

use concord_contracts::config::BusConfig;

/// One agent the bus should know about from startup.
///
/// Example in TOML:
/// ```toml
/// [[agents]]
/// id = "backend-developer"
/// capabilities = ["rust", "api-design"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,

    /// Skills used to match a replacement when this agent's work has to move.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Who arbitrates conflicts at each escalation level, and who hears about
/// resource contention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationTable {
    pub peer: String,
    pub superior: String,
    pub executive: String,
    pub executive_roles: Vec<String>,
}

impl Default for EscalationTable {
    fn default() -> Self {
        Self {
            peer: "system-architect".to_string(),
            superior: "program-manager".to_string(),
            executive: "cto".to_string(),
            executive_roles: vec!["cto".to_string(), "ceo".to_string(), "coo".to_string()],
        }
    }
}

/// The top-level structure deserialized from a roster file.
///
/// Example:
/// ```toml
/// [timing]
/// heartbeat_timeout_secs = 120
///
/// [escalation]
/// executive = "cto"
///
/// [[agents]]
/// id = "database-architect"
/// capabilities = ["database", "sql"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub timing: BusConfig,
    pub escalation: EscalationTable,
    pub agents: Vec<AgentProfile>,
}
