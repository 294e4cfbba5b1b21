//! Seams between the bus and its environment.
//!
//! - `Clock`               : source of "now"; swapped for `ManualClock` in tests
//! - `Transport`           : decides whether an agent is reachable right now
//! - `AgentSupervisor`     : restarts an agent after self-healing
//! - `EscalationPolicy`    : maps escalation levels to resolver roles
//! - `CapabilityDirectory` : declared capability profiles per agent
//! - `HistoryStore`        : bounded conversation history
//!
//! The bus calls every trait method while holding its state lock, so
//! implementations must be quick and must not call back into the bus.

use chrono::{DateTime, Utc};

use concord_contracts::{
    agent::AgentId,
    capability::CapabilitySet,
    error::CoordResult,
    message::AgentMessage,
    payload::EscalationLevel,
};

/// Source of the current time for every deadline the bus computes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Last-mile delivery to an agent.
///
/// The bus calls `deliver()` before writing a message into the target's
/// mailbox. An `Err` means the agent is unreachable: the message is not
/// queued and the retry manager takes over.
pub trait Transport: Send + Sync {
    fn deliver(&self, agent_id: &AgentId, message: &AgentMessage) -> CoordResult<()>;
}

/// Restarts an agent that the health monitor reset.
///
/// On `Ok` the bus marks the agent active and healthy with a fresh heartbeat.
/// On `Err` the agent stays in `Healing` until it shows activity again.
///
/// `restart` runs inside the health sweep with the bus state locked, so every
/// `send_message` waits on it. It must only request the restart (signal a
/// process manager, queue a job) and return; it must not wait for the agent
/// to come back up.
pub trait AgentSupervisor: Send + Sync {
    fn restart(&self, agent_id: &AgentId) -> CoordResult<()>;
}

/// The conflict resolver table.
///
/// Must be deterministic: the same level always yields the same resolver.
pub trait EscalationPolicy: Send + Sync {
    /// The agent that arbitrates conflicts escalated to `level`.
    fn resolver_for(&self, level: EscalationLevel) -> AgentId;

    /// Executive-role agents notified about resource contention.
    fn executive_roles(&self) -> Vec<AgentId>;
}

/// Declared capability profiles.
pub trait CapabilityDirectory: Send + Sync {
    /// Capabilities declared for `agent_id`; empty when none are declared.
    fn capabilities_of(&self, agent_id: &AgentId) -> CapabilitySet;

    /// Agents the bus should know about from startup.
    fn agents(&self) -> Vec<AgentId>;
}

/// The bounded, in-memory conversation history.
pub trait HistoryStore: Send + Sync {
    /// Append one routed message.
    fn record(&self, message: &AgentMessage) -> CoordResult<()>;

    /// All retained messages sharing `conversation_id`, oldest first.
    fn conversation(&self, conversation_id: &str) -> CoordResult<Vec<AgentMessage>>;

    /// Drop every record whose message timestamp is older than `cutoff`.
    /// Returns how many records were removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> CoordResult<usize>;
}
