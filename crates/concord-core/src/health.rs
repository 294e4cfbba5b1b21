//! Heartbeat assessment and replacement-agent selection.
//!
//! These are pure functions over agent state; the bus owns the periodic
//! sweep and the healing procedure that acts on their results.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use concord_contracts::{
    agent::{AgentId, AgentState, AgentStatus},
    capability::CapabilitySet,
    config::BusConfig,
};

use crate::traits::CapabilityDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Classify an agent by how long it has been silent.
///
/// Strictly longer than `heartbeat_timeout` is unhealthy; strictly longer
/// than `degraded_after` is degraded.
pub fn assess(state: &AgentState, now: DateTime<Utc>, config: &BusConfig) -> Liveness {
    let silent_for = now - state.last_heartbeat;
    if silent_for > config.heartbeat_timeout() {
        Liveness::Unhealthy
    } else if silent_for > config.degraded_after() {
        Liveness::Degraded
    } else {
        Liveness::Healthy
    }
}

/// Outcome of one health sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HealthSweep {
    /// Agents found unhealthy and put through self-healing this cycle.
    pub healed: Vec<AgentId>,
    /// Agents newly marked degraded this cycle.
    pub degraded: Vec<AgentId>,
}

/// Pick the agent that should take over work from `failed`.
///
/// A candidate must be a different agent that is not healing or offline, not
/// itself overdue on heartbeats, below `redistribution_load_threshold`, and
/// declare at least one capability in common with `failed_capabilities`.
/// The least loaded candidate wins; ties go to the smallest agent id.
pub fn select_alternative<'a>(
    failed: &AgentId,
    failed_capabilities: &CapabilitySet,
    candidates: impl IntoIterator<Item = &'a AgentState>,
    directory: &dyn CapabilityDirectory,
    healing: &HashSet<AgentId>,
    now: DateTime<Utc>,
    config: &BusConfig,
) -> Option<AgentId> {
    candidates
        .into_iter()
        .filter(|s| &s.agent_id != failed)
        .filter(|s| !healing.contains(&s.agent_id))
        .filter(|s| !matches!(s.status, AgentStatus::Healing | AgentStatus::Offline))
        .filter(|s| assess(s, now, config) != Liveness::Unhealthy)
        .filter(|s| s.current_load < config.redistribution_load_threshold)
        .filter(|s| directory.capabilities_of(&s.agent_id).overlaps(failed_capabilities))
        .min_by(|a, b| {
            a.current_load
                .total_cmp(&b.current_load)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        })
        .map(|s| s.agent_id.clone())
}
