//! Agent identity and liveness state.
//!
//! The bus keeps one `AgentState` per agent id it has ever seen. States are
//! created lazily on first contact and live for the lifetime of the bus.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskRef, TaskStatus};

/// Stable, human-readable identifier for an agent.
///
/// Used as the mailbox key, in routing, in capability profiles, and in the
/// escalation table. Example: AgentId("backend-developer")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Construct an agent id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What the agent is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Busy,
    Idle,
    /// Set by the self-healing path between reset and restart.
    Healing,
    Offline,
}

/// Liveness classification derived from heartbeat freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The bus's view of a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub status: AgentStatus,
    /// Fraction of capacity in use, always within 0.0..=1.0.
    pub current_load: f64,
    pub assigned_tasks: Vec<TaskRef>,
    /// Last observed activity from this agent. Never moves backwards.
    pub last_heartbeat: DateTime<Utc>,
    pub health_status: HealthStatus,
}

impl AgentState {
    /// A fresh, active, healthy agent whose heartbeat starts at `now`.
    pub fn new(agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Active,
            current_load: 0.0,
            assigned_tasks: Vec::new(),
            last_heartbeat: now,
            health_status: HealthStatus::Healthy,
        }
    }

    /// Record activity at `at`.
    ///
    /// Observations older than the stored heartbeat are ignored, so the value
    /// is monotonic even when callers race with stale timestamps.
    pub fn refresh_heartbeat(&mut self, at: DateTime<Utc>) {
        if at > self.last_heartbeat {
            self.last_heartbeat = at;
        }
    }

    /// Set the load, clamped into 0.0..=1.0. NaN is treated as 0.
    pub fn set_load(&mut self, load: f64) {
        self.current_load = if load.is_nan() { 0.0 } else { load.clamp(0.0, 1.0) };
    }

    /// Tasks that still need an owner (everything not completed).
    pub fn incomplete_tasks(&self) -> impl Iterator<Item = &TaskRef> {
        self.assigned_tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
    }

    /// Find an assigned task by id.
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskRef> {
        self.assigned_tasks.iter_mut().find(|t| t.task_id == task_id)
    }
}

/// A partial state report from (or on behalf of) an agent.
///
/// Every `None` field is left untouched. Applying an update always counts as
/// a heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStateUpdate {
    pub status: Option<AgentStatus>,
    pub current_load: Option<f64>,
    pub health_status: Option<HealthStatus>,
}

impl AgentStateUpdate {
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.current_load = Some(load);
        self
    }

    /// Apply this update to `state`.
    pub fn apply_to(&self, state: &mut AgentState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(load) = self.current_load {
            state.set_load(load);
        }
        if let Some(health) = self.health_status {
            state.health_status = health;
        }
    }
}
