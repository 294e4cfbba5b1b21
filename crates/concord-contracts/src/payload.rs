//! Typed message payloads.
//!
//! `MessagePayload` is a tagged union: the variant *is* the message type, so
//! a task assignment can never carry status-update fields and vice versa.
//! Everything an agent wants to pass through untouched goes in the opaque
//! `serde_json::Value` fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    agent::{AgentId, AgentStatus},
    task::TaskStatus,
};

/// Discriminant of a message, derived from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssignment,
    StatusUpdate,
    Query,
    InformationResponse,
    ConflictResolutionRequest,
    GuidanceRequest,
    ErrorReport,
    ResourceRequest,
    ResourceAllocation,
    HealthCheck,
    CoordinationUpdate,
    AgentHandoff,
    SystemAlert,
}

impl MessageType {
    /// Message types whose sender expects an answer.
    ///
    /// Sending one of these starts a response timer on the bus.
    pub fn requires_reply(self) -> bool {
        matches!(
            self,
            MessageType::Query
                | MessageType::ConflictResolutionRequest
                | MessageType::GuidanceRequest
                | MessageType::ResourceRequest
        )
    }
}

/// The body of an `AgentMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "body", rename_all = "snake_case")]
pub enum MessagePayload {
    TaskAssignment(TaskAssignment),
    StatusUpdate(StatusUpdate),
    Query(Inquiry),
    InformationResponse(InformationResponse),
    ConflictResolutionRequest(ConflictDetails),
    GuidanceRequest(Inquiry),
    ErrorReport(ErrorReport),
    ResourceRequest(ResourceRequest),
    ResourceAllocation(ResourceAllocation),
    HealthCheck(HealthReport),
    CoordinationUpdate(CoordinationUpdate),
    AgentHandoff(Handoff),
    SystemAlert(SystemAlert),
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessagePayload::TaskAssignment(_) => MessageType::TaskAssignment,
            MessagePayload::StatusUpdate(_) => MessageType::StatusUpdate,
            MessagePayload::Query(_) => MessageType::Query,
            MessagePayload::InformationResponse(_) => MessageType::InformationResponse,
            MessagePayload::ConflictResolutionRequest(_) => MessageType::ConflictResolutionRequest,
            MessagePayload::GuidanceRequest(_) => MessageType::GuidanceRequest,
            MessagePayload::ErrorReport(_) => MessageType::ErrorReport,
            MessagePayload::ResourceRequest(_) => MessageType::ResourceRequest,
            MessagePayload::ResourceAllocation(_) => MessageType::ResourceAllocation,
            MessagePayload::HealthCheck(_) => MessageType::HealthCheck,
            MessagePayload::CoordinationUpdate(_) => MessageType::CoordinationUpdate,
            MessagePayload::AgentHandoff(_) => MessageType::AgentHandoff,
            MessagePayload::SystemAlert(_) => MessageType::SystemAlert,
        }
    }
}

// ── Task assignment ───────────────────────────────────────────────────────────

/// A unit of work handed to an agent. The bus treats `data` as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Capability names the work calls for.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Task ids that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
    /// Present when the self-healing path moved this task off a failed agent.
    pub redistribution: Option<Redistribution>,
}

impl TaskAssignment {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: String::new(),
            requirements: Vec::new(),
            dependencies: Vec::new(),
            deadline: None,
            data: Value::Null,
            redistribution: None,
        }
    }
}

/// Marks a task assignment as work moved from an unhealthy agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redistribution {
    pub original_agent: AgentId,
    pub reason: String,
}

// ── Status update ─────────────────────────────────────────────────────────────

/// Progress report from the agent that owns `task_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    /// Completion fraction in 0.0..=1.0.
    #[serde(default)]
    pub progress: f64,
    /// Only meaningful when `status` is `Blocked`.
    pub blocker: Option<Blocker>,
    #[serde(default)]
    pub notes: String,
}

impl StatusUpdate {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            progress: 0.0,
            blocker: None,
            notes: String::new(),
        }
    }

    pub fn blocked_by(mut self, blocker: Blocker) -> Self {
        self.status = TaskStatus::Blocked;
        self.blocker = Some(blocker);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    Dependency,
    ResourceUnavailable,
    Technical,
    External,
}

/// What is stopping a blocked task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub blocker_type: BlockerType,
    /// The agent whose work the task is waiting on, if any.
    pub blocking_agent: Option<AgentId>,
    pub description: String,
}

// ── Query / guidance / response ───────────────────────────────────────────────

/// Body of a query or guidance request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inquiry {
    pub question: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationResponse {
    pub content: Value,
}

// ── Conflicts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ResourceContention,
    TechnicalDisagreement,
    PriorityConflict,
    DependencyDeadlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Who should arbitrate a conflict. Defaults to `Peer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationLevel {
    #[default]
    Peer,
    Superior,
    Executive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetails {
    pub conflict_id: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    #[serde(default)]
    pub escalation_level: EscalationLevel,
    pub description: String,
    #[serde(default)]
    pub involved_agents: Vec<AgentId>,
    pub business_impact: Option<String>,
}

// ── Errors and resources ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub task_id: Option<String>,
    pub error: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resource_type: String,
    pub amount: f64,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub resource_type: String,
    pub amount: f64,
    pub granted: bool,
}

// ── Health, coordination, handoff, alerts ─────────────────────────────────────

/// Self-reported liveness from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: AgentStatus,
    pub current_load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationUpdate {
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub affected_agents: Vec<AgentId>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub task_id: String,
    pub to_agent: AgentId,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AgentHealed,
    DeliveryFailure,
    Operational,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub kind: AlertKind,
    pub affected_agent: Option<AgentId>,
    pub description: String,
    pub action_taken: String,
}
