//! Observable events emitted by the bus.
//!
//! Subscribers get every event published after they subscribe. Events are
//! informational: the bus has already acted by the time one is emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    agent::{AgentId, AgentState},
    message::{MessageId, Priority},
    payload::MessageType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    /// A validated message was accepted and routed.
    MessageSent {
        message_id: MessageId,
        message_type: MessageType,
        priority: Priority,
        sender_id: AgentId,
        targets: Vec<AgentId>,
    },

    /// A message landed in an agent's mailbox.
    MessageDelivered {
        message_id: MessageId,
        agent_id: AgentId,
        attempt: u32,
    },

    /// An agent consumed a message from its mailbox.
    MessageProcessed {
        message_id: MessageId,
        agent_id: AgentId,
    },

    AgentStateUpdated { state: AgentState },

    AgentRestarted {
        agent_id: AgentId,
        at: DateTime<Utc>,
    },

    /// A reply-requiring message got no answer in time.
    ResponseTimeout {
        message_id: MessageId,
        message_type: MessageType,
        sender_id: AgentId,
        deadline: DateTime<Utc>,
    },

    /// A failed delivery was queued for another attempt.
    DeliveryRetryScheduled {
        message_id: MessageId,
        agent_id: AgentId,
        retry_count: u32,
        next_retry_time: DateTime<Utc>,
    },

    /// Every delivery attempt failed and the message was dropped.
    DeliveryFailed {
        message_id: MessageId,
        agent_id: AgentId,
        attempts: u32,
        reason: String,
    },

    AgentUnhealthy {
        agent_id: AgentId,
        last_heartbeat: DateTime<Utc>,
    },

    TaskRedistributed {
        task_id: String,
        from_agent: AgentId,
        to_agent: AgentId,
        message_id: MessageId,
    },

    /// No agent qualified to take over a task from an unhealthy agent.
    RedistributionUnresolved {
        task_id: String,
        from_agent: AgentId,
    },
}
