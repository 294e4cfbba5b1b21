//! The message envelope and its draft form.
//!
//! Callers build a `MessageDraft`, the router validates it into an immutable
//! `AgentMessage`. Only the router mints messages, so every message in a
//! mailbox has passed validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    agent::AgentId,
    error::{CoordError, CoordResult},
    payload::{MessagePayload, MessageType},
};

/// Globally unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
    /// Create a new, unique message ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery priority. Declaration order is significant: `Critical` sorts
/// highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
    Critical,
}

/// Who a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Receiver {
    Unicast(AgentId),
    Multicast(Vec<AgentId>),
    /// Every agent known to the bus, except the sender.
    Broadcast,
}

/// An immutable, validated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub sender_id: AgentId,
    pub receiver: Receiver,
    /// Groups every message belonging to one logical exchange.
    pub conversation_id: String,
    pub priority: Priority,
    pub context_id: String,
    /// The message this one answers, if it is a reply.
    pub in_reply_to: Option<MessageId>,
    pub payload: MessagePayload,
}

impl AgentMessage {
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}

/// An unvalidated message as supplied by a caller.
///
/// `sender_id`, `receiver`, `payload` and `context_id` are required. The id,
/// timestamp and conversation id are generated when absent and priority
/// defaults to `Medium`.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub message_id: Option<MessageId>,
    pub timestamp: Option<DateTime<Utc>>,
    pub sender_id: Option<AgentId>,
    pub receiver: Option<Receiver>,
    pub conversation_id: Option<String>,
    pub priority: Option<Priority>,
    pub context_id: Option<String>,
    pub in_reply_to: Option<MessageId>,
    pub payload: Option<MessagePayload>,
}

impl MessageDraft {
    /// A draft with every required field filled in.
    pub fn new(
        sender: impl Into<AgentId>,
        receiver: Receiver,
        context_id: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        Self {
            sender_id: Some(sender.into()),
            receiver: Some(receiver),
            context_id: Some(context_id.into()),
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.in_reply_to = Some(message_id);
        self
    }

    pub fn with_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Check required fields and mint the final message.
    ///
    /// Fails with `CoordError::Validation` naming the first missing field.
    /// An empty multicast list or a blank receiver id counts as a missing
    /// receiver.
    pub fn validate(self, now: DateTime<Utc>) -> CoordResult<AgentMessage> {
        let sender_id = require(self.sender_id, "sender_id")?;
        if sender_id.0.trim().is_empty() {
            return Err(CoordError::validation("sender_id"));
        }
        let receiver = require(self.receiver, "receiver")?;
        let blank = |id: &AgentId| id.0.trim().is_empty();
        let receiver_ok = match &receiver {
            Receiver::Unicast(id) => !blank(id),
            Receiver::Multicast(ids) => !ids.is_empty() && !ids.iter().any(blank),
            Receiver::Broadcast => true,
        };
        if !receiver_ok {
            return Err(CoordError::validation("receiver"));
        }
        let payload = require(self.payload, "message_type")?;
        let context_id = require(self.context_id, "context_id")?;
        if context_id.trim().is_empty() {
            return Err(CoordError::validation("context_id"));
        }

        Ok(AgentMessage {
            message_id: self.message_id.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or(now),
            sender_id,
            receiver,
            conversation_id: self
                .conversation_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            priority: self.priority.unwrap_or_default(),
            context_id,
            in_reply_to: self.in_reply_to,
            payload,
        })
    }
}

fn require<T>(value: Option<T>, field: &'static str) -> CoordResult<T> {
    value.ok_or_else(|| CoordError::validation(field))
}
