//! Pending-response tracking for reply-requiring messages.
//!
//! Entries are keyed by the original message id. A reply carrying
//! `in_reply_to` removes its entry; the timeout sweep removes whatever has
//! passed its deadline. Removal is the only cancellation there is, so a
//! resolved entry can never time out later.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use concord_contracts::message::{AgentMessage, MessageId};

#[derive(Debug, Clone)]
pub struct PendingResponse {
    pub message: AgentMessage,
    pub registered_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ResponseTracker {
    pending: HashMap<MessageId, PendingResponse>,
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the response timer for `message`.
    ///
    /// Returns false and keeps the existing timer if one is already running
    /// for this message id.
    pub fn register(&mut self, message: AgentMessage, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.pending.contains_key(&message.message_id) {
            return false;
        }
        self.pending.insert(
            message.message_id,
            PendingResponse {
                message,
                registered_at: now,
                deadline: now + timeout,
            },
        );
        true
    }

    /// A reply to `message_id` arrived. Returns the cancelled entry.
    pub fn resolve(&mut self, message_id: &MessageId) -> Option<PendingResponse> {
        self.pending.remove(message_id)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<PendingResponse> {
        let expired_ids: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut expired: Vec<PendingResponse> = expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        expired.sort_by_key(|p| p.deadline);
        expired
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
