//! Per-agent priority-ordered mailboxes.
//!
//! Each mailbox is a `Vec` kept sorted by priority class, newest-last within
//! a class. Insertion scans for the first message of strictly lower priority
//! and inserts in front of it, which keeps FIFO order inside a class without
//! the reordering a binary heap would introduce.

use std::collections::HashMap;

use concord_contracts::{
    agent::AgentId,
    message::{AgentMessage, MessageId},
};

#[derive(Debug, Default)]
pub struct MailboxStore {
    boxes: HashMap<AgentId, Vec<AgentMessage>>,
}

impl MailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `message` into `agent_id`'s mailbox in priority order.
    ///
    /// Returns the position the message landed at.
    pub fn insert(&mut self, agent_id: &AgentId, message: AgentMessage) -> usize {
        let mailbox = self.boxes.entry(agent_id.clone()).or_default();
        let position = mailbox
            .iter()
            .position(|queued| queued.priority < message.priority)
            .unwrap_or(mailbox.len());
        mailbox.insert(position, message);
        position
    }

    /// Ordered snapshot of an agent's mailbox. Unknown agents have none.
    pub fn messages_for(&self, agent_id: &AgentId) -> Vec<AgentMessage> {
        self.boxes.get(agent_id).cloned().unwrap_or_default()
    }

    /// Remove a message. Returns `None` if it was not in the mailbox.
    pub fn remove(&mut self, agent_id: &AgentId, message_id: &MessageId) -> Option<AgentMessage> {
        let mailbox = self.boxes.get_mut(agent_id)?;
        let idx = mailbox.iter().position(|m| &m.message_id == message_id)?;
        Some(mailbox.remove(idx))
    }

    pub fn len(&self, agent_id: &AgentId) -> usize {
        self.boxes.get(agent_id).map_or(0, Vec::len)
    }

    pub fn contains(&self, agent_id: &AgentId, message_id: &MessageId) -> bool {
        self.boxes
            .get(agent_id)
            .is_some_and(|mb| mb.iter().any(|m| &m.message_id == message_id))
    }
}
