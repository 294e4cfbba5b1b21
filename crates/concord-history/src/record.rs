//! The unit of conversation history.

use serde::{Deserialize, Serialize};

use concord_contracts::message::AgentMessage;

/// One routed message, numbered in the order the bus recorded it.
///
/// Sequence numbers start at 0 and are never reused, even after the record
/// has been purged or evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub sequence: u64,
    pub message: AgentMessage,
}
