//! In-memory implementation of `HistoryStore`.
//!
//! `InMemoryHistory` keeps records in a `VecDeque` behind a `Mutex`. Two
//! limits bound it: the bus purges records older than the retention window
//! through `purge_before`, and `max_records` evicts the oldest record as soon
//! as the cap is exceeded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use concord_contracts::{
    error::{CoordError, CoordResult},
    message::AgentMessage,
};
use concord_core::traits::HistoryStore;

use crate::record::HistoryRecord;

// ── Internal mutable state ────────────────────────────────────────────────────

struct HistoryState {
    records: VecDeque<HistoryRecord>,
    /// The next sequence number to assign.
    sequence: u64,
    evicted: u64,
}

// ── Public store ──────────────────────────────────────────────────────────────

/// A bounded, append-only message history.
///
/// Cloning is cheap and every clone observes the same records, so a caller
/// can keep a handle for inspection after boxing one into the bus.
#[derive(Clone)]
pub struct InMemoryHistory {
    max_records: usize,
    state: Arc<Mutex<HistoryState>>,
}

impl InMemoryHistory {
    /// `max_records` of zero is treated as one.
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            state: Arc::new(Mutex::new(HistoryState {
                records: VecDeque::new(),
                sequence: 0,
                evicted: 0,
            })),
        }
    }

    /// Every retained record, oldest first.
    pub fn records(&self) -> Vec<HistoryRecord> {
        let state = self.state.lock().expect("history state lock poisoned");
        state.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("history state lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records dropped so far because the cap was exceeded.
    pub fn evicted(&self) -> u64 {
        self.state.lock().expect("history state lock poisoned").evicted
    }

    /// Retained records of one conversation as a pretty-printed JSON array.
    pub fn export_conversation(&self, conversation_id: &str) -> serde_json::Result<String> {
        let state = self.state.lock().expect("history state lock poisoned");
        let records: Vec<&HistoryRecord> = state
            .records
            .iter()
            .filter(|r| r.message.conversation_id == conversation_id)
            .collect();
        serde_json::to_string_pretty(&records)
    }

    fn lock(&self) -> CoordResult<MutexGuard<'_, HistoryState>> {
        self.state.lock().map_err(|e| CoordError::StatePoisoned {
            reason: format!("history state lock poisoned: {}", e),
        })
    }
}

// ── HistoryStore impl ─────────────────────────────────────────────────────────

impl HistoryStore for InMemoryHistory {
    fn record(&self, message: &AgentMessage) -> CoordResult<()> {
        let mut state = self.lock()?;

        let sequence = state.sequence;
        state.records.push_back(HistoryRecord {
            sequence,
            message: message.clone(),
        });
        state.sequence += 1;

        while state.records.len() > self.max_records {
            if let Some(oldest) = state.records.pop_front() {
                state.evicted += 1;
                if state.evicted == 1 {
                    warn!(max_records = self.max_records, "history cap reached, evicting oldest records");
                }
                debug!(sequence = oldest.sequence, message_id = %oldest.message.message_id, "history record evicted");
            }
        }

        Ok(())
    }

    fn conversation(&self, conversation_id: &str) -> CoordResult<Vec<AgentMessage>> {
        let state = self.lock()?;
        Ok(state
            .records
            .iter()
            .filter(|r| r.message.conversation_id == conversation_id)
            .map(|r| r.message.clone())
            .collect())
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> CoordResult<usize> {
        let mut state = self.lock()?;
        let before = state.records.len();
        state.records.retain(|r| r.message.timestamp >= cutoff);
        let purged = before - state.records.len();
        if purged > 0 {
            debug!(purged, cutoff = %cutoff, remaining = state.records.len(), "history purged");
        }
        Ok(purged)
    }
}
