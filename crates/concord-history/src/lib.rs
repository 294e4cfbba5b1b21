//! # concord-history
//!
//! Bounded, in-memory conversation history for the CONCORD coordination bus.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_history::InMemoryHistory;
//!
//! let history = InMemoryHistory::new(config.history_max_records);
//! let bus = CoordinationBus::new(config, clock, policy, directory, Box::new(history.clone()));
//! // ...
//! println!("{}", history.export_conversation("conv-1")?);
//! ```

pub mod memory;
pub mod record;

pub use memory::InMemoryHistory;
pub use record::HistoryRecord;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use concord_contracts::{
        agent::AgentId,
        message::{AgentMessage, MessageDraft, Receiver},
        payload::{MessagePayload, TaskAssignment},
    };
    use concord_core::traits::HistoryStore;

    use crate::InMemoryHistory;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(conversation: &str, at: DateTime<Utc>) -> AgentMessage {
        MessageDraft::new(
            "planner",
            Receiver::Unicast(AgentId::new("builder")),
            "project-x",
            MessagePayload::TaskAssignment(TaskAssignment::new("t1", "build")),
        )
        .conversation(conversation)
        .validate(at)
        .unwrap()
    }

    // ── Recording ─────────────────────────────────────────────────────────────

    #[test]
    fn records_are_sequenced_in_append_order() {
        let history = InMemoryHistory::new(10);
        for i in 0..3 {
            history.record(&message("c", t(i))).unwrap();
        }

        let sequences: Vec<u64> = history.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn conversation_filters_and_keeps_order() {
        let history = InMemoryHistory::new(10);
        let first = message("alpha", t(0));
        let other = message("beta", t(1));
        let second = message("alpha", t(2));
        for m in [&first, &other, &second] {
            history.record(m).unwrap();
        }

        let alpha = history.conversation("alpha").unwrap();
        assert_eq!(alpha.len(), 2);
        assert_eq!(alpha[0].message_id, first.message_id);
        assert_eq!(alpha[1].message_id, second.message_id);
        assert!(history.conversation("gamma").unwrap().is_empty());
    }

    // ── Bounds ────────────────────────────────────────────────────────────────

    #[test]
    fn cap_evicts_oldest_first() {
        let history = InMemoryHistory::new(2);
        for i in 0..5 {
            history.record(&message("c", t(i))).unwrap();
        }

        assert_eq!(history.len(), 2);
        assert_eq!(history.evicted(), 3);
        let sequences: Vec<u64> = history.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
    }

    #[test]
    fn purge_drops_records_older_than_cutoff() {
        let history = InMemoryHistory::new(10);
        history.record(&message("c", t(0))).unwrap();
        history.record(&message("c", t(100))).unwrap();

        assert_eq!(history.purge_before(t(0) + Duration::seconds(50)).unwrap(), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.purge_before(t(0)).unwrap(), 0);
    }

    #[test]
    fn clones_share_records() {
        let history = InMemoryHistory::new(10);
        let handle = history.clone();
        let boxed: Box<dyn HistoryStore> = Box::new(history);
        boxed.record(&message("c", t(0))).unwrap();

        assert_eq!(handle.len(), 1);
        let json = handle.export_conversation("c").unwrap();
        assert!(json.contains("\"sequence\": 0"), "got: {json}");
    }
}
