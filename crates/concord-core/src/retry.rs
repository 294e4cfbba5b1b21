//! Retry bookkeeping for failed deliveries.
//!
//! A failed delivery waits `initial_retry_delay` (5s) before its first retry.
//! Each further failure bumps `retry_count` and waits `2^retry_count` seconds.
//! When `retry_count` reaches `max_retries` (3) the entry is exhausted: four
//! attempts in total, one initial plus three retries.

use chrono::{DateTime, Utc};

use concord_contracts::{agent::AgentId, config::BusConfig, message::AgentMessage};

/// One pending redelivery of `message` to `agent_id`.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub agent_id: AgentId,
    pub message: AgentMessage,
    /// Retries already attempted, 0 until the first retry fails.
    pub retry_count: u32,
    pub next_retry_time: DateTime<Utc>,
    pub last_error: String,
}

impl RetryEntry {
    /// Delivery attempts made so far, counting the initial one.
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

#[derive(Debug)]
pub enum RetryOutcome {
    Rescheduled {
        retry_count: u32,
        next_retry_time: DateTime<Utc>,
    },
    /// Out of retries. The entry is returned for reporting and dropped.
    Exhausted(RetryEntry),
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: Vec<RetryEntry>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a delivery that just failed its initial attempt.
    pub fn schedule(
        &mut self,
        agent_id: AgentId,
        message: AgentMessage,
        error: String,
        now: DateTime<Utc>,
        config: &BusConfig,
    ) -> DateTime<Utc> {
        let next_retry_time = now + config.initial_retry_delay();
        self.entries.push(RetryEntry {
            agent_id,
            message,
            retry_count: 0,
            next_retry_time,
            last_error: error,
        });
        next_retry_time
    }

    /// Remove and return every entry whose retry time has arrived.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<RetryEntry> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.next_retry_time <= now);
        self.entries = waiting;
        due
    }

    /// Record another failed attempt for `entry`.
    pub fn reschedule(
        &mut self,
        mut entry: RetryEntry,
        error: String,
        now: DateTime<Utc>,
        config: &BusConfig,
    ) -> RetryOutcome {
        entry.retry_count += 1;
        entry.last_error = error;

        if entry.retry_count >= config.max_retries {
            return RetryOutcome::Exhausted(entry);
        }

        entry.next_retry_time = now + config.retry_backoff(entry.retry_count);
        let outcome = RetryOutcome::Rescheduled {
            retry_count: entry.retry_count,
            next_retry_time: entry.next_retry_time,
        };
        self.entries.push(entry);
        outcome
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
