//! Timing and threshold configuration for the bus.
//!
//! Every field has a default, so an empty `[timing]` table (or none at all)
//! yields the standard cadence: health check every 30s, unhealthy after 120s
//! of silence, retry sweep every 10s, five-minute response timeout, 24-hour
//! history window swept every five minutes.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub health_check_interval_secs: u64,
    /// Silence longer than this marks an agent unhealthy.
    pub heartbeat_timeout_secs: u64,
    /// Silence longer than this marks an agent degraded.
    pub degraded_after_secs: u64,
    pub retry_sweep_interval_secs: u64,
    /// Delay before the first retry of a failed delivery.
    pub initial_retry_delay_ms: u64,
    /// Retries after the initial attempt before the message is dropped.
    pub max_retries: u32,
    pub response_timeout_secs: u64,
    pub timeout_sweep_interval_ms: u64,
    pub history_cleanup_interval_secs: u64,
    pub history_retention_secs: u64,
    pub history_max_records: usize,
    /// Agents at or above this load are never picked for redistributed work.
    pub redistribution_load_threshold: f64,
    pub event_channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            heartbeat_timeout_secs: 120,
            degraded_after_secs: 60,
            retry_sweep_interval_secs: 10,
            initial_retry_delay_ms: 5_000,
            max_retries: 3,
            response_timeout_secs: 300,
            timeout_sweep_interval_ms: 1_000,
            history_cleanup_interval_secs: 300,
            history_retention_secs: 24 * 60 * 60,
            history_max_records: 10_000,
            redistribution_load_threshold: 0.8,
            event_channel_capacity: 256,
        }
    }
}

impl BusConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        secs(self.heartbeat_timeout_secs)
    }

    pub fn degraded_after(&self) -> Duration {
        secs(self.degraded_after_secs)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        millis(self.initial_retry_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        secs(self.response_timeout_secs)
    }

    pub fn history_retention(&self) -> Duration {
        secs(self.history_retention_secs)
    }

    /// Backoff after the `retry_count`-th failed retry: `2^retry_count` seconds.
    pub fn retry_backoff(&self, retry_count: u32) -> Duration {
        let factor = 1i64 << retry_count.min(30);
        Duration::milliseconds(factor * 1_000)
    }

    pub fn health_check_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.health_check_interval_secs)
    }

    pub fn retry_sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.retry_sweep_interval_secs)
    }

    pub fn timeout_sweep_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.timeout_sweep_interval_ms)
    }

    pub fn history_cleanup_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.history_cleanup_interval_secs)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}
