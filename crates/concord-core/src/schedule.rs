//! The bus's periodic jobs and their virtual-time schedule.
//!
//! `Schedule` tracks when each job is next due on the bus clock. The bus
//! consults it in `tick()`; the tokio runtime ignores it and runs each job on
//! its own interval instead.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use concord_contracts::config::BusConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodicJob {
    ResponseTimeouts,
    RetrySweep,
    HealthCheck,
    HistoryCleanup,
}

impl PeriodicJob {
    /// All jobs, in the order `tick()` runs them when several are due.
    pub const ALL: [PeriodicJob; 4] = [
        PeriodicJob::ResponseTimeouts,
        PeriodicJob::RetrySweep,
        PeriodicJob::HealthCheck,
        PeriodicJob::HistoryCleanup,
    ];

    pub fn interval(self, config: &BusConfig) -> StdDuration {
        match self {
            PeriodicJob::ResponseTimeouts => config.timeout_sweep_interval(),
            PeriodicJob::RetrySweep => config.retry_sweep_interval(),
            PeriodicJob::HealthCheck => config.health_check_interval(),
            PeriodicJob::HistoryCleanup => config.history_cleanup_interval(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PeriodicJob::ResponseTimeouts => "response-timeouts",
            PeriodicJob::RetrySweep => "retry-sweep",
            PeriodicJob::HealthCheck => "health-check",
            PeriodicJob::HistoryCleanup => "history-cleanup",
        }
    }
}

#[derive(Debug)]
pub struct Schedule {
    next_due: HashMap<PeriodicJob, DateTime<Utc>>,
}

impl Schedule {
    /// Every job first comes due one interval after `start`.
    pub fn new(start: DateTime<Utc>, config: &BusConfig) -> Self {
        let next_due = PeriodicJob::ALL
            .iter()
            .map(|job| (*job, start + period(*job, config)))
            .collect();
        Self { next_due }
    }

    /// Jobs due at `now`, in `PeriodicJob::ALL` order.
    ///
    /// A job that missed several periods runs once; its next due time moves
    /// to the first period boundary after `now`.
    pub fn due(&mut self, now: DateTime<Utc>, config: &BusConfig) -> Vec<PeriodicJob> {
        let mut due = Vec::new();
        for job in PeriodicJob::ALL {
            let step = period(job, config);
            let Some(next) = self.next_due.get_mut(&job) else {
                continue;
            };
            if *next > now {
                continue;
            }
            due.push(job);
            *next = first_boundary_after(*next, now, step);
        }
        due
    }

    pub fn next_due(&self, job: PeriodicJob) -> Option<DateTime<Utc>> {
        self.next_due.get(&job).copied()
    }
}

fn period(job: PeriodicJob, config: &BusConfig) -> Duration {
    // Zero intervals would never advance; clamp to one millisecond.
    Duration::from_std(job.interval(config))
        .unwrap_or_else(|_| Duration::seconds(1))
        .max(Duration::milliseconds(1))
}

/// The first `next + k * step` (k >= 1) strictly after `now`.
fn first_boundary_after(next: DateTime<Utc>, now: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step_ms = step.num_milliseconds().max(1);
    let missed = (now - next).num_milliseconds() / step_ms + 1;
    next + Duration::milliseconds(missed.saturating_mul(step_ms))
}
