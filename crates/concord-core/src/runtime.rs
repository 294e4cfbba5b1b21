//! Background scheduling for a live bus.
//!
//! One tokio task per `PeriodicJob`, each on its own interval, all stopped
//! by a shared `CancellationToken`. Tests and scripted demos skip this and
//! drive `CoordinationBus::tick()` with a `ManualClock` instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use concord_contracts::error::{CoordError, CoordResult};

use crate::bus::CoordinationBus;
use crate::schedule::PeriodicJob;

pub struct BusRuntime {
    bus: Arc<CoordinationBus>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BusRuntime {
    /// Start the periodic jobs for `bus`. Must be called inside a tokio runtime.
    pub fn spawn(bus: Arc<CoordinationBus>) -> Self {
        let token = CancellationToken::new();
        let handles = PeriodicJob::ALL
            .iter()
            .map(|job| tokio::spawn(job_loop(bus.clone(), *job, token.clone())))
            .collect();
        info!(jobs = PeriodicJob::ALL.len(), "bus runtime started");
        Self { bus, token, handles }
    }

    pub fn bus(&self) -> &Arc<CoordinationBus> {
        &self.bus
    }

    /// A token that stops every job loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the job loops, wait for them, then shut the bus down.
    pub async fn shutdown(self) -> CoordResult<()> {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "periodic job task ended abnormally");
            }
        }
        info!("bus runtime stopped");
        self.bus.shutdown()
    }
}

async fn job_loop(bus: Arc<CoordinationBus>, job: PeriodicJob, token: CancellationToken) {
    let period = job.interval(bus.config()).max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(job = job.name(), period_ms = period.as_millis() as u64, "periodic job started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match bus.run_job(job) {
                    Ok(()) => {}
                    Err(CoordError::ShutDown) => break,
                    Err(e) => error!(job = job.name(), error = %e, "periodic job failed"),
                }
            }
        }
    }
    debug!(job = job.name(), "periodic job stopped");
}
