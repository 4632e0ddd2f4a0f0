//! Periodic bandwidth sampling.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::UploadSlotScheduler;

/// Spawn a task that calls [`UploadSlotScheduler::measure_bandwidth`] every
/// `period`.
///
/// Must be called from within a Tokio runtime.  Abort the returned handle on
/// shutdown.
pub fn spawn_bandwidth_sampler(
    scheduler: Arc<UploadSlotScheduler>,
    period: Duration,
) -> JoinHandle<()> {
    debug!(period_ms = period.as_millis() as u64, "starting bandwidth sampler");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            scheduler.measure_bandwidth();
            trace!(samples = scheduler.sample_count(), "bandwidth sampled");
        }
    })
}
