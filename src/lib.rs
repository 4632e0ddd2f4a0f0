//! uploadgate -- upload slot admission control for peer-to-peer file sharing.
//!
//! This crate decides which inbound upload requests get an active transfer
//! slot, in what priority order, when a low-priority transfer is preempted,
//! and how waiting requests are queued and later promoted.  It serves both
//! polling consumers (classic HTTP downloads that re-ask) and callback
//! consumers (swarm uploads notified when a slot frees).

pub mod config;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod slot;

pub use config::UploadGateConfig;
pub use scheduler::{Admission, UploadSlotScheduler};
pub use session::{QueueStatus, UploadSession};
pub use slot::{Priority, RequestKind, SlotError, SlotListener, SlotRequest, SlotUser};

use std::sync::Arc;

use tokio::task::JoinHandle;

/// Build a shared scheduler from `config` and start its bandwidth sampler.
///
/// Must be called from within a Tokio runtime.  Abort the returned handle and
/// call [`UploadSlotScheduler::cleanup`] on shutdown.
pub fn start(config: &UploadGateConfig) -> (Arc<UploadSlotScheduler>, JoinHandle<()>) {
    tracing::info!(
        soft = config.scheduler.soft_max_uploads,
        hard = config.scheduler.hard_max_uploads,
        queue = config.scheduler.upload_queue_size,
        "starting upload slot scheduler"
    );
    let scheduler = Arc::new(UploadSlotScheduler::new(config.scheduler.clone()));
    let sampler = crate::scheduler::spawn_bandwidth_sampler(scheduler.clone(), config.sampler.period());
    (scheduler, sampler)
}
