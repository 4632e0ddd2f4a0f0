//! Upload slot scheduling: admission control, preemption, queueing and
//! bandwidth accounting.
//!
//! Priority order: high > normal > seed.  Preemptible seeding uploads give
//! way to any higher tier that needs a slot.

pub mod bandwidth;
pub mod manager;
pub mod sampler;

// Re-export common types
pub use self::bandwidth::BandwidthWindow;
pub use self::manager::{
    Admission, SchedulerSnapshot, SlotSummary, UploadSlotScheduler, RESUMABLE_QUEUE_CAPACITY,
};
pub use self::sampler::spawn_bandwidth_sampler;
