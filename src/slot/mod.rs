//! Capability contracts for anything that can hold an upload slot.
//!
//! A connection object implements [`SlotUser`] to be admitted by polling, and
//! additionally [`SlotListener`] when it wants to be told asynchronously that a
//! slot has become available.  The scheduler never inspects concrete types;
//! the entry point used (`poll_for_slot` vs `request_slot`) decides the kind.

pub mod request;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::request::SlotRequest;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by slot users and the scheduler's bandwidth accounting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// Not enough samples have been collected to report a rate yet.
    #[error("insufficient data to measure bandwidth")]
    InsufficientData,

    /// The user cannot be forcibly stopped.
    #[error("slot user at {host} does not support forced release")]
    UnsupportedRelease { host: String },
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Priority tier of a slot request.  Higher tiers are never blocked by lower
/// ones and may preempt them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Swarm-style seeding upload.
    Seed = 0,
    /// Classic downloader-initiated transfer.
    Normal = 1,
    /// Privileged transfer such as a metadata fetch.
    High = 2,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Seed => "seed",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

/// Which entry point created a request, and therefore which queue it waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Polling consumer (`poll_for_slot`).  Waits in the bounded HTTP queue.
    Http,
    /// Callback consumer (`request_slot`).  Waits in the resumable queue.
    Bt,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Anything that can occupy an upload slot.
///
/// All methods take `&self` and are invoked while the scheduler lock is held,
/// so implementations must not block and must not call back into the
/// scheduler.
pub trait SlotUser: Send + Sync {
    /// Remote host this user is uploading to.
    fn host(&self) -> &str;

    /// Take a new bandwidth sample.
    fn measure_bandwidth(&self);

    /// Most recent measured rate in KB/s.
    fn measured_bandwidth(&self) -> Result<f32, SlotError>;

    /// Lifetime average rate in KB/s.
    fn average_bandwidth(&self) -> f32;

    /// Forcibly stop the transfer so its slot can be reused.
    ///
    /// Users that cannot be stopped keep this default; the request shapes
    /// guarantee they are never marked preemptible.
    fn release_slot(&self) -> Result<(), SlotError> {
        Err(SlotError::UnsupportedRelease {
            host: self.host().to_string(),
        })
    }
}

/// A [`SlotUser`] that waits for an asynchronous "slot available" callback
/// instead of re-polling.
pub trait SlotListener: SlotUser {
    /// Called exactly once when a queued request is promoted into a slot.
    fn slot_available(&self);
}

/// Whether the shared handle `a` refers to the same object as `b`.
pub(crate) fn same_user(a: &Arc<dyn SlotUser>, b: &dyn SlotUser) -> bool {
    Arc::as_ptr(a) as *const () == (b as *const _) as *const ()
}
