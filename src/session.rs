//! Per-connection upload session state.
//!
//! The protocol layer keeps one [`UploadSession`] per polling connection.  It
//! records the last admission outcome as a [`QueueStatus`], enforces the
//! minimum re-poll interval for queued consumers, and delegates queue
//! position lookups to the shared [`UploadSlotScheduler`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::scheduler::{Admission, UploadSlotScheduler};
use crate::slot::SlotUser;

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Where a polling connection stands with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Not yet decided.
    #[default]
    Unknown,
    /// Allowed to transfer without consulting the scheduler.
    Bypass,
    /// Turned away for now.
    Rejected,
    /// Waiting in the queue.
    Queued,
    /// Holds an upload slot.
    Accepted,
    /// Refused by policy.
    Banned,
}

impl From<Admission> for QueueStatus {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Admitted => QueueStatus::Accepted,
            Admission::Queued(_) => QueueStatus::Queued,
            Admission::Rejected => QueueStatus::Rejected,
        }
    }
}

// ---------------------------------------------------------------------------
// UploadSession
// ---------------------------------------------------------------------------

/// Upload state for one connection.  Dropped with the connection.
pub struct UploadSession {
    id: Uuid,
    user: Arc<dyn SlotUser>,
    scheduler: Arc<UploadSlotScheduler>,
    config: SessionConfig,
    queue_status: QueueStatus,
    /// Unix milliseconds of the last queued poll; 0 disables rate limiting.
    last_poll_ms: AtomicI64,
}

impl UploadSession {
    pub fn new(
        user: Arc<dyn SlotUser>,
        scheduler: Arc<UploadSlotScheduler>,
        config: SessionConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, host = user.host(), "upload session opened");
        Self {
            id,
            user,
            scheduler,
            config,
            queue_status: QueueStatus::Unknown,
            last_poll_ms: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &Arc<dyn SlotUser> {
        &self.user
    }

    pub fn host(&self) -> &str {
        self.user.host()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue_status
    }

    pub fn set_queue_status(&mut self, status: QueueStatus) {
        debug!(
            session_id = %self.id,
            host = self.user.host(),
            from = ?self.queue_status,
            to = ?status,
            "queue status changed"
        );
        self.queue_status = status;
    }

    /// Whether the connection may start sending data.
    pub fn can_upload(&self) -> bool {
        matches!(
            self.queue_status,
            QueueStatus::Accepted | QueueStatus::Bypass
        )
    }

    /// Ask the scheduler for a slot, then record the outcome and poll time.
    pub fn admit(&mut self, queue: bool, high_priority: bool) -> Admission {
        let admission = self
            .scheduler
            .poll_for_slot(self.user.clone(), queue, high_priority);
        let status = QueueStatus::from(admission);
        self.set_queue_status(status);
        self.update_poll_time(status);
        admission
    }

    /// 0-based position in the scheduler's queue, if queued.
    pub fn position_in_queue(&self) -> Option<usize> {
        self.scheduler.position_in_queue(self.user.as_ref())
    }

    /// `true` if this poll came too soon after the last queued poll.  The
    /// caller must turn such polls away without consulting the scheduler.
    pub fn poll(&self) -> bool {
        self.poll_at(now_ms())
    }

    pub fn poll_at(&self, now_ms: i64) -> bool {
        let last = self.last_poll_ms.load(Ordering::Acquire);
        now_ms < last.saturating_add(self.min_poll_ms())
    }

    /// Accepted and bypassing connections are not rate limited; queued ones
    /// start a new interval now.  Other statuses keep the previous stamp.
    pub fn update_poll_time(&self, status: QueueStatus) {
        self.update_poll_time_at(status, now_ms());
    }

    pub fn update_poll_time_at(&self, status: QueueStatus, now_ms: i64) {
        match status {
            QueueStatus::Accepted | QueueStatus::Bypass => {
                self.last_poll_ms.store(0, Ordering::Release);
            }
            QueueStatus::Queued => {
                self.last_poll_ms.store(now_ms, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Unix milliseconds of the last queued poll, or 0.
    pub fn last_poll_ms(&self) -> i64 {
        self.last_poll_ms.load(Ordering::Acquire)
    }

    /// Whether a queued consumer has been silent longer than the maximum poll
    /// interval and so has abandoned its place.  The protocol layer should
    /// then close the connection and cancel the request.
    pub fn is_stale_at(&self, now_ms: i64) -> bool {
        let last = self.last_poll_ms.load(Ordering::Acquire);
        self.queue_status == QueueStatus::Queued
            && last != 0
            && now_ms > last.saturating_add(self.max_poll_ms())
    }

    /// Minimum and maximum re-poll intervals to advertise to a queued peer.
    pub fn poll_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.config.min_poll_time_ms),
            Duration::from_millis(self.config.max_poll_time_ms),
        )
    }

    fn min_poll_ms(&self) -> i64 {
        i64::try_from(self.config.min_poll_time_ms).unwrap_or(i64::MAX)
    }

    fn max_poll_ms(&self) -> i64 {
        i64::try_from(self.config.max_poll_time_ms).unwrap_or(i64::MAX)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
