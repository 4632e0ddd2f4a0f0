//! Upload slot admission control.
//!
//! [`UploadSlotScheduler`] decides which slot requests hold an active upload
//! slot, which wait in a queue, and which are turned away.  All state lives
//! behind one mutex so that admission, preemption and promotion are
//! linearizable.  Callbacks into slot users run while that lock is held.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::bandwidth::BandwidthWindow;
use crate::config::SchedulerConfig;
use crate::slot::{Priority, RequestKind, SlotError, SlotListener, SlotRequest, SlotUser};

/// Capacity of the resumable queue.  Promotion is gated by admission checks,
/// not by queue length.
pub const RESUMABLE_QUEUE_CAPACITY: usize = usize::MAX;

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "position")]
pub enum Admission {
    /// The request holds an active slot now.
    Admitted,
    /// The request waits at this 1-based queue position.
    Queued(usize),
    /// The request could not be admitted or queued.
    Rejected,
}

impl Admission {
    /// Integer form used on the wire: position (>= 1), 0 admitted, -1 rejected.
    pub fn code(self) -> i32 {
        match self {
            Admission::Admitted => 0,
            Admission::Queued(position) => i32::try_from(position).unwrap_or(i32::MAX),
            Admission::Rejected => -1,
        }
    }

    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Summary of one request, for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSummary {
    pub host: String,
    pub kind: RequestKind,
    pub priority: Priority,
    pub preemptible: bool,
}

impl From<&SlotRequest> for SlotSummary {
    fn from(request: &SlotRequest) -> Self {
        Self {
            host: request.host().to_string(),
            kind: request.kind(),
            priority: request.priority(),
            preemptible: request.is_preemptible(),
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSnapshot {
    pub active: Vec<SlotSummary>,
    pub queued: Vec<SlotSummary>,
    pub queued_resumable: Vec<SlotSummary>,
    pub measured_bandwidth: Option<f32>,
    pub average_bandwidth: Option<f32>,
    pub samples: u64,
}

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

struct SchedulerInner {
    config: SchedulerConfig,
    /// Descending priority, arrival order among equals.
    active: Vec<SlotRequest>,
    /// Polling consumers, FIFO, bounded by `upload_queue_size`.
    queued: VecDeque<SlotRequest>,
    /// Callback consumers, FIFO.
    queued_resumable: VecDeque<SlotRequest>,
    bandwidth: BandwidthWindow,
}

impl SchedulerInner {
    fn queue(&self, kind: RequestKind) -> &VecDeque<SlotRequest> {
        match kind {
            RequestKind::Http => &self.queued,
            RequestKind::Bt => &self.queued_resumable,
        }
    }

    fn queue_mut(&mut self, kind: RequestKind) -> &mut VecDeque<SlotRequest> {
        match kind {
            RequestKind::Http => &mut self.queued,
            RequestKind::Bt => &mut self.queued_resumable,
        }
    }

    fn queue_capacity(&self, kind: RequestKind) -> usize {
        match kind {
            RequestKind::Http => self.config.upload_queue_size,
            RequestKind::Bt => RESUMABLE_QUEUE_CAPACITY,
        }
    }

    fn queue_position(&self, kind: RequestKind, user: &dyn SlotUser) -> Option<usize> {
        self.queue(kind).iter().position(|r| r.is_for(user))
    }

    fn is_active(&self, user: &dyn SlotUser) -> bool {
        self.active.iter().any(|r| r.is_for(user))
    }

    /// Some active request outranks `priority`.
    fn higher_active(&self, priority: Priority) -> bool {
        self.active.iter().any(|r| r.priority() > priority)
    }

    /// Active requests that a request at `priority` may preempt.
    fn freeable(&self, priority: Priority) -> usize {
        self.active
            .iter()
            .filter(|r| r.priority() < priority && r.is_preemptible())
            .count()
    }

    fn has_free_slot(&self, current: usize) -> bool {
        if current < self.config.soft_max_uploads {
            return true;
        }
        if current >= self.config.hard_max_uploads {
            return false;
        }
        // Between soft and hard: allow more only while an upload is above the
        // floor.  Unmeasurable users count as 0.
        let floor = self.config.minimum_upload_speed;
        self.active
            .iter()
            .any(|r| r.user().measured_bandwidth().unwrap_or(0.0) > floor)
    }

    /// Insert before the first entry of strictly lower priority.
    fn insert_active(&mut self, request: SlotRequest) -> usize {
        let idx = self
            .active
            .iter()
            .position(|r| r.priority() < request.priority())
            .unwrap_or(self.active.len());
        self.active.insert(idx, request);
        idx
    }

    fn admit(&mut self, request: SlotRequest) -> Admission {
        let kind = request.kind();
        let priority = request.priority();

        if self.is_active(request.user().as_ref()) {
            debug!(host = request.host(), "slot already held, nothing to do");
            return Admission::Admitted;
        }

        let higher_active = self.higher_active(priority);
        let pos = self.queue_position(kind, request.user().as_ref());
        let freeable = self.freeable(priority);
        let projected = (self.active.len() + pos.unwrap_or(0)).saturating_sub(freeable);

        if higher_active || !self.has_free_slot(projected) {
            if !request.is_queuable() {
                debug!(
                    host = request.host(),
                    %priority,
                    active = self.active.len(),
                    higher_active,
                    "slot request rejected"
                );
                return Admission::Rejected;
            }
            if let Some(pos) = pos {
                return Admission::Queued(pos + 1);
            }

            let capacity = self.queue_capacity(kind);
            if self.queue(kind).len() >= capacity {
                debug!(host = request.host(), capacity, "queue full, slot request rejected");
                return Admission::Rejected;
            }
            self.drop_other_queue_entry(&request);
            debug!(
                host = request.host(),
                queue = ?kind,
                position = self.queue(kind).len() + 1,
                "slot request queued"
            );
            let queue = self.queue_mut(kind);
            queue.push_back(request);
            return Admission::Queued(queue.len());
        }

        if freeable > 0 {
            self.preempt_below(priority);
        }
        if let Some(pos) = pos {
            self.queue_mut(kind).remove(pos);
        }
        self.drop_other_queue_entry(&request);

        debug!(
            host = request.host(),
            %priority,
            active = self.active.len() + 1,
            "slot granted"
        );
        self.insert_active(request);
        Admission::Admitted
    }

    /// A user waits in at most one queue; drop its entry in the queue of the
    /// other kind once `request` is queued or granted.
    fn drop_other_queue_entry(&mut self, request: &SlotRequest) {
        let other = match request.kind() {
            RequestKind::Http => RequestKind::Bt,
            RequestKind::Bt => RequestKind::Http,
        };
        if let Some(stale) = self.queue_position(other, request.user().as_ref()) {
            self.queue_mut(other).remove(stale);
            debug!(host = request.host(), queue = ?other, "dropped stale queue entry");
        }
    }

    /// Evict every preemptible active request below `priority`.
    fn preempt_below(&mut self, priority: Priority) {
        let evictable = |r: &SlotRequest| r.priority() < priority && r.is_preemptible();

        for request in self.active.iter().filter(|r| evictable(*r)) {
            info!(
                host = request.host(),
                victim_priority = %request.priority(),
                %priority,
                "preempting active upload"
            );
            // Request shapes only mark releasable users preemptible.
            if let Err(e) = request.user().release_slot() {
                panic!("preemptible slot user refused release: {e}");
            }
        }
        self.active.retain(|r| !evictable(r));
    }

    /// Move resumable requests into free slots, notifying each once.
    fn promote(&mut self) {
        while !self.higher_active(Priority::Seed) && self.has_free_slot(self.active.len()) {
            let Some(next) = self.queued_resumable.pop_front() else {
                break;
            };
            info!(
                host = next.host(),
                remaining = self.queued_resumable.len(),
                "promoting queued upload"
            );
            let idx = self.insert_active(next);
            self.active[idx].notify_available();
        }
    }

    fn finish(&mut self, user: &dyn SlotUser) {
        match self.active.iter().position(|r| r.is_for(user)) {
            Some(idx) => {
                let request = self.active.remove(idx);
                debug!(
                    host = request.host(),
                    active = self.active.len(),
                    "slot released"
                );
            }
            None => warn!(host = user.host(), "done called for a user without an active slot"),
        }
        self.promote();
    }

    fn summaries<'a>(requests: impl Iterator<Item = &'a SlotRequest>) -> Vec<SlotSummary> {
        requests.map(SlotSummary::from).collect()
    }
}

// ---------------------------------------------------------------------------
// UploadSlotScheduler
// ---------------------------------------------------------------------------

/// Admission controller for upload slots.
///
/// Thread-safe; share it behind an `Arc`.  Every operation returns
/// synchronously.
pub struct UploadSlotScheduler {
    inner: Mutex<SchedulerInner>,
}

impl UploadSlotScheduler {
    /// Create a scheduler with the given limits.
    pub fn new(config: SchedulerConfig) -> Self {
        let bandwidth = BandwidthWindow::new(config.bandwidth_window);
        Self {
            inner: Mutex::new(SchedulerInner {
                config,
                active: Vec::new(),
                queued: VecDeque::new(),
                queued_resumable: VecDeque::new(),
                bandwidth,
            }),
        }
    }

    /// Entry point for polling consumers.
    ///
    /// Re-polling while queued returns the current position without creating
    /// a second entry.
    pub fn poll_for_slot(
        &self,
        user: Arc<dyn SlotUser>,
        queue: bool,
        high_priority: bool,
    ) -> Admission {
        self.inner
            .lock()
            .admit(SlotRequest::http(user, queue, high_priority))
    }

    /// Entry point for callback consumers.
    ///
    /// A queued listener is later promoted by [`request_done`](Self::request_done)
    /// or [`cancel_request`](Self::cancel_request) and told via
    /// [`SlotListener::slot_available`].
    pub fn request_slot<L>(&self, listener: Arc<L>, high_priority: bool) -> Admission
    where
        L: SlotListener + 'static,
    {
        self.inner
            .lock()
            .admit(SlotRequest::bt(listener, high_priority))
    }

    /// 0-based index of `user` in whichever queue holds it.  A polling
    /// consumer at index `i` is told position `i + 1`.
    pub fn position_in_queue(&self, user: &dyn SlotUser) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .queue_position(RequestKind::Http, user)
            .or_else(|| inner.queue_position(RequestKind::Bt, user))
    }

    /// Whether a normal polling request could start now without jumping the
    /// queue, given `current` active uploads.
    pub fn has_http_slot(&self, current: usize) -> bool {
        let inner = self.inner.lock();
        !inner.higher_active(Priority::Normal) && inner.has_free_slot(current + inner.queued.len())
    }

    /// Whether a metadata request could start now.  Nothing outranks it and it
    /// ignores the queue.
    pub fn has_http_slot_for_meta(&self, current: usize) -> bool {
        self.inner.lock().has_free_slot(current)
    }

    /// Withdraw `user`.  A queued request is simply dropped; an active one is
    /// finished as by [`request_done`](Self::request_done).
    pub fn cancel_request(&self, user: &dyn SlotUser) {
        let mut inner = self.inner.lock();
        for kind in [RequestKind::Http, RequestKind::Bt] {
            if let Some(pos) = inner.queue_position(kind, user) {
                inner.queue_mut(kind).remove(pos);
                debug!(host = user.host(), queue = ?kind, "queued request cancelled");
                return;
            }
        }
        inner.finish(user);
    }

    /// Release `user`'s active slot and promote waiting callback consumers
    /// into any capacity that frees up.  Polling consumers are never promoted;
    /// they observe the change on their next poll.
    pub fn request_done(&self, user: &dyn SlotUser) {
        self.inner.lock().finish(user);
    }

    /// Sample every active user's rate and record the aggregate.
    pub fn measure_bandwidth(&self) {
        let mut inner = self.inner.lock();
        let mut total = 0.0_f32;
        for request in &inner.active {
            let user = request.user();
            user.measure_bandwidth();
            total += user.measured_bandwidth().unwrap_or(0.0);
        }
        inner.bandwidth.record(total);
    }

    /// Smoothed aggregate rate in KB/s.  Unavailable until the window fills.
    pub fn measured_bandwidth(&self) -> Result<f32, SlotError> {
        self.inner.lock().bandwidth.measured()
    }

    /// Lifetime average aggregate rate in KB/s.
    pub fn average_bandwidth(&self) -> Result<f32, SlotError> {
        self.inner.lock().bandwidth.average()
    }

    pub fn sample_count(&self) -> u64 {
        self.inner.lock().bandwidth.sample_count()
    }

    pub fn num_active(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn num_queued(&self) -> usize {
        self.inner.lock().queued.len()
    }

    pub fn num_queued_resumable(&self) -> usize {
        self.inner.lock().queued_resumable.len()
    }

    /// Requests from `host` across the active set and both queues.
    pub fn num_users_for_host(&self, host: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .active
            .iter()
            .chain(inner.queued.iter())
            .chain(inner.queued_resumable.iter())
            .filter(|r| r.host() == host)
            .count()
    }

    /// Drop every active and queued request.  Users are not notified.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        info!(
            active = inner.active.len(),
            queued = inner.queued.len(),
            queued_resumable = inner.queued_resumable.len(),
            "clearing upload slots"
        );
        inner.active.clear();
        inner.queued.clear();
        inner.queued_resumable.clear();
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.lock().config.clone()
    }

    /// Swap in new limits.  Existing slots are kept even if they now exceed
    /// the caps; the caps apply from the next admission.
    pub fn update_config(&self, config: SchedulerConfig) {
        let mut inner = self.inner.lock();
        inner.bandwidth.resize(config.bandwidth_window);
        debug!(
            soft = config.soft_max_uploads,
            hard = config.hard_max_uploads,
            queue = config.upload_queue_size,
            "scheduler limits updated"
        );
        inner.config = config;
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let inner = self.inner.lock();
        SchedulerSnapshot {
            active: SchedulerInner::summaries(inner.active.iter()),
            queued: SchedulerInner::summaries(inner.queued.iter()),
            queued_resumable: SchedulerInner::summaries(inner.queued_resumable.iter()),
            measured_bandwidth: inner.bandwidth.measured().ok(),
            average_bandwidth: inner.bandwidth.average().ok(),
            samples: inner.bandwidth.sample_count(),
        }
    }
}

impl Default for UploadSlotScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedUser;

    fn limits(soft: usize, hard: usize, queue: usize) -> SchedulerConfig {
        SchedulerConfig {
            soft_max_uploads: soft,
            hard_max_uploads: hard,
            upload_queue_size: queue,
            minimum_upload_speed: 3.0,
            bandwidth_window: 10,
        }
    }

    fn user(name: &str) -> Arc<SimulatedUser> {
        Arc::new(SimulatedUser::new(name, format!("{name}.example"), 0.0))
    }

    #[test]
    fn test_admission_code() {
        assert_eq!(Admission::Admitted.code(), 0);
        assert_eq!(Admission::Queued(3).code(), 3);
        assert_eq!(Admission::Rejected.code(), -1);
    }

    #[test]
    fn test_poll_admits_until_hard_limit() {
        let sched = UploadSlotScheduler::new(limits(2, 2, 5));
        assert_eq!(sched.poll_for_slot(user("a"), true, false), Admission::Admitted);
        assert_eq!(sched.poll_for_slot(user("b"), true, false), Admission::Admitted);
        assert_eq!(sched.poll_for_slot(user("c"), true, false), Admission::Queued(1));
        assert_eq!(sched.poll_for_slot(user("d"), false, false), Admission::Rejected);
        assert_eq!(sched.num_active(), 2);
        assert_eq!(sched.num_queued(), 1);
    }

    #[test]
    fn test_repoll_of_active_user_is_noop() {
        let sched = UploadSlotScheduler::new(limits(2, 2, 5));
        let a = user("a");
        assert!(sched.poll_for_slot(a.clone(), true, false).is_admitted());
        assert!(sched.poll_for_slot(a.clone(), true, false).is_admitted());
        assert_eq!(sched.num_active(), 1);
    }

    #[test]
    fn test_queued_user_admitted_when_slot_frees() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        let a = user("a");
        let b = user("b");
        assert!(sched.poll_for_slot(a.clone(), true, false).is_admitted());
        assert_eq!(sched.poll_for_slot(b.clone(), true, false), Admission::Queued(1));

        sched.request_done(a.as_ref());
        // Polling consumers are not promoted proactively.
        assert_eq!(sched.num_queued(), 1);
        assert_eq!(sched.num_active(), 0);

        assert!(sched.poll_for_slot(b.clone(), true, false).is_admitted());
        assert_eq!(sched.num_queued(), 0);
        assert_eq!(sched.position_in_queue(b.as_ref()), None);
    }

    #[test]
    fn test_queued_users_behind_head_wait_their_turn() {
        let sched = UploadSlotScheduler::new(limits(2, 2, 5));
        let a = user("a");
        let b = user("b");
        let c = user("c");
        let d = user("d");
        sched.poll_for_slot(a.clone(), true, false);
        sched.poll_for_slot(b.clone(), true, false);
        assert_eq!(sched.poll_for_slot(c.clone(), true, false), Admission::Queued(1));
        assert_eq!(sched.poll_for_slot(d.clone(), true, false), Admission::Queued(2));

        sched.request_done(a.as_ref());
        // One slot free: d is second in line and the projection counts c.
        assert_eq!(sched.poll_for_slot(d.clone(), true, false), Admission::Queued(2));
        assert!(sched.poll_for_slot(c.clone(), true, false).is_admitted());
        assert_eq!(sched.position_in_queue(d.as_ref()), Some(0));
    }

    #[test]
    fn test_active_ordered_by_priority() {
        let sched = UploadSlotScheduler::new(limits(10, 10, 5));
        sched.poll_for_slot(user("normal"), true, false);
        sched.poll_for_slot(user("normal2"), true, false);
        sched.request_slot(user("high"), true);

        let priorities: Vec<_> = sched.snapshot().active.iter().map(|s| s.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Normal, Priority::Normal]
        );
        let hosts: Vec<_> = sched.snapshot().active.into_iter().map(|s| s.host).collect();
        assert_eq!(hosts, vec!["high.example", "normal.example", "normal2.example"]);
    }

    #[test]
    fn test_normal_queued_while_high_active() {
        let sched = UploadSlotScheduler::new(limits(10, 10, 5));
        let high = user("high");
        sched.request_slot(high.clone(), true);

        let late = user("late");
        assert_eq!(sched.poll_for_slot(late.clone(), true, false), Admission::Queued(1));
        assert_eq!(sched.num_active(), 1);

        sched.request_done(high.as_ref());
        assert!(sched.poll_for_slot(late.clone(), true, false).is_admitted());
    }

    #[test]
    fn test_seed_blocked_by_higher_active() {
        let sched = UploadSlotScheduler::new(limits(5, 5, 5));
        sched.poll_for_slot(user("normal"), true, false);
        let seed = user("seed");
        assert_eq!(sched.request_slot(seed.clone(), false), Admission::Queued(1));
        assert_eq!(sched.num_queued_resumable(), 1);
    }

    #[test]
    fn test_bt_high_priority_is_never_queued() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        sched.poll_for_slot(user("a"), true, true);
        assert_eq!(sched.request_slot(user("meta"), true), Admission::Rejected);
        assert_eq!(sched.num_queued_resumable(), 0);
    }

    #[test]
    fn test_normal_preempts_all_seeds() {
        let sched = UploadSlotScheduler::new(limits(2, 2, 5));
        let s1 = user("s1");
        let s2 = user("s2");
        sched.request_slot(s1.clone(), false);
        sched.request_slot(s2.clone(), false);

        assert!(sched.poll_for_slot(user("http"), true, false).is_admitted());
        assert_eq!(s1.releases(), 1);
        assert_eq!(s2.releases(), 1);
        assert_eq!(sched.num_active(), 1);
    }

    #[test]
    #[should_panic(expected = "refused release")]
    fn test_release_refusal_is_fatal() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        let stubborn = Arc::new(SimulatedUser::new("s", "s.example", 0.0).unreleasable());
        sched.request_slot(stubborn, false);
        sched.poll_for_slot(user("http"), true, false);
    }

    #[test]
    fn test_cancel_queued_does_not_promote() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        let a = user("a");
        let b = user("b");
        let c = user("c");
        sched.request_slot(a.clone(), false);
        sched.request_slot(b.clone(), false);
        sched.request_slot(c.clone(), false);

        sched.cancel_request(b.as_ref());
        assert_eq!(sched.num_queued_resumable(), 1);
        assert_eq!(sched.num_active(), 1);
        assert_eq!(c.notifications(), 0);

        sched.cancel_request(a.as_ref());
        assert_eq!(sched.num_active(), 1);
        assert_eq!(c.notifications(), 1);
        assert_eq!(sched.position_in_queue(c.as_ref()), None);
    }

    #[test]
    fn test_promotion_waits_for_higher_active_to_finish() {
        let sched = UploadSlotScheduler::new(limits(3, 3, 5));
        let http = user("http");
        let other = user("other");
        let seed = user("seed");
        sched.poll_for_slot(http.clone(), true, false);
        sched.poll_for_slot(other.clone(), true, false);
        assert_eq!(sched.request_slot(seed.clone(), false), Admission::Queued(1));

        sched.request_done(http.as_ref());
        assert_eq!(seed.notifications(), 0);
        sched.request_done(other.as_ref());
        assert_eq!(seed.notifications(), 1);
        assert_eq!(sched.num_active(), 1);
    }

    #[test]
    fn test_switching_kind_keeps_single_entry() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        sched.poll_for_slot(user("busy"), true, false);
        let u = user("u");
        assert_eq!(sched.request_slot(u.clone(), false), Admission::Queued(1));
        assert_eq!(sched.poll_for_slot(u.clone(), true, false), Admission::Queued(1));
        assert_eq!(sched.num_queued_resumable(), 0);
        assert_eq!(sched.num_queued(), 1);
    }

    #[test]
    fn test_rejected_kind_switch_keeps_queue_place() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        sched.poll_for_slot(user("busy"), true, false);
        let u = user("u");
        assert_eq!(sched.poll_for_slot(u.clone(), true, false), Admission::Queued(1));

        assert_eq!(sched.request_slot(u.clone(), true), Admission::Rejected);
        assert_eq!(sched.position_in_queue(u.as_ref()), Some(0));
        assert_eq!(sched.num_queued(), 1);
    }

    #[test]
    fn test_granted_kind_switch_drops_old_queue_entry() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        let busy = user("busy");
        sched.poll_for_slot(busy.clone(), true, false);
        let u = user("u");
        assert_eq!(sched.poll_for_slot(u.clone(), true, false), Admission::Queued(1));

        sched.request_done(busy.as_ref());
        assert!(sched.request_slot(u.clone(), true).is_admitted());
        assert_eq!(sched.num_queued(), 0);
        assert_eq!(sched.position_in_queue(u.as_ref()), None);
    }

    #[test]
    fn test_preemption_keeps_unpreemptible_entries() {
        let sched = UploadSlotScheduler::new(limits(3, 3, 5));
        let normal = user("normal");
        assert!(sched.poll_for_slot(normal.clone(), true, false).is_admitted());

        assert!(sched.request_slot(user("meta"), true).is_admitted());
        assert_eq!(normal.releases(), 0);
        let hosts: Vec<_> = sched.snapshot().active.into_iter().map(|s| s.host).collect();
        assert_eq!(hosts, vec!["meta.example", "normal.example"]);
    }

    #[test]
    fn test_soft_limit_uses_measured_bandwidth() {
        let sched = UploadSlotScheduler::new(limits(1, 2, 5));
        let fast = Arc::new(SimulatedUser::new("fast", "fast.example", 50.0));
        sched.poll_for_slot(fast.clone(), true, false);
        // No sample taken yet, so the rate is unknown and counts as 0.
        assert_eq!(sched.poll_for_slot(user("b"), true, false), Admission::Queued(1));

        fast.measure_bandwidth();
        assert!(sched.poll_for_slot(user("c"), true, false).is_admitted());
    }

    #[test]
    fn test_http_slot_prechecks() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        assert!(sched.has_http_slot(0));
        assert!(sched.has_http_slot_for_meta(0));

        sched.poll_for_slot(user("a"), true, false);
        sched.poll_for_slot(user("b"), true, false);
        // One queued request ahead: a newcomer would not start even with a
        // free slot.
        assert!(!sched.has_http_slot(0));
        assert!(sched.has_http_slot_for_meta(0));
        assert!(!sched.has_http_slot_for_meta(1));

        sched.cleanup();
        sched.poll_for_slot(user("meta"), false, true);
        assert!(!sched.has_http_slot(0));
    }

    #[test]
    fn test_users_for_host_counts_everything() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        let h = "shared.example";
        sched.poll_for_slot(Arc::new(SimulatedUser::new("a", h, 0.0)), true, false);
        sched.poll_for_slot(Arc::new(SimulatedUser::new("b", h, 0.0)), true, false);
        sched.request_slot(Arc::new(SimulatedUser::new("c", h, 0.0)), false);
        sched.poll_for_slot(user("d"), true, false);
        assert_eq!(sched.num_users_for_host(h), 3);
        assert_eq!(sched.num_users_for_host("nobody"), 0);
    }

    #[test]
    fn test_cleanup_empties_everything() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        sched.poll_for_slot(user("a"), true, false);
        sched.poll_for_slot(user("b"), true, false);
        sched.request_slot(user("c"), false);
        sched.cleanup();
        assert_eq!(sched.num_active(), 0);
        assert_eq!(sched.num_queued(), 0);
        assert_eq!(sched.num_queued_resumable(), 0);
    }

    #[test]
    fn test_update_config_applies_to_next_admission() {
        let sched = UploadSlotScheduler::new(limits(1, 1, 5));
        sched.poll_for_slot(user("a"), true, false);
        assert_eq!(sched.poll_for_slot(user("b"), false, false), Admission::Rejected);

        sched.update_config(limits(2, 2, 5));
        assert!(sched.poll_for_slot(user("b"), false, false).is_admitted());
        assert_eq!(sched.config().hard_max_uploads, 2);
    }

    #[test]
    fn test_measure_bandwidth_sums_active_users() {
        let sched = UploadSlotScheduler::new(SchedulerConfig {
            bandwidth_window: 2,
            ..limits(5, 5, 5)
        });
        sched.poll_for_slot(Arc::new(SimulatedUser::new("a", "a", 4.0)), true, false);
        sched.poll_for_slot(Arc::new(SimulatedUser::new("b", "b", 6.0)), true, false);
        assert_eq!(sched.average_bandwidth(), Err(SlotError::InsufficientData));

        sched.measure_bandwidth();
        assert_eq!(sched.measured_bandwidth(), Err(SlotError::InsufficientData));
        assert_eq!(sched.average_bandwidth(), Ok(10.0));

        sched.measure_bandwidth();
        assert_eq!(sched.measured_bandwidth(), Ok(10.0));
        assert_eq!(sched.sample_count(), 2);
    }
}
