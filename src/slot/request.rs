//! A single outstanding claim on an upload slot.

use std::fmt;
use std::sync::Arc;

use super::{same_user, Priority, RequestKind, SlotListener, SlotUser};

/// One outstanding slot claim.
///
/// The two request shapes differ only in how `priority`, `preemptible` and
/// `queuable` are derived from the caller's flags; they share all behavior.
/// Two requests are equal iff they belong to the same user.
#[derive(Clone)]
pub struct SlotRequest {
    user: Arc<dyn SlotUser>,
    listener: Option<Arc<dyn SlotListener>>,
    kind: RequestKind,
    priority: Priority,
    preemptible: bool,
    queuable: bool,
}

impl SlotRequest {
    /// Request from a polling consumer.
    ///
    /// HIGH if flagged, NORMAL otherwise; never preemptible; queuable only if
    /// the caller opts in.
    pub fn http(user: Arc<dyn SlotUser>, queue: bool, high_priority: bool) -> Self {
        let priority = if high_priority {
            Priority::High
        } else {
            Priority::Normal
        };
        Self {
            user,
            listener: None,
            kind: RequestKind::Http,
            priority,
            preemptible: false,
            queuable: queue,
        }
    }

    /// Request from a callback consumer.
    ///
    /// HIGH if flagged, SEED otherwise; preemptible and queuable only as SEED.
    pub fn bt<L>(listener: Arc<L>, high_priority: bool) -> Self
    where
        L: SlotListener + 'static,
    {
        let priority = if high_priority {
            Priority::High
        } else {
            Priority::Seed
        };
        let user: Arc<dyn SlotUser> = listener.clone();
        Self {
            user,
            listener: Some(listener),
            kind: RequestKind::Bt,
            priority,
            preemptible: !high_priority,
            queuable: priority == Priority::Seed,
        }
    }

    pub fn user(&self) -> &Arc<dyn SlotUser> {
        &self.user
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_preemptible(&self) -> bool {
        self.preemptible
    }

    pub fn is_queuable(&self) -> bool {
        self.queuable
    }

    pub fn host(&self) -> &str {
        self.user.host()
    }

    /// Whether this request belongs to `user`.
    pub fn is_for(&self, user: &dyn SlotUser) -> bool {
        same_user(&self.user, user)
    }

    /// Notify the owning listener that its slot is ready.  No-op for polling
    /// consumers, which discover admission on their next poll.
    pub(crate) fn notify_available(&self) {
        if let Some(listener) = &self.listener {
            listener.slot_available();
        }
    }
}

impl PartialEq for SlotRequest {
    fn eq(&self, other: &Self) -> bool {
        self.is_for(other.user.as_ref())
    }
}

impl Eq for SlotRequest {}

impl fmt::Debug for SlotRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRequest")
            .field("host", &self.host())
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("preemptible", &self.preemptible)
            .field("queuable", &self.queuable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedUser;

    fn user(name: &str) -> Arc<SimulatedUser> {
        Arc::new(SimulatedUser::new(name, "192.0.2.1", 10.0))
    }

    #[test]
    fn test_http_flags() {
        let normal = SlotRequest::http(user("a"), true, false);
        assert_eq!(normal.kind(), RequestKind::Http);
        assert_eq!(normal.priority(), Priority::Normal);
        assert!(!normal.is_preemptible());
        assert!(normal.is_queuable());

        let high = SlotRequest::http(user("b"), false, true);
        assert_eq!(high.priority(), Priority::High);
        assert!(!high.is_preemptible());
        assert!(!high.is_queuable());
    }

    #[test]
    fn test_bt_flags() {
        let seed = SlotRequest::bt(user("a"), false);
        assert_eq!(seed.kind(), RequestKind::Bt);
        assert_eq!(seed.priority(), Priority::Seed);
        assert!(seed.is_preemptible());
        assert!(seed.is_queuable());

        let high = SlotRequest::bt(user("b"), true);
        assert_eq!(high.priority(), Priority::High);
        assert!(!high.is_preemptible());
        assert!(!high.is_queuable());
    }

    #[test]
    fn test_equality_is_by_user() {
        let u = user("a");
        let http = SlotRequest::http(u.clone(), true, false);
        let bt = SlotRequest::bt(u, true);
        assert_eq!(http, bt);
        assert_ne!(http, SlotRequest::http(user("a"), true, false));
    }

    #[test]
    fn test_notify_only_reaches_listeners() {
        let u = user("a");
        SlotRequest::http(u.clone(), true, false).notify_available();
        assert_eq!(u.notifications(), 0);
        SlotRequest::bt(u.clone(), false).notify_available();
        assert_eq!(u.notifications(), 1);
    }
}
