//! Unread-count store.
//!
//! The latest value lives in an atomic so any number of readers can poll it without
//! taking a lock. A `watch` channel lets readers await changes instead of polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use notifier_shared::NotificationEvent;
use tokio::sync::watch;

use crate::dispatch::NotificationConsumer;

const UNKNOWN: u64 = u64::MAX;

/// Process-wide unread count, `None` until the server publishes one.
#[derive(Clone)]
pub struct UnreadCount {
    inner: Arc<Inner>,
}

struct Inner {
    latest: AtomicU64,
    changes: watch::Sender<Option<u64>>,
}

impl Default for UnreadCount {
    fn default() -> Self {
        Self::new()
    }
}

impl UnreadCount {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                latest: AtomicU64::new(UNKNOWN),
                changes: watch::Sender::new(None),
            }),
        }
    }

    pub fn get(&self) -> Option<u64> {
        match self.inner.latest.load(Ordering::Acquire) {
            UNKNOWN => None,
            n => Some(n),
        }
    }

    /// Receiver that always holds the latest value; no history is kept.
    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.inner.changes.subscribe()
    }

    /// Replace the count with an authoritative value from the server.
    pub(crate) fn publish(&self, count: u64) {
        let count = count.min(UNKNOWN - 1);
        self.inner.latest.store(count, Ordering::Release);
        self.inner.changes.send_replace(Some(count));
    }

    /// Bump the count for a freshly delivered notification.
    pub(crate) fn increment(&self) {
        let next = match self.inner.latest.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            Some(match n {
                UNKNOWN => 1,
                n => n.saturating_add(1).min(UNKNOWN - 1),
            })
        }) {
            Ok(UNKNOWN) | Err(_) => 1,
            Ok(prev) => prev.saturating_add(1).min(UNKNOWN - 1),
        };
        self.inner.changes.send_replace(Some(next));
    }
}

/// Optimistic updater: every new notification counts as unread until the server
/// pushes an authoritative value on the unread-count queue.
pub struct OptimisticUnread(pub UnreadCount);

#[async_trait]
impl NotificationConsumer for OptimisticUnread {
    fn name(&self) -> &str {
        "unread-count"
    }

    async fn deliver(&self, _event: &NotificationEvent) {
        self.0.increment();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_until_published() {
        let unread = UnreadCount::new();
        assert_eq!(unread.get(), None);
        unread.publish(5);
        assert_eq!(unread.get(), Some(5));
        assert_eq!(*unread.subscribe().borrow(), Some(5));
    }

    #[test]
    fn increment_starts_from_zero_when_unknown() {
        let unread = UnreadCount::new();
        unread.increment();
        assert_eq!(unread.get(), Some(1));
        unread.publish(10);
        unread.increment();
        assert_eq!(unread.get(), Some(11));
        assert_eq!(*unread.subscribe().borrow(), Some(11));
    }

    #[tokio::test]
    async fn subscribers_see_latest_value_only() {
        let unread = UnreadCount::new();
        let mut rx = unread.subscribe();
        unread.publish(1);
        unread.publish(2);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(2));
    }
}
