//! Toast lifecycle management.
//!
//! Each toast gets its own removal timer, keyed by [`ToastId`]. Dismissing a toast
//! cancels its timer under the same lock that removes it, so a toast is removed at
//! most once no matter how dismissal and expiry race.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notifier_shared::NotificationEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::handle::{Severity, ToastHandle, ToastId, ToastRequest};
use super::render::{render, Locale, ToastView};
use crate::dispatch::NotificationConsumer;

const EVENT_CAPACITY: usize = 64;

/// Why a toast left the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RemovalReason {
    Expired,
    Dismissed,
    Cleared,
}

/// Changes to the stack, for renderers that redraw on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum ToastEvent {
    Shown(ToastHandle),
    Removed { id: ToastId, reason: RemovalReason },
}

#[derive(Default)]
struct Inner {
    /// Newest first.
    visible: VecDeque<ToastHandle>,
    timers: HashMap<ToastId, JoinHandle<()>>,
}

impl Inner {
    /// Remove `id` and cancel its timer. Returns false if it was already gone.
    fn remove(&mut self, id: ToastId) -> bool {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
        match self.visible.iter().position(|t| t.id == id) {
            Some(pos) => {
                self.visible.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Owns the visible toasts. Cheap to clone; clones share the same stack.
#[derive(Clone)]
pub struct ToastManager {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<ToastEvent>,
}

impl Default for ToastManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToastManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    /// Show a toast on top of the stack and schedule its removal if it expires.
    ///
    /// Timers need a tokio runtime; without one the toast stays until dismissed.
    pub fn show(&self, request: ToastRequest) -> ToastId {
        let mut handle = ToastHandle::from_request(request, Utc::now());
        let id = handle.id;
        let mut inner = self.lock();

        if handle.expires() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let timer = runtime.spawn(expire_after(
                        Arc::downgrade(&self.inner),
                        self.events.clone(),
                        id,
                        Duration::from_millis(handle.duration_ms),
                    ));
                    inner.timers.insert(id, timer);
                }
                Err(_) => {
                    crate::log_warn!("No runtime for {} timer; it needs manual dismissal", id);
                    handle.auto_close = false;
                }
            }
        }

        inner.visible.push_front(handle.clone());
        // Under the lock: the timer takes it before announcing removal.
        let _ = self.events.send(ToastEvent::Shown(handle));
        id
    }

    pub fn success(&self, message: impl Into<String>) -> ToastId {
        self.show(ToastRequest::new(Severity::Success, message))
    }

    pub fn error(&self, message: impl Into<String>) -> ToastId {
        self.show(ToastRequest::new(Severity::Error, message))
    }

    pub fn warning(&self, message: impl Into<String>) -> ToastId {
        self.show(ToastRequest::new(Severity::Warning, message))
    }

    pub fn info(&self, message: impl Into<String>) -> ToastId {
        self.show(ToastRequest::new(Severity::Info, message))
    }

    /// Dismiss a toast by its ID, cancelling its timer.
    ///
    /// Returns `true` if the toast was still visible. Dismissing twice is a no-op.
    pub fn dismiss(&self, id: ToastId) -> bool {
        let removed = self.lock().remove(id);
        if removed {
            let _ = self.events.send(ToastEvent::Removed {
                id,
                reason: RemovalReason::Dismissed,
            });
        }
        removed
    }

    /// Remove every toast and cancel every timer.
    pub fn clear(&self) {
        let removed: Vec<ToastId> = {
            let mut inner = self.lock();
            for (_, timer) in inner.timers.drain() {
                timer.abort();
            }
            inner.visible.drain(..).map(|t| t.id).collect()
        };
        for id in removed {
            let _ = self.events.send(ToastEvent::Removed {
                id,
                reason: RemovalReason::Cleared,
            });
        }
    }

    /// Snapshot of the stack, newest first.
    #[must_use]
    pub fn visible(&self) -> Vec<ToastHandle> {
        self.lock().visible.iter().cloned().collect()
    }

    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.lock().visible.len()
    }

    /// Whether `id` still has a pending removal timer.
    #[must_use]
    pub fn has_timer(&self, id: ToastId) -> bool {
        self.lock().timers.contains_key(&id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.events.subscribe()
    }

    /// Render the current stack.
    #[must_use]
    pub fn render(&self, locale: Locale) -> Vec<ToastView> {
        render(self.lock().visible.iter(), locale, Utc::now())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn expire_after(
    inner: Weak<Mutex<Inner>>,
    events: broadcast::Sender<ToastEvent>,
    id: ToastId,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let removed = {
        let mut guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop our own handle first so `remove` does not abort the running task.
        guard.timers.remove(&id);
        guard.remove(id)
    };
    if removed {
        let _ = events.send(ToastEvent::Removed {
            id,
            reason: RemovalReason::Expired,
        });
    }
}

#[async_trait]
impl NotificationConsumer for ToastManager {
    fn name(&self) -> &str {
        "toasts"
    }

    async fn deliver(&self, event: &NotificationEvent) {
        self.show(ToastRequest::from(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn removals(rx: &mut broadcast::Receiver<ToastEvent>) -> Vec<(ToastId, RemovalReason)> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ToastEvent::Removed { id, reason }) => out.push((id, reason)),
                Ok(ToastEvent::Shown(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn newest_toast_is_on_top_without_limit() {
        let manager = ToastManager::new();
        let ids: Vec<ToastId> = (0..10).map(|i| manager.info(format!("m{i}"))).collect();
        let visible = manager.visible();
        assert_eq!(visible.len(), 10);
        assert_eq!(visible[0].id, ids[9]);
        assert_eq!(visible[9].id, ids[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn toasts_expire_independently() {
        let manager = ToastManager::new();
        let mut rx = manager.subscribe();
        let success = manager.success("saved");
        let error = manager.error("failed");

        tokio::time::sleep(Duration::from_millis(4_100)).await;
        assert_eq!(removals(&mut rx), vec![(success, RemovalReason::Expired)]);
        assert_eq!(manager.visible_count(), 1);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(removals(&mut rx), vec![(error, RemovalReason::Expired)]);
        assert_eq!(manager.visible_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_twice_removes_once_and_cancels_timer() {
        let manager = ToastManager::new();
        let mut rx = manager.subscribe();
        let id = manager.warning("careful");
        assert!(manager.has_timer(id));

        assert!(manager.dismiss(id));
        assert!(!manager.dismiss(id));
        assert!(!manager.has_timer(id));

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(removals(&mut rx), vec![(id, RemovalReason::Dismissed)]);
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_toasts_have_no_timer() {
        let manager = ToastManager::new();
        let zero = manager.show(ToastRequest::new(Severity::Info, "stay").duration_ms(0));
        let manual = manager.show(ToastRequest::new(Severity::Success, "stay").auto_close(false));
        assert!(!manager.has_timer(zero));
        assert!(!manager.has_timer(manual));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.visible_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_everything() {
        let manager = ToastManager::new();
        let mut rx = manager.subscribe();
        let a = manager.info("a");
        let b = manager.error("b");
        manager.clear();
        assert_eq!(manager.visible_count(), 0);
        assert!(!manager.has_timer(a) && !manager.has_timer(b));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut removed = removals(&mut rx);
        removed.sort();
        let mut expected = vec![(a, RemovalReason::Cleared), (b, RemovalReason::Cleared)];
        expected.sort();
        assert_eq!(removed, expected);
    }

    #[test]
    fn show_without_runtime_keeps_toast_without_countdown() {
        let manager = ToastManager::new();
        let id = manager.success("no runtime");
        assert!(!manager.has_timer(id));
        let visible = manager.visible();
        assert_eq!(visible.len(), 1);
        assert!(!visible[0].auto_close);
        assert!(!visible[0].expires());
        assert_eq!(manager.render(Locale::En)[0].remaining_ms, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shown_always_precedes_removed() {
        let manager = ToastManager::new();
        let mut rx = manager.subscribe();
        let ids: Vec<ToastId> = (0..20)
            .map(|i| manager.show(ToastRequest::new(Severity::Info, format!("m{i}")).duration_ms(1)))
            .collect();

        let mut shown = Vec::new();
        let mut removed = 0;
        while removed < ids.len() {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap() {
                ToastEvent::Shown(handle) => shown.push(handle.id),
                ToastEvent::Removed { id, .. } => {
                    assert!(shown.contains(&id), "{id} removed before shown");
                    removed += 1;
                }
            }
        }
        assert_eq!(manager.visible_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_uses_event_kind_and_title() {
        let manager = ToastManager::new();
        let event: NotificationEvent = serde_json::from_str(
            r#"{"id":"n1","title":"New request","message":"..","kind":"success"}"#,
        )
        .unwrap();
        manager.deliver(&event).await;

        let visible = manager.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].severity, Severity::Success);
        assert_eq!(visible[0].duration_ms, 4_000);
        let views = manager.render(Locale::En);
        assert_eq!(views[0].title, "New request");
    }
}
