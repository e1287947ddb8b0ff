//! Notification dispatcher: decode, dedup, fan out.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notifier_shared::{parse_unread_count, NotificationEvent, NotifyError};

use crate::stores::UnreadCount;

/// Something that wants every new notification, e.g. the toast manager.
#[async_trait]
pub trait NotificationConsumer: Send + Sync {
    /// Used in logs when the consumer misbehaves.
    fn name(&self) -> &str;

    async fn deliver(&self, event: &NotificationEvent);
}

/// Bounded FIFO of recently seen notification ids.
#[derive(Debug)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`. Returns false if it is already inside the window.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Result of dispatching one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { consumers: usize },
    Duplicate,
}

pub struct Dispatcher {
    consumers: Mutex<Vec<Arc<dyn NotificationConsumer>>>,
    recent: Mutex<RecentIds>,
    unread: UnreadCount,
    consumer_timeout: Duration,
}

impl Dispatcher {
    pub fn new(dedup_capacity: usize, consumer_timeout: Duration) -> Self {
        Self {
            consumers: Mutex::new(Vec::new()),
            recent: Mutex::new(RecentIds::new(dedup_capacity)),
            unread: UnreadCount::new(),
            consumer_timeout,
        }
    }

    /// Consumers are called in registration order.
    pub fn register(&self, consumer: Arc<dyn NotificationConsumer>) {
        crate::log_debug!("Registered notification consumer '{}'", consumer.name());
        lock(&self.consumers).push(consumer);
    }

    pub fn consumer_count(&self) -> usize {
        lock(&self.consumers).len()
    }

    pub fn unread(&self) -> &UnreadCount {
        &self.unread
    }

    /// Handle one MESSAGE body from the notifications queue.
    pub async fn dispatch_notification(&self, body: &str) -> Result<Delivery, NotifyError> {
        let event = serde_json::from_str::<NotificationEvent>(body).map_err(|e| {
            let err = NotifyError::protocol(format!("notification body: {e}"));
            crate::log_warn!("Dropping notification: {}", err);
            err
        })?;
        Ok(self.dispatch_event(event).await)
    }

    /// Dedup an already decoded event and hand it to every consumer.
    pub async fn dispatch_event(&self, event: NotificationEvent) -> Delivery {
        if !lock(&self.recent).insert(&event.id) {
            crate::log_debug!("Dropping duplicate notification {}", event.id);
            return Delivery::Duplicate;
        }

        let consumers = lock(&self.consumers).clone();
        let mut hung = Vec::new();
        let mut delivered = 0;
        for consumer in &consumers {
            match tokio::time::timeout(self.consumer_timeout, consumer.deliver(&event)).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    let err = NotifyError::DispatchTimeout {
                        consumer: consumer.name().to_string(),
                        timeout_ms: self.consumer_timeout.as_millis() as u64,
                    };
                    crate::log_error!("Detaching consumer: {}", err);
                    hung.push(consumer.clone());
                }
            }
        }

        if !hung.is_empty() {
            lock(&self.consumers).retain(|c| !hung.iter().any(|h| Arc::ptr_eq(c, h)));
        }
        Delivery::Delivered {
            consumers: delivered,
        }
    }

    /// Handle one MESSAGE body from the unread-count queue.
    pub fn dispatch_unread(&self, body: &str) -> Result<u64, NotifyError> {
        match parse_unread_count(body) {
            Ok(count) => {
                self.unread.publish(count);
                Ok(count)
            }
            Err(msg) => {
                let err = NotifyError::protocol(msg);
                crate::log_warn!("Dropping unread count: {}", err);
                Err(err)
            }
        }
    }
}

/// A poisoned lock only means a consumer panicked mid-registration; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl NotificationConsumer for Counting {
        fn name(&self) -> &str {
            self.name
        }

        async fn deliver(&self, _event: &NotificationEvent) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name);
        }
    }

    struct Hung;

    #[async_trait]
    impl NotificationConsumer for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        async fn deliver(&self, _event: &NotificationEvent) {
            std::future::pending::<()>().await;
        }
    }

    fn counting(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Counting> {
        Arc::new(Counting {
            name,
            calls: AtomicUsize::new(0),
            log: log.clone(),
        })
    }

    fn body(id: &str) -> String {
        format!(r#"{{"id":"{id}","title":"t","message":"m","kind":"info"}}"#)
    }

    #[test]
    fn recent_ids_evicts_oldest() {
        let mut recent = RecentIds::new(2);
        assert!(recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("c"));
        assert_eq!(recent.len(), 2);
        assert!(recent.insert("a"), "a fell out of the window");
        assert!(!recent.insert("c"));
    }

    #[test]
    fn zero_capacity_disables_dedup() {
        let mut recent = RecentIds::new(0);
        assert!(recent.insert("a"));
        assert!(recent.insert("a"));
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn duplicates_reach_consumers_once_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = counting("first", &log);
        let second = counting("second", &log);
        let dispatcher = Dispatcher::new(256, Duration::from_secs(1));
        dispatcher.register(first.clone());
        dispatcher.register(second.clone());

        assert_eq!(
            dispatcher.dispatch_notification(&body("n1")).await,
            Ok(Delivery::Delivered { consumers: 2 })
        );
        assert_eq!(
            dispatcher.dispatch_notification(&body("n1")).await,
            Ok(Delivery::Duplicate)
        );
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let dispatcher = Dispatcher::new(256, Duration::from_secs(1));
        let err = dispatcher.dispatch_notification("{not json").await.unwrap_err();
        assert!(matches!(err, NotifyError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_consumer_is_detached() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let after = counting("after", &log);
        let dispatcher = Dispatcher::new(256, Duration::from_millis(100));
        dispatcher.register(Arc::new(Hung));
        dispatcher.register(after.clone());

        assert_eq!(
            dispatcher.dispatch_notification(&body("n1")).await,
            Ok(Delivery::Delivered { consumers: 1 })
        );
        assert_eq!(dispatcher.consumer_count(), 1);
        assert_eq!(
            dispatcher.dispatch_notification(&body("n2")).await,
            Ok(Delivery::Delivered { consumers: 1 })
        );
        assert_eq!(after.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unread_keeps_last_good_value() {
        let dispatcher = Dispatcher::new(256, Duration::from_secs(1));
        assert_eq!(dispatcher.dispatch_unread("5"), Ok(5));
        assert!(matches!(
            dispatcher.dispatch_unread("abc"),
            Err(NotifyError::Protocol(_))
        ));
        assert_eq!(dispatcher.unread().get(), Some(5));
    }
}
