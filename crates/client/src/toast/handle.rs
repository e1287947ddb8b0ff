//! Toast data: severity, requests and the handles the manager owns.

use chrono::{DateTime, Utc};
use notifier_shared::{NotificationEvent, NotificationKind};

use super::render::Scheme;

/// Unique identifier for a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToastId(u64);

impl ToastId {
    fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ToastId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "toast-{}", self.0)
    }
}

/// Severity level; determines default duration, colors and title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Severity {
    Success,
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Success,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
    ];

    /// Auto-dismiss delay used when the caller gives none.
    #[must_use]
    pub fn default_duration_ms(&self) -> u64 {
        match self {
            Severity::Success | Severity::Info => 4_000,
            Severity::Warning => 5_000,
            Severity::Error => 6_000,
        }
    }
}

impl From<NotificationKind> for Severity {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Success => Severity::Success,
            NotificationKind::Info => Severity::Info,
            NotificationKind::Warning => Severity::Warning,
            NotificationKind::Error => Severity::Error,
        }
    }
}

/// What a caller asks the manager to show.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastRequest {
    pub message: String,
    pub title: Option<String>,
    pub severity: Severity,
    pub duration_ms: Option<u64>,
    pub auto_close: Option<bool>,
    pub scheme: Option<Scheme>,
}

impl ToastRequest {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            title: None,
            severity,
            duration_ms: None,
            auto_close: None,
            scheme: None,
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// `0` means the toast stays until dismissed.
    #[must_use]
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = Some(auto_close);
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }
}

impl From<&NotificationEvent> for ToastRequest {
    fn from(event: &NotificationEvent) -> Self {
        let mut request = ToastRequest::new(event.kind.into(), event.body.clone());
        if !event.title.trim().is_empty() {
            request.title = Some(event.title.clone());
        }
        request
    }
}

/// One visible toast.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastHandle {
    pub id: ToastId,
    pub message: String,
    /// Custom title; the severity's localized title is used when absent.
    pub title: Option<String>,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub auto_close: bool,
    pub scheme: Option<Scheme>,
}

impl ToastHandle {
    pub(crate) fn from_request(request: ToastRequest, created_at: DateTime<Utc>) -> Self {
        let duration_ms = request
            .duration_ms
            .unwrap_or_else(|| request.severity.default_duration_ms());
        Self {
            id: ToastId::next(),
            message: request.message,
            title: request.title,
            severity: request.severity,
            created_at,
            duration_ms,
            auto_close: request.auto_close.unwrap_or(true) && duration_ms > 0,
            scheme: request.scheme,
        }
    }

    /// Whether a removal timer is scheduled for this toast.
    #[must_use]
    pub fn expires(&self) -> bool {
        self.auto_close && self.duration_ms > 0
    }

    /// Milliseconds until auto-dismiss at `now`, `None` for sticky toasts.
    #[must_use]
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        if !self.expires() {
            return None;
        }
        let elapsed = (now - self.created_at).num_milliseconds().max(0) as u64;
        Some(self.duration_ms.saturating_sub(elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_durations_per_severity() {
        let expected = [
            (Severity::Success, 4_000),
            (Severity::Error, 6_000),
            (Severity::Warning, 5_000),
            (Severity::Info, 4_000),
        ];
        for (severity, ms) in expected {
            let handle = ToastHandle::from_request(ToastRequest::new(severity, "m"), Utc::now());
            assert_eq!(handle.duration_ms, ms, "{severity:?}");
            assert!(handle.expires());
        }
    }

    #[test]
    fn zero_duration_or_no_auto_close_is_sticky() {
        let zero = ToastHandle::from_request(
            ToastRequest::new(Severity::Info, "m").duration_ms(0),
            Utc::now(),
        );
        assert!(!zero.expires());
        assert!(!zero.auto_close);

        let manual = ToastHandle::from_request(
            ToastRequest::new(Severity::Success, "m").auto_close(false),
            Utc::now(),
        );
        assert!(!manual.expires());
        assert_eq!(manual.remaining_ms(Utc::now()), None);
    }

    #[test]
    fn request_from_event_keeps_title_and_kind() {
        let event: NotificationEvent = serde_json::from_str(
            r#"{"id":"n1","title":"New request","message":"Details","kind":"warning"}"#,
        )
        .unwrap();
        let request = ToastRequest::from(&event);
        assert_eq!(request.severity, Severity::Warning);
        assert_eq!(request.title.as_deref(), Some("New request"));
        assert_eq!(request.message, "Details");
        assert_eq!(request.duration_ms, None);
    }

    #[test]
    fn ids_are_unique() {
        let a = ToastHandle::from_request(ToastRequest::new(Severity::Info, "a"), Utc::now());
        let b = ToastHandle::from_request(ToastRequest::new(Severity::Info, "b"), Utc::now());
        assert_ne!(a.id, b.id);
    }
}
