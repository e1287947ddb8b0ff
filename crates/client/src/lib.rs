//! Notifier client: a STOMP-over-WebSocket notification session plus the toast
//! presentation engine that renders what it delivers.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod stores;
pub mod toast;
pub mod ws;

pub use client::{ClientBuilder, NotificationClient};
pub use config::{AuthMode, ClientConfig, ReconnectConfig};
pub use dispatch::{Delivery, Dispatcher, NotificationConsumer, RecentIds};
pub use logging::{Direction, FrameTap, TracingTap};
pub use notifier_shared::{Credential, NotificationEvent, NotificationKind, NotifyError};
pub use stores::{OptimisticUnread, UnreadCount};
pub use toast::{Locale, Severity, ToastEvent, ToastId, ToastManager, ToastRequest};
pub use ws::{Connector, SessionState, SessionStatus};
