//! Real-time channel to the notification source.
//!
//! # Architecture
//!
//! ```text
//!   NotificationClient ──intents──▶ session actor ──────────▶ Dispatcher
//!                                        │                        │
//!                                  StompChannel            consumers (toasts,
//!                                        │                  unread count)
//!                                   Connection
//!                          (tungstenite or in-memory)
//! ```
//!
//! The actor is the only task that reads from the connection. Everything else talks to
//! it through [`SessionHandle`] and observes it through a `watch` channel.

mod connection;
pub mod session;
mod stomp;

pub use connection::{
    memory_transport, Connection, Connector, MemoryConnector, MemoryPeer, MemoryServer,
    TungsteniteConnector,
};
pub use session::{CredentialSource, SessionHandle, SessionState, SessionStatus};
pub(crate) use session::{SessionContext, StatusCell};
pub use stomp::{HeartbeatMonitor, Route, StompChannel, Subscription, Subscriptions};
