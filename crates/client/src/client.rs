//! Application-facing entry point.
//!
//! A [`NotificationClient`] wires a connector, a credential provider and a dispatcher
//! into session actors. Starting and stopping never block: `start` spawns an actor,
//! `stop` tells it to quit and publishes `Closed` right away.

use std::sync::{Arc, Mutex, MutexGuard};

use notifier_shared::{Credential, NotifyError, NotifyResult};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, NotificationConsumer};
use crate::logging::{FrameTap, TracingTap};
use crate::stores::{OptimisticUnread, UnreadCount};
use crate::ws::{
    session, Connector, CredentialSource, SessionContext, SessionHandle, SessionState,
    SessionStatus, StatusCell, TungsteniteConnector,
};

pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    credentials: Option<CredentialSource>,
    tap: Option<Arc<dyn FrameTap>>,
    optimistic_unread: bool,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            credentials: None,
            tap: Some(Arc::new(TracingTap)),
            optimistic_unread: false,
        }
    }

    /// Defaults to [`TungsteniteConnector`].
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Provider read at start and before every reconnect attempt.
    #[must_use]
    pub fn credentials<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<Credential> + Send + Sync + 'static,
    {
        self.credentials = Some(Arc::new(provider));
        self
    }

    /// Use one fixed credential for the lifetime of the client.
    #[must_use]
    pub fn credential(self, credential: Credential) -> Self {
        self.credentials(move || Some(credential.clone()))
    }

    #[must_use]
    pub fn tap(mut self, tap: Arc<dyn FrameTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    #[must_use]
    pub fn without_tap(mut self) -> Self {
        self.tap = None;
        self
    }

    /// Bump the unread count for every delivered notification until the server
    /// publishes the real value.
    #[must_use]
    pub fn optimistic_unread(mut self, enabled: bool) -> Self {
        self.optimistic_unread = enabled;
        self
    }

    pub fn build(self) -> NotifyResult<NotificationClient> {
        let endpoint = self.config.endpoint_url()?;
        let credentials = self
            .credentials
            .ok_or_else(|| NotifyError::config("no credential provider configured"))?;

        let dispatcher = Arc::new(Dispatcher::new(
            self.config.dedup_capacity,
            self.config.consumer_timeout(),
        ));
        if self.optimistic_unread {
            dispatcher.register(Arc::new(OptimisticUnread(dispatcher.unread().clone())));
        }

        let ctx = SessionContext {
            config: Arc::new(self.config),
            endpoint,
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(TungsteniteConnector)),
            credentials,
            dispatcher,
            tap: self.tap,
            status: Arc::new(StatusCell::new()),
        };
        Ok(NotificationClient {
            ctx,
            session: Mutex::new(None),
        })
    }
}

/// One client connection to the notification source.
pub struct NotificationClient {
    ctx: SessionContext,
    session: Mutex<Option<SessionHandle>>,
}

impl NotificationClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Start a session unless one is already running.
    ///
    /// Fails immediately, without touching the network, when the credential is missing
    /// or expired, or when called outside a tokio runtime.
    pub fn start(&self) -> NotifyResult<()> {
        let mut current = self.lock_session();
        if let Some(handle) = current.as_ref() {
            if !handle.is_finished() && self.ctx.status.current().state.is_active() {
                return Ok(());
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NotifyError::config(format!("start needs a tokio runtime: {e}")))?;

        let usable = match (self.ctx.credentials)() {
            Some(credential) if credential.is_expired() => Err(NotifyError::auth(format!(
                "credential expired at {}",
                credential.expires_at()
            ))),
            Some(_) => Ok(()),
            None => Err(NotifyError::auth("no credential available")),
        };
        if let Err(err) = usable {
            crate::log_error!("Not starting session: {}", err);
            self.ctx.status.fail(SessionState::Disconnected, err.clone());
            return Err(err);
        }

        // A finished or winding-down actor is simply abandoned; its writes are fenced.
        drop(current.take());
        crate::log_info!("Starting session to {}", self.ctx.endpoint);
        *current = Some(session::spawn(self.ctx.clone(), &runtime));
        Ok(())
    }

    /// Stop the session from any state. Terminal until the next [`start`](Self::start).
    pub fn stop(&self) {
        match self.lock_session().take() {
            Some(handle) => handle.stop(),
            None => self.ctx.status.close(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.ctx.status.current()
    }

    pub fn state(&self) -> SessionState {
        self.status().state
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.ctx.status.subscribe()
    }

    /// Send an application message. Dropped with a warning if the session is not live
    /// by the time the actor handles it.
    pub fn send<T: Serialize>(&self, destination: &str, body: &T) -> NotifyResult<()> {
        let json = serde_json::to_string(body)
            .map_err(|e| NotifyError::protocol(format!("encode body: {e}")))?;
        match self.lock_session().as_ref() {
            Some(handle) => handle.send(destination, json),
            None => Err(NotifyError::transport("session is not running")),
        }
    }

    pub fn unread(&self) -> UnreadCount {
        self.ctx.dispatcher.unread().clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.ctx.dispatcher
    }

    /// Consumers see notifications in registration order.
    pub fn register(&self, consumer: Arc<dyn NotificationConsumer>) {
        self.ctx.dispatcher.register(consumer);
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::memory_transport;
    use chrono::{Duration as ChronoDuration, Utc};

    fn config() -> ClientConfig {
        let mut config = ClientConfig::new("ws://localhost:8080/ws");
        config.heartbeat_ms = 0;
        config
    }

    #[test]
    fn build_requires_credentials() {
        let err = NotificationClient::builder(config()).build().err();
        assert!(matches!(err, Some(NotifyError::Config(_))));
    }

    #[test]
    fn build_rejects_bad_endpoint() {
        let built = NotificationClient::builder(ClientConfig::new("ftp://example.com"))
            .credential(Credential::new("t", Utc::now() + ChronoDuration::hours(1)))
            .build();
        assert!(matches!(built.err(), Some(NotifyError::Config(_))));
    }

    #[test]
    fn optimistic_unread_registers_consumer() {
        let client = NotificationClient::builder(config())
            .credential(Credential::new("t", Utc::now() + ChronoDuration::hours(1)))
            .optimistic_unread(true)
            .build()
            .unwrap();
        assert_eq!(client.dispatcher().consumer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_credential_fails_without_connecting() {
        let (connector, server) = memory_transport();
        let client = NotificationClient::builder(config())
            .connector(Arc::new(connector))
            .credential(Credential::new("old", Utc::now() - ChronoDuration::minutes(1)))
            .build()
            .unwrap();

        let err = client.start().unwrap_err();
        assert!(err.is_auth());
        let status = client.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert_eq!(status.last_error, Some(err));
        tokio::task::yield_now().await;
        assert_eq!(server.attempts(), 0);
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let client = NotificationClient::builder(config())
            .credential(Credential::new("t", Utc::now() + ChronoDuration::hours(1)))
            .build()
            .unwrap();
        let err = client.start().unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_is_closed() {
        let client = NotificationClient::builder(config())
            .credential(Credential::new("t", Utc::now() + ChronoDuration::hours(1)))
            .build()
            .unwrap();
        client.stop();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.send("/app/x", &"hi").is_err());
    }
}
