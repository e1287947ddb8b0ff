//! Session state machine.
//!
//! One actor task per started session owns the connection and the [`SessionState`].
//! Callers never touch either directly: they enqueue [`Intent`]s through a
//! [`SessionHandle`] and observe progress through a `watch` channel.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──open──▶ Authenticating ──ack──▶ Live
//!       ▲                     ▲                      │                  │
//!       │ credential expired  │ backoff              │ reject/timeout   │ drop/ERROR/silence
//!       └──────────────── Reconnecting ◀─────────────┴──────────────────┘
//!
//! any state ──stop──▶ Closed
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{FutureExt, StreamExt};
use notifier_shared::{
    Command, ConnectAnnouncement, Credential, Frame, NotifyError, DEST_NOTIFICATIONS,
    DEST_UNREAD_COUNT,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use url::Url;

use super::connection::Connector;
use super::stomp::{error_text, Route, StompChannel};
use crate::config::{AuthMode, ClientConfig};
use crate::dispatch::Dispatcher;
use crate::logging::FrameTap;

/// Reads the current credential. Called at start and before every reconnect attempt.
pub type CredentialSource = Arc<dyn Fn() -> Option<Credential> + Send + Sync>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Live,
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Live)
    }

    /// Whether the actor is still working towards (or holding) a live session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Authenticating
                | SessionState::Live
                | SessionState::Reconnecting
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Live => "live",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        })
    }
}

/// Observable status: the state plus enough context to diagnose missing updates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Consecutive failed attempts since the last time the session was live.
    pub attempt: u32,
    pub last_error: Option<NotifyError>,
}

/// Shared status channel. Writes carry the generation of the session that made them so
/// a stopped actor can never overwrite the status of its successor.
pub(crate) struct StatusCell {
    tx: watch::Sender<SessionStatus>,
    generation: AtomicU64,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::Sender::new(SessionStatus::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> SessionStatus {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    /// Start a new generation and reset the status under it.
    pub(crate) fn begin(&self, status: SessionStatus) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(status);
        generation
    }

    /// Invalidate the running generation and publish `Closed`.
    pub(crate) fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tx.send_modify(|s| s.state = SessionState::Closed);
    }

    /// Record a failure outside any running session.
    pub(crate) fn fail(&self, state: SessionState, error: NotifyError) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tx.send_modify(|s| {
            s.state = state;
            s.last_error = Some(error);
        });
    }

    fn update(&self, generation: u64, f: impl FnOnce(&mut SessionStatus)) {
        self.tx.send_if_modified(|s| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            f(s);
            true
        });
    }
}

/// Requests from callers to the actor.
#[derive(Debug)]
pub(crate) enum Intent {
    Stop,
    Send { destination: String, body: String },
}

/// Everything a session actor needs, shared across sessions of one client.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub config: Arc<ClientConfig>,
    pub endpoint: Url,
    pub connector: Arc<dyn Connector>,
    pub credentials: CredentialSource,
    pub dispatcher: Arc<Dispatcher>,
    pub tap: Option<Arc<dyn FrameTap>>,
    pub status: Arc<StatusCell>,
}

/// Handle to a running session actor.
pub struct SessionHandle {
    intents: UnboundedSender<Intent>,
    status: Arc<StatusCell>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Request shutdown. Never blocks; the actor abandons whatever I/O is in flight.
    pub fn stop(&self) {
        let _ = self.intents.unbounded_send(Intent::Stop);
        self.status.close();
    }

    /// Queue an application SEND. Dropped with a warning if the session is not live
    /// when the actor gets to it.
    pub fn send(&self, destination: impl Into<String>, json: String) -> Result<(), NotifyError> {
        self.intents
            .unbounded_send(Intent::Send {
                destination: destination.into(),
                body: json,
            })
            .map_err(|_| NotifyError::transport("session is not running"))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a fresh state machine on `runtime`. The status reads `Connecting` from the
/// moment this returns so a second `start` sees the session as active.
pub(crate) fn spawn(ctx: SessionContext, runtime: &tokio::runtime::Handle) -> SessionHandle {
    let (intents_tx, intents_rx) = unbounded();
    let generation = ctx.status.begin(SessionStatus {
        state: SessionState::Connecting,
        ..SessionStatus::default()
    });
    let status = ctx.status.clone();
    let actor = SessionActor {
        ctx,
        generation,
        intents: intents_rx,
        attempt: 0,
        state: SessionState::Disconnected,
    };
    let cell = status.clone();
    let task = runtime.spawn(async move {
        // A panicking consumer or codec bug must not leave the status frozen.
        if let Err(panic) = AssertUnwindSafe(actor.run()).catch_unwind().await {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            crate::log_error!("Session actor panicked: {}", reason);
            cell.update(generation, |s| {
                s.state = SessionState::Disconnected;
                s.last_error = Some(NotifyError::transport(format!(
                    "session task panicked: {reason}"
                )));
            });
        }
    });
    SessionHandle {
        intents: intents_tx,
        status,
        task,
    }
}

/// Why one connection attempt (or live period) ended.
enum Exit {
    Stopped,
    /// Credential unusable; go to `Disconnected` without retrying.
    AuthFailed(NotifyError),
    /// Connection lost or rejected; reconnect after backoff.
    Dropped(NotifyError),
}

struct SessionActor {
    ctx: SessionContext,
    generation: u64,
    intents: UnboundedReceiver<Intent>,
    attempt: u32,
    state: SessionState,
}

/// Drive `fut` while servicing intents. `None` means stop was requested.
async fn until_stopped<F: Future>(
    intents: &mut UnboundedReceiver<Intent>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            intent = intents.next() => match intent {
                None | Some(Intent::Stop) => return None,
                Some(Intent::Send { destination, .. }) => {
                    crate::log_warn!("Dropping SEND to {}: session is not live", destination);
                }
            },
            out = &mut fut => return Some(out),
        }
    }
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            match self.connect_once().await {
                Exit::Stopped => {
                    self.transition(SessionState::Closed, None);
                    return;
                }
                Exit::AuthFailed(err) => {
                    crate::log_error!("Session cannot authenticate: {}", err);
                    self.transition(SessionState::Disconnected, Some(err));
                    return;
                }
                Exit::Dropped(err) => {
                    self.attempt += 1;
                    if !self.ctx.config.reconnect.allows(self.attempt) {
                        crate::log_error!(
                            "Giving up after {} attempts: {}",
                            self.attempt,
                            err
                        );
                        self.transition(SessionState::Disconnected, Some(err));
                        return;
                    }
                    let delay = self.ctx.config.reconnect.delay();
                    crate::log_warn!(
                        "Session dropped ({}); reconnecting in {}ms (attempt {})",
                        err,
                        delay.as_millis(),
                        self.attempt
                    );
                    self.transition(SessionState::Reconnecting, Some(err));
                    if until_stopped(&mut self.intents, sleep(delay)).await.is_none() {
                        self.transition(SessionState::Closed, None);
                        return;
                    }
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState, error: Option<NotifyError>) {
        if self.state != next {
            crate::log_info!("Session {} -> {}", self.state, next);
        }
        self.state = next;
        let attempt = self.attempt;
        self.ctx.status.update(self.generation, |s| {
            s.state = next;
            s.attempt = attempt;
            if let Some(err) = error {
                s.last_error = Some(err);
            }
        });
    }

    fn usable_credential(&self) -> Result<Credential, NotifyError> {
        match (self.ctx.credentials)() {
            Some(credential) if !credential.is_expired() => Ok(credential),
            Some(credential) => Err(NotifyError::auth(format!(
                "credential expired at {}",
                credential.expires_at()
            ))),
            None => Err(NotifyError::auth("no credential available")),
        }
    }

    /// Connecting → Authenticating → Live, and the live loop until something ends it.
    async fn connect_once(&mut self) -> Exit {
        let credential = match self.usable_credential() {
            Ok(credential) => credential,
            Err(err) => return Exit::AuthFailed(err),
        };

        self.transition(SessionState::Connecting, None);
        let open = timeout(
            self.ctx.config.connect_timeout(),
            self.ctx.connector.open(&self.ctx.endpoint, &credential),
        );
        let connection = match until_stopped(&mut self.intents, open).await {
            None => return Exit::Stopped,
            Some(Ok(Ok(connection))) => connection,
            Some(Ok(Err(err))) => return Exit::Dropped(err),
            Some(Err(_)) => {
                return Exit::Dropped(NotifyError::transport(format!(
                    "connect timed out after {}ms",
                    self.ctx.config.connect_timeout_ms
                )))
            }
        };

        let mut channel = StompChannel::new(
            connection,
            self.ctx.tap.clone(),
            self.ctx.config.missed_heartbeats,
        );
        self.transition(SessionState::Authenticating, None);
        let host = self.ctx.endpoint.host_str().unwrap_or("localhost").to_string();
        let mode = self.ctx.config.auth_mode;
        if let Err(err) = channel.connect(&credential, mode, &host, self.ctx.config.heartbeat_ms) {
            return Exit::Dropped(err);
        }

        // In the message variant the auth SEND is the last step before going live.
        if mode != AuthMode::Message {
            let auth_timeout = self.ctx.config.auth_timeout();
            let acked = timeout(auth_timeout, channel.await_connected());
            match until_stopped(&mut self.intents, acked).await {
                None => {
                    channel.shutdown();
                    return Exit::Stopped;
                }
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(err))) => return Exit::Dropped(err),
                Some(Err(_)) => {
                    return Exit::Dropped(NotifyError::auth(format!(
                        "no connect acknowledgment within {}ms",
                        auth_timeout.as_millis()
                    )))
                }
            }
        }

        self.live(channel).await
    }

    async fn live(&mut self, mut channel: StompChannel) -> Exit {
        self.attempt = 0;
        self.transition(SessionState::Live, None);

        if let Err(err) = self.enter_live(&mut channel) {
            return Exit::Dropped(err);
        }

        let heartbeat = self.ctx.config.heartbeat();
        let period = heartbeat.unwrap_or(Duration::from_secs(3600));
        let mut send_tick = interval_at(Instant::now() + period, period);
        let mut check_tick = interval_at(Instant::now() + period, period);
        send_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                intent = self.intents.next() => match intent {
                    None | Some(Intent::Stop) => {
                        channel.shutdown();
                        return Exit::Stopped;
                    }
                    Some(Intent::Send { destination, body }) => {
                        if let Err(err) = channel.send_raw(&destination, body) {
                            return Exit::Dropped(err);
                        }
                    }
                },
                frames = channel.next_frames() => {
                    let frames = match frames {
                        Ok(frames) => frames,
                        Err(err) => return Exit::Dropped(err),
                    };
                    for frame in frames {
                        if let Some(err) = self.handle_live_frame(&channel, frame).await {
                            return Exit::Dropped(err);
                        }
                    }
                },
                _ = send_tick.tick(), if heartbeat.is_some() => {
                    if let Err(err) = channel.send_heartbeat() {
                        return Exit::Dropped(err);
                    }
                },
                _ = check_tick.tick(), if heartbeat.is_some() => {
                    if channel.heartbeat_expired() {
                        return Exit::Dropped(NotifyError::transport(format!(
                            "no data from server for {} heartbeat intervals",
                            self.ctx.config.missed_heartbeats
                        )));
                    }
                },
            }
        }
    }

    /// Subscribe to both personal queues and announce the device.
    fn enter_live(&self, channel: &mut StompChannel) -> Result<(), NotifyError> {
        channel.subscribe(DEST_NOTIFICATIONS, Route::Notifications)?;
        channel.subscribe(DEST_UNREAD_COUNT, Route::UnreadCount)?;
        channel.send_json(
            &self.ctx.config.connect_destination,
            &ConnectAnnouncement {
                device: self.ctx.config.device.clone(),
                timestamp: Utc::now(),
            },
        )
    }

    /// Returns an error when the frame ends the live period.
    async fn handle_live_frame(&self, channel: &StompChannel, frame: Frame) -> Option<NotifyError> {
        match frame.command {
            Command::Message => {
                match channel.route_for(&frame) {
                    Some(Route::Notifications) => {
                        let _ = self.ctx.dispatcher.dispatch_notification(&frame.body).await;
                    }
                    Some(Route::UnreadCount) => {
                        let _ = self.ctx.dispatcher.dispatch_unread(&frame.body);
                    }
                    None => crate::log_debug!(
                        "MESSAGE for unknown destination {:?}",
                        frame.destination()
                    ),
                }
                None
            }
            Command::Error => Some(NotifyError::transport(format!(
                "server closed the session: {}",
                error_text(&frame)
            ))),
            Command::Disconnect => Some(NotifyError::transport("server sent DISCONNECT")),
            Command::Connected | Command::Receipt => None,
            other => {
                crate::log_debug!("Ignoring unexpected {} frame", other);
                None
            }
        }
    }
}
