//! Subscription protocol layer: STOMP over a [`Connection`].

use std::collections::BTreeMap;
use std::sync::Arc;

use notifier_shared::{
    AuthMessage, Command, Credential, Frame, NotifyError, ACCEPT_VERSION, DEST_AUTH,
    HEARTBEAT_EOL,
};
use serde::Serialize;

use super::connection::Connection;
use crate::config::AuthMode;
use crate::logging::{Direction, FrameTap};

/// Where MESSAGE frames of a subscription are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Notifications,
    UnreadCount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    pub route: Route,
}

/// Active subscriptions of one connection, unique per destination.
#[derive(Debug, Default)]
pub struct Subscriptions {
    next_id: u64,
    by_id: BTreeMap<String, Subscription>,
}

impl Subscriptions {
    /// Register a destination. Returns `None` if it is already subscribed.
    pub fn add(&mut self, destination: &str, route: Route) -> Option<Subscription> {
        if self.by_id.values().any(|s| s.destination == destination) {
            return None;
        }
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        let sub = Subscription {
            id: id.clone(),
            destination: destination.to_string(),
            route,
        };
        self.by_id.insert(id, sub.clone());
        Some(sub)
    }

    /// Route for an inbound MESSAGE, by `subscription` header then by destination.
    pub fn route_for(&self, frame: &Frame) -> Option<Route> {
        if let Some(sub) = frame.get("subscription").and_then(|id| self.by_id.get(id)) {
            return Some(sub.route);
        }
        let destination = frame.destination()?;
        self.by_id
            .values()
            .find(|s| s.destination == destination)
            .map(|s| s.route)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn destinations(&self) -> Vec<String> {
        self.by_id.values().map(|s| s.destination.clone()).collect()
    }

    fn drain(&mut self) -> Vec<Subscription> {
        std::mem::take(&mut self.by_id).into_values().collect()
    }
}

/// Counts heartbeat intervals without any inbound data.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    limit: u32,
    missed: u32,
    seen: bool,
}

impl HeartbeatMonitor {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            missed: 0,
            seen: false,
        }
    }

    /// Any inbound text counts, frames and bare EOLs alike.
    pub fn on_inbound(&mut self) {
        self.seen = true;
    }

    /// Called once per interval. Returns true when the connection should be considered dead.
    pub fn on_interval(&mut self) -> bool {
        if std::mem::take(&mut self.seen) {
            self.missed = 0;
        } else {
            self.missed += 1;
        }
        self.missed >= self.limit
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }
}

/// One STOMP session over one transport connection.
pub struct StompChannel {
    connection: Connection,
    tap: Option<Arc<dyn FrameTap>>,
    subscriptions: Subscriptions,
    heartbeat: HeartbeatMonitor,
}

impl StompChannel {
    pub fn new(connection: Connection, tap: Option<Arc<dyn FrameTap>>, missed_limit: u32) -> Self {
        Self {
            connection,
            tap,
            subscriptions: Subscriptions::default(),
            heartbeat: HeartbeatMonitor::new(missed_limit),
        }
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<(), NotifyError> {
        if let Some(tap) = &self.tap {
            tap.on_frame(Direction::Outbound, frame);
        }
        self.connection.send(frame.encode())
    }

    pub fn send_heartbeat(&self) -> Result<(), NotifyError> {
        if let Some(tap) = &self.tap {
            tap.on_heartbeat(Direction::Outbound);
        }
        self.connection.send(HEARTBEAT_EOL.to_string())
    }

    /// Send CONNECT, plus the auth message when `mode` is [`AuthMode::Message`].
    pub fn connect(
        &self,
        credential: &Credential,
        mode: AuthMode,
        host: &str,
        heartbeat_ms: u64,
    ) -> Result<(), NotifyError> {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{heartbeat_ms},{heartbeat_ms}"));
        frame = match mode {
            AuthMode::Header => frame.header("Authorization", credential.bearer()),
            AuthMode::LoginPasscode => frame
                .header("login", credential.token())
                .header("passcode", credential.token()),
            AuthMode::Message => frame,
        };
        self.send_frame(&frame)?;

        if mode == AuthMode::Message {
            self.send_json(
                DEST_AUTH,
                &AuthMessage {
                    token: credential.token().to_string(),
                },
            )?;
        }
        Ok(())
    }

    pub fn subscribe(&mut self, destination: &str, route: Route) -> Result<(), NotifyError> {
        let Some(sub) = self.subscriptions.add(destination, route) else {
            crate::log_debug!("Already subscribed to {}", destination);
            return Ok(());
        };
        self.send_frame(
            &Frame::new(Command::Subscribe)
                .header("id", sub.id)
                .header("destination", sub.destination)
                .header("ack", "auto"),
        )
    }

    pub fn send_json<T: Serialize>(&self, destination: &str, body: &T) -> Result<(), NotifyError> {
        let json = serde_json::to_string(body)
            .map_err(|e| NotifyError::protocol(format!("serialize body for {destination}: {e}")))?;
        self.send_raw(destination, json)
    }

    /// SEND with a body that is already JSON text.
    pub fn send_raw(&self, destination: &str, json: String) -> Result<(), NotifyError> {
        self.send_frame(
            &Frame::new(Command::Send)
                .header("destination", destination)
                .json_body(json),
        )
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn route_for(&self, frame: &Frame) -> Option<Route> {
        self.subscriptions.route_for(frame)
    }

    /// Frames from the next inbound transport message.
    ///
    /// Transport failures are returned. Malformed frames are logged and dropped one by
    /// one; well-formed frames sharing the message are still returned.
    pub async fn next_frames(&mut self) -> Result<Vec<Frame>, NotifyError> {
        let text = self.connection.recv().await?;
        self.heartbeat.on_inbound();
        let (frames, errors) = Frame::decode_each(&text);
        for err in &errors {
            crate::log_warn!("Dropping malformed frame: {}", err);
        }
        if let Some(tap) = &self.tap {
            if frames.is_empty() && errors.is_empty() {
                tap.on_heartbeat(Direction::Inbound);
            }
            for frame in &frames {
                tap.on_frame(Direction::Inbound, frame);
            }
        }
        Ok(frames)
    }

    /// Wait for CONNECTED. An ERROR frame here is an authentication rejection.
    pub async fn await_connected(&mut self) -> Result<(), NotifyError> {
        loop {
            for frame in self.next_frames().await? {
                match frame.command {
                    Command::Connected => {
                        crate::log_debug!(
                            "CONNECTED version={} heart-beat={}",
                            frame.get("version").unwrap_or("1.0"),
                            frame.get("heart-beat").unwrap_or("0,0")
                        );
                        return Ok(());
                    }
                    Command::Error => return Err(NotifyError::auth(error_text(&frame))),
                    other => crate::log_debug!("Ignoring {} before CONNECTED", other),
                }
            }
        }
    }

    /// One heartbeat interval elapsed. True when the server has gone silent too long.
    pub fn heartbeat_expired(&mut self) -> bool {
        self.heartbeat.on_interval()
    }

    /// Best-effort UNSUBSCRIBE of everything and DISCONNECT, then close the transport.
    pub fn shutdown(mut self) {
        for sub in self.subscriptions.drain() {
            let _ = self.send_frame(&Frame::new(Command::Unsubscribe).header("id", sub.id));
        }
        let _ = self.send_frame(&Frame::new(Command::Disconnect));
        self.connection.close();
    }
}

/// Human-readable reason from an ERROR frame.
pub fn error_text(frame: &Frame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(msg), "") => msg.to_string(),
        (Some(msg), body) => format!("{msg}: {body}"),
        (None, "") => "server sent ERROR".to_string(),
        (None, body) => body.to_string(),
    }
}
