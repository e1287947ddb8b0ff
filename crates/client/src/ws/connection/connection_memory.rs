//! In-process transport for tests and local harnesses.
//!
//! [`memory_transport`] returns a connector for the client and a server half that
//! accepts each opened connection as a [`MemoryPeer`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use notifier_shared::{Credential, Frame, NotifyError, HEARTBEAT_EOL};
use url::Url;

use super::{Connection, Connector};

#[derive(Default)]
struct Counters {
    attempts: AtomicUsize,
    refuse: AtomicBool,
    stall: AtomicBool,
}

/// Client half of the in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    peers: UnboundedSender<MemoryPeer>,
    counters: Arc<Counters>,
}

/// Server half: yields one [`MemoryPeer`] per successful `open`.
pub struct MemoryServer {
    peers: UnboundedReceiver<MemoryPeer>,
    counters: Arc<Counters>,
}

pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (tx, rx) = unbounded();
    let counters = Arc::new(Counters::default());
    (
        MemoryConnector {
            peers: tx,
            counters: counters.clone(),
        },
        MemoryServer {
            peers: rx,
            counters,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(
        &self,
        endpoint: &Url,
        credential: &Credential,
    ) -> Result<Connection, NotifyError> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if self.counters.refuse.load(Ordering::SeqCst) {
            return Err(NotifyError::transport(format!(
                "connection to {endpoint} refused"
            )));
        }
        if self.counters.stall.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let (client_tx, server_rx) = unbounded::<String>();
        let (server_tx, client_rx) = unbounded::<Result<String, NotifyError>>();
        let peer = MemoryPeer {
            token: credential.token().to_string(),
            incoming: server_rx,
            outgoing: server_tx,
            pending: VecDeque::new(),
        };
        self.peers
            .unbounded_send(peer)
            .map_err(|_| NotifyError::transport("memory server is gone"))?;

        Ok(Connection::new(client_tx, client_rx, Vec::new()))
    }
}

impl MemoryServer {
    /// Wait for the next connection the client opens.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.next().await
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    /// Make subsequent `open` calls fail with a transport error.
    pub fn refuse_connections(&self, refuse: bool) {
        self.counters.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent `open` calls hang forever, like an unresponsive host.
    pub fn stall_connections(&self, stall: bool) {
        self.counters.stall.store(stall, Ordering::SeqCst);
    }
}

/// Server side of one in-memory connection.
pub struct MemoryPeer {
    /// Token the client presented when opening.
    pub token: String,
    incoming: UnboundedReceiver<String>,
    outgoing: UnboundedSender<Result<String, NotifyError>>,
    pending: VecDeque<Frame>,
}

impl MemoryPeer {
    /// Next raw text from the client, heartbeats included. `None` once the client is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.incoming.next().await
    }

    /// Next frame from the client, skipping heartbeats.
    ///
    /// Undecodable client output is a bug in the client, so this panics on it.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            let text = self.recv_text().await?;
            let frames = Frame::decode_all(&text)
                .unwrap_or_else(|e| panic!("client sent undecodable text {text:?}: {e}"));
            self.pending.extend(frames);
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outgoing.unbounded_send(Ok(text.into())).is_ok()
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_text(frame.encode())
    }

    pub fn send_heartbeat(&self) -> bool {
        self.send_text(HEARTBEAT_EOL)
    }

    /// Inject a transport failure on the client's read side.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.outgoing
            .unbounded_send(Err(NotifyError::transport(reason.into())))
            .is_ok()
    }

    /// Close the connection from the server side.
    pub fn close(self) {}
}
