//! Transport session: one duplex WebSocket-style connection carrying text frames.
//!
//! The transport never retries. Any I/O failure surfaces as
//! [`NotifyError::Transport`] and the session state machine decides what to do next.

use async_trait::async_trait;
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use notifier_shared::{Credential, NotifyError};
use tokio::task::JoinHandle;
use url::Url;

mod connection_memory;
mod connection_native;

pub use connection_memory::{memory_transport, MemoryConnector, MemoryPeer, MemoryServer};
pub use connection_native::TungsteniteConnector;

/// Opens transport connections. Implementations must not retry.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &Url, credential: &Credential)
        -> Result<Connection, NotifyError>;
}

/// An open connection. Dropping it abandons any in-flight reads.
pub struct Connection {
    outbound: UnboundedSender<String>,
    inbound: UnboundedReceiver<Result<String, NotifyError>>,
    /// Tasks aborted on drop.
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(
        outbound: UnboundedSender<String>,
        inbound: UnboundedReceiver<Result<String, NotifyError>>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks,
        }
    }

    /// Queue one text message for sending.
    pub fn send(&self, text: String) -> Result<(), NotifyError> {
        self.outbound
            .unbounded_send(text)
            .map_err(|_| NotifyError::transport("connection writer has shut down"))
    }

    /// Next inbound text message. A peer close is reported as a transport error.
    pub async fn recv(&mut self) -> Result<String, NotifyError> {
        match self.inbound.next().await {
            Some(result) => result,
            None => Err(NotifyError::transport("connection closed by peer")),
        }
    }

    /// Stop accepting outbound messages; whatever is already queued is still flushed.
    pub fn close(self) {
        self.outbound.close_channel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
