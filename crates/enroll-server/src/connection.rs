//! Server-side handle to one client's outbound queue.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::Envelope;

/// Opaque id of an accepted connection, e.g. `conn_0190...`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of queueing one envelope for a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue full; the envelope was dropped for this client only.
    Full,
    /// Writer task is gone; the connection is dead.
    Closed,
}

/// A registered client as seen by the broadcast registry.
///
/// The registry never owns the socket; to drop a client it cancels
/// `close_signal`, and the session serving the socket ends itself.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    tx: mpsc::Sender<Arc<Envelope>>,
    close_signal: CancellationToken,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, tx: mpsc::Sender<Arc<Envelope>>) -> Self {
        Self {
            id,
            peer,
            tx,
            close_signal: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue an envelope for the writer task without waiting.
    pub fn send(&self, envelope: Arc<Envelope>) -> SendOutcome {
        match self.tx.try_send(envelope) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Queue an envelope, waiting for room. `false` once the writer is gone.
    pub async fn send_wait(&self, envelope: Arc<Envelope>) -> bool {
        self.tx.send(envelope).await.is_ok()
    }

    /// Total envelopes dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the owning session to end.
    pub fn disconnect(&self) {
        self.close_signal.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.close_signal.is_cancelled()
    }

    /// Resolves once [`ClientConnection::disconnect`] has been called.
    pub async fn disconnected(&self) {
        self.close_signal.cancelled().await;
    }
}
