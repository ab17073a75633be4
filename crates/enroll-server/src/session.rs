//! One accepted connection: read loop, dispatch, and a writer task that owns
//! the socket's write half.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastRegistry;
use crate::codec::{Envelope, EnvelopeCodec, FramingError};
use crate::connection::{ClientConnection, ConnectionId};
use crate::handlers::{HandlerOutcome, HandlerState};
use crate::protocol::message_type as mt;
use crate::protocol::{ProtocolError, Reply, Request};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connected = 0,
    Serving = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Serving,
            _ => Self::Closed,
        }
    }
}

/// How long a closing session keeps flushing queued envelopes to a peer
/// that is not reading.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a session stopped.
#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    Framing(FramingError),
    WriterStopped,
    Shutdown,
    /// The registry dropped the client for falling too far behind.
    Evicted,
}

/// Everything a session shares with the listener and other sessions.
#[derive(Clone)]
pub struct SessionContext {
    pub handlers: Arc<HandlerState>,
    pub registry: Arc<BroadcastRegistry>,
    pub codec: EnvelopeCodec,
    pub send_queue_len: usize,
    pub shutdown: CancellationToken,
}

pub struct Session {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    ctx: SessionContext,
    state: AtomicU8,
    closed: AtomicBool,
}

impl Session {
    pub fn new(peer: Option<SocketAddr>, ctx: SessionContext) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            ctx,
            state: AtomicU8::new(SessionState::Connected as u8),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Serve the connection until the peer leaves, a frame is bad, the writer
    /// fails, the registry evicts it, or the server shuts down.
    pub async fn run(&self, stream: TcpStream) -> CloseReason {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.ctx.send_queue_len.max(1));

        let writer_sink = FramedWrite::new(write_half, self.ctx.codec.clone());
        let mut writer = tokio::spawn(write_loop(writer_sink, rx, self.id.clone()));

        let conn = Arc::new(ClientConnection::new(self.id.clone(), self.peer, tx));
        self.ctx.registry.register(Arc::clone(&conn)).await;
        self.set_state(SessionState::Serving);
        info!(conn_id = %self.id, peer = ?self.peer, "client connected");

        let mut reader = FramedRead::new(read_half, self.ctx.codec.clone());
        let mut writer_finished = false;
        let reason = loop {
            tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break CloseReason::Shutdown,
                () = conn.disconnected() => break CloseReason::Evicted,
                _ = &mut writer => {
                    writer_finished = true;
                    break CloseReason::WriterStopped;
                }
                frame = reader.next() => match frame {
                    None => break CloseReason::PeerClosed,
                    Some(Err(e)) => break CloseReason::Framing(e),
                    Some(Ok(envelope)) => self.dispatch(envelope, &conn).await,
                },
            }
        };

        self.close().await;
        drop(conn);
        if !writer_finished {
            match &reason {
                CloseReason::Shutdown | CloseReason::Evicted => writer.abort(),
                _ => {
                    // Queue sender is gone once the registry lets go; the
                    // writer flushes what is left and exits.
                    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
                        debug!(conn_id = %self.id, "peer not reading, dropping unsent envelopes");
                        writer.abort();
                    }
                }
            }
        }

        match &reason {
            CloseReason::PeerClosed => info!(conn_id = %self.id, "client disconnected"),
            CloseReason::Shutdown => debug!(conn_id = %self.id, "session stopped for shutdown"),
            CloseReason::WriterStopped => warn!(conn_id = %self.id, "write side failed, closing session"),
            CloseReason::Framing(e) => warn!(conn_id = %self.id, error = %e, "bad frame, closing session"),
            CloseReason::Evicted => warn!(conn_id = %self.id, "client evicted for falling behind"),
        }
        reason
    }

    async fn dispatch(&self, envelope: Envelope, conn: &ClientConnection) {
        debug!(conn_id = %self.id, message_type = %envelope.message_type, "request received");

        let outcome = match Request::decode(&envelope) {
            Ok(request) => self.ctx.handlers.handle(request),
            Err(ProtocolError::UnknownType(kind)) => {
                warn!(conn_id = %self.id, message_type = %kind, "unknown message type, ignoring");
                return;
            }
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "rejecting request");
                HandlerOutcome::error(e.to_string())
            }
        };

        if let Some(reply) = outcome.reply {
            let envelope = match reply.to_envelope() {
                Ok(env) => env,
                Err(e) => {
                    error!(conn_id = %self.id, error = %e, "failed to encode reply");
                    match Reply::Error(e.to_string()).to_envelope() {
                        Ok(env) => env,
                        Err(_) => return,
                    }
                }
            };
            // A peer that stops reading must not pin the session past
            // shutdown or eviction.
            tokio::select! {
                sent = conn.send_wait(Arc::new(envelope)) => if !sent {
                    debug!(conn_id = %self.id, "reply dropped, writer gone");
                },
                () = self.ctx.shutdown.cancelled() => {
                    debug!(conn_id = %self.id, "reply abandoned, server shutting down");
                    return;
                }
                () = conn.disconnected() => {
                    debug!(conn_id = %self.id, "reply abandoned, client evicted");
                    return;
                }
            }
        }

        if outcome.broadcast {
            let _ = self.ctx.registry.broadcast_all(&Envelope::empty(mt::UPDATE)).await;
        }
    }

    /// Leave the registry. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(SessionState::Closed);
        let _ = self.ctx.registry.unregister(&self.id).await;
    }
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
    mut rx: mpsc::Receiver<Arc<Envelope>>,
    id: ConnectionId,
) {
    while let Some(envelope) = rx.recv().await {
        if let Err(e) = sink.send(envelope.as_ref()).await {
            debug!(conn_id = %id, error = %e, "write failed");
            return;
        }
    }
    let _ = SinkExt::<&Envelope>::close(&mut sink).await;
}
