//! TCP listener: accepts connections and runs one [`Session`] per socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use enroll_store::Database;

use crate::broadcast::BroadcastRegistry;
use crate::codec::EnvelopeCodec;
use crate::config::ServerConfig;
use crate::handlers::HandlerState;
use crate::session::{Session, SessionContext};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct EnrollServer {
    config: ServerConfig,
    handlers: Arc<HandlerState>,
    registry: Arc<BroadcastRegistry>,
}

impl EnrollServer {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        Self {
            config,
            handlers: Arc::new(HandlerState::new(db)),
            registry: Arc::new(BroadcastRegistry::new()),
        }
    }

    /// Bind and start accepting in the background.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        info!(%local_addr, "enrollment server listening");

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let ctx = SessionContext {
            handlers: self.handlers,
            registry: Arc::clone(&self.registry),
            codec: EnvelopeCodec::new(self.config.max_frame_length),
            send_queue_len: self.config.send_queue_len,
            shutdown: shutdown.clone(),
        };

        let _ = tracker.spawn(accept_loop(listener, ctx, tracker.clone()));

        Ok(ServerHandle {
            local_addr,
            registry: self.registry,
            shutdown,
            tracker,
        })
    }
}

async fn accept_loop(listener: TcpListener, ctx: SessionContext, tracker: TaskTracker) {
    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    let session = Session::new(Some(peer), ctx.clone());
                    let _ = tracker.spawn(async move {
                        let _ = session.run(stream).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    info!("listener stopped");
}

/// Running server. Dropping the handle leaves the server running; call
/// [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<BroadcastRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Stop accepting, end every session, and wait for their tasks. Sessions
    /// blocked on a peer that stopped reading are cut off rather than drained.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.tracker.close();
        self.tracker.wait().await;
        info!(remaining = self.registry.connection_count(), "server stopped");
    }
}
