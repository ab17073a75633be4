//! Fan-out of envelopes to every live client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::codec::Envelope;
use crate::connection::{ClientConnection, ConnectionId, SendOutcome};

/// Lifetime drops after which a slow client is disconnected.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Live outbound channels keyed by connection id.
pub struct BroadcastRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    active_count: AtomicUsize,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    pub async fn register(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a connection. Returns whether it was registered.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(id).is_some();
        if removed {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Deliver to every registered connection, the sender included. Returns
    /// the number of connections the envelope was queued for.
    ///
    /// Closed connections are removed and slow ones disconnected once they pass
    /// [`MAX_TOTAL_DROPS`]; neither stops delivery to the rest. An evicted
    /// connection is told to disconnect so its session ends too.
    pub async fn broadcast_all(&self, envelope: &Envelope) -> usize {
        let envelope = Arc::new(envelope.clone());
        let snapshot: Vec<Arc<ClientConnection>> =
            self.connections.read().await.values().cloned().collect();

        let mut delivered = 0;
        let mut to_remove: Vec<&Arc<ClientConnection>> = Vec::new();
        for conn in &snapshot {
            if conn.is_disconnected() {
                continue;
            }
            match conn.send(Arc::clone(&envelope)) {
                SendOutcome::Queued => delivered += 1,
                SendOutcome::Closed => {
                    warn!(conn_id = %conn.id, message_type = %envelope.message_type, "broadcast to closed client, removing");
                    to_remove.push(conn);
                }
                SendOutcome::Full => {
                    let drops = conn.drop_count();
                    if drops >= MAX_TOTAL_DROPS {
                        warn!(conn_id = %conn.id, peer = ?conn.peer, drops, "disconnecting slow client");
                        to_remove.push(conn);
                    } else {
                        warn!(conn_id = %conn.id, total_drops = drops, "client queue full, message dropped");
                    }
                }
            }
        }

        debug!(
            message_type = %envelope.message_type,
            recipients = snapshot.len(),
            delivered,
            "broadcast"
        );

        if !to_remove.is_empty() {
            let mut conns = self.connections.write().await;
            for conn in to_remove {
                conn.disconnect();
                if conns.remove(&conn.id).is_some() {
                    let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}
