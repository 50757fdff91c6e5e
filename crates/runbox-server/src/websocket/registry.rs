//! Set of live connections shared by every session and the keepalive
//! scheduler.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use runbox_core::ConnectionId;
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::ClientConnection;

/// Tracks connections between "connected" and "fully closed".
///
/// `for_each` works on a snapshot taken under the read lock, so callbacks
/// never run while the lock is held and concurrent register/deregister
/// calls are never blocked by a scan.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    ///
    /// Returns `false` and leaves the registry unchanged if a connection
    /// with the same ID is already registered.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write().await;
        match conns.entry(connection.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection by ID. Returns `false` if it was not registered.
    pub async fn deregister(&self, connection_id: &ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        conns.remove(connection_id).is_some()
    }

    /// Call `action` once for every open connection present when the scan
    /// started. Returns the number of connections visited.
    ///
    /// Connections that stopped being open after the snapshot are skipped.
    pub async fn for_each<F>(&self, mut action: F) -> usize
    where
        F: FnMut(&Arc<ClientConnection>),
    {
        let snapshot: Vec<Arc<ClientConnection>> =
            self.connections.read().await.values().cloned().collect();
        let mut visited = 0;
        for conn in &snapshot {
            if !conn.is_open() {
                debug!(conn_id = %conn.id, "skipping connection that closed mid-scan");
                continue;
            }
            action(conn);
            visited += 1;
        }
        visited
    }

    /// Whether a connection is registered.
    pub async fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}
