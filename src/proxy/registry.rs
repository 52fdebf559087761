//! Connection registry module
//!
//! Routes fresh sockets to live connections. A reconnecting or attaching
//! client identifies its session by the auth id from the relay packet, or
//! by account credentials when the auth id is unknown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::proxy::connection::ConnectionEvent;

/// Shared identity of one connection, visible to the accept path
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id
    pub id: u64,
    /// Account name this session logged in with
    pub username: String,
    /// Account password this session logged in with
    pub password: String,
    /// Auth id handed to clients via the rewritten relay
    auth_id: AtomicU32,
    /// Event channel into the connection task
    pub events: mpsc::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    /// Current auth id
    pub fn auth_id(&self) -> u32 {
        self.auth_id.load(Ordering::SeqCst)
    }

    /// Record the auth id observed in the server's relay
    pub fn set_auth_id(&self, auth_id: u32) {
        self.auth_id.store(auth_id, Ordering::SeqCst);
    }
}

/// Registry of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<ConnectionHandle>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a connection id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a new connection
    pub fn register(
        &self,
        id: u64,
        username: String,
        password: String,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle {
            id,
            username,
            password,
            auth_id: AtomicU32::new(0),
            events,
        });
        self.connections.lock().insert(id, handle.clone());
        info!(connection = id, username = %handle.username, "connection registered");
        handle
    }

    /// Drop a connection from the registry
    pub fn unregister(&self, id: u64) {
        if self.connections.lock().remove(&id).is_some() {
            debug!(connection = id, "connection unregistered");
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Find the session a game login belongs to
    ///
    /// The auth id is authoritative; credentials are the fallback for
    /// clients that reconnect with a stale or zero token.
    pub fn find_for_game_login(
        &self,
        auth_id: u32,
        username: &str,
        password: &str,
    ) -> Option<Arc<ConnectionHandle>> {
        let connections = self.connections.lock();
        if auth_id != 0 {
            if let Some(handle) = connections.values().find(|h| h.auth_id() == auth_id) {
                return Some(handle.clone());
            }
        }
        connections
            .values()
            .find(|h| h.username == username && h.password == password)
            .cloned()
    }

    /// Find a live session for these credentials
    pub fn find_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .lock()
            .values()
            .find(|h| h.username == username && h.password == password)
            .cloned()
    }
}
