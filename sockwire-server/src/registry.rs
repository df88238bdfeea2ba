//! Session registry: which connections a session is currently bound to.

use crate::connection::Connection;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Server-side map of session key to bound connections.
///
/// Reads (fan-out, counters) are common; writes happen on bind and unbind
/// only.
pub struct SessionRegistry {
    connections: RwLock<HashMap<String, Vec<Arc<Connection>>>>,
    /// Maximum connections simultaneously bound to one session,
    /// 0 = unlimited.
    max_conns: usize,
}

impl SessionRegistry {
    pub fn new(max_conns: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_conns,
        }
    }

    /// Binds a connection to a session key.
    ///
    /// Returns false when the session already has `max_conns` connections.
    pub fn register(&self, key: &str, connection: &Arc<Connection>) -> bool {
        let mut map = self.connections.write().expect("registry lock poisoned");
        let bound = map.entry(key.to_string()).or_default();
        if self.max_conns != 0 && bound.len() >= self.max_conns {
            return false;
        }
        bound.push(Arc::clone(connection));
        true
    }

    /// Unbinds a connection from a session key.
    ///
    /// Returns true when the session has no remaining connections.
    pub fn deregister(&self, key: &str, connection_id: u64) -> bool {
        let mut map = self.connections.write().expect("registry lock poisoned");
        let Some(bound) = map.get_mut(key) else {
            return false;
        };
        bound.retain(|c| c.id() != connection_id);
        if bound.is_empty() {
            map.remove(key);
            return true;
        }
        false
    }

    /// Snapshot of the connections bound to a session, for fan-out.
    pub fn session_connections(&self, key: &str) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Removes the session entirely and returns every bound connection.
    pub fn take_connections(&self, key: &str) -> Vec<Arc<Connection>> {
        self.connections
            .write()
            .expect("registry lock poisoned")
            .remove(key)
            .unwrap_or_default()
    }

    /// Number of sessions with at least one bound connection.
    pub fn active_sessions(&self) -> usize {
        self.connections
            .read()
            .expect("registry lock poisoned")
            .len()
    }

    /// Number of connections bound to a session.
    pub fn session_connection_count(&self, key: &str) -> usize {
        self.connections
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
