//! Sessions and the pluggable session manager.
//!
//! The server owns session lifecycle; persistence is delegated to a
//! [`SessionManager`] implemented by the application. An in-memory manager
//! is provided as the default.

use crate::error::ServerError;
use async_trait::async_trait;
use sockwire_protocol::{SessionInfo, SessionRecord};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A live session bound to one or more connections.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque server-generated key.
    pub key: String,
    /// Creation time.
    pub creation: SystemTime,
    /// Time of the most recent lookup.
    pub last_lookup: SystemTime,
    /// Application-defined info.
    pub info: SessionInfo,
}

impl Session {
    /// Creates a fresh session with both timestamps set to now.
    pub fn new(key: String, info: SessionInfo) -> Self {
        let now = SystemTime::now();
        Self {
            key,
            creation: now,
            last_lookup: now,
            info,
        }
    }

    /// The wire representation of this session.
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            key: self.key.clone(),
            creation_ms: unix_ms(self.creation),
            last_lookup_ms: unix_ms(self.last_lookup),
            info: self.info.clone(),
        }
    }
}

pub(crate) fn unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Result of a successful session lookup.
#[derive(Debug, Clone)]
pub struct SessionLookup {
    pub creation: SystemTime,
    pub last_lookup: SystemTime,
    pub info: SessionInfo,
}

/// Pluggable session store.
#[async_trait]
pub trait SessionManager: Send + Sync + 'static {
    /// Persists a newly created session.
    async fn on_session_created(&self, session: &Session) -> Result<(), ServerError>;

    /// Loads a session by key; `Ok(None)` means not found.
    async fn on_session_lookup(&self, key: &str) -> Result<Option<SessionLookup>, ServerError>;

    /// Deletes a session.
    async fn on_session_closed(&self, key: &str) -> Result<(), ServerError>;

    /// Generates a fresh session key.
    fn generate_session_key(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Session manager keeping everything in process memory.
///
/// Sessions survive disconnects but not server restarts.
#[derive(Default)]
pub struct InMemorySessionManager {
    sessions: Mutex<HashMap<String, SessionLookup>>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn on_session_created(&self, session: &Session) -> Result<(), ServerError> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .insert(
                session.key.clone(),
                SessionLookup {
                    creation: session.creation,
                    last_lookup: session.last_lookup,
                    info: session.info.clone(),
                },
            );
        Ok(())
    }

    async fn on_session_lookup(&self, key: &str) -> Result<Option<SessionLookup>, ServerError> {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        match sessions.get_mut(key) {
            Some(stored) => {
                let found = stored.clone();
                stored.last_lookup = SystemTime::now();
                Ok(Some(found))
            }
            None => Ok(None),
        }
    }

    async fn on_session_closed(&self, key: &str) -> Result<(), ServerError> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_create_lookup_close() {
        let manager = InMemorySessionManager::new();
        let session = Session::new("k-1".to_string(), SessionInfo::new());

        manager.on_session_created(&session).await.unwrap();
        assert_eq!(manager.len(), 1);

        let found = manager.on_session_lookup("k-1").await.unwrap().unwrap();
        assert_eq!(found.creation, session.creation);

        manager.on_session_closed("k-1").await.unwrap();
        assert!(manager.on_session_lookup("k-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_unknown_key_is_none() {
        let manager = InMemorySessionManager::new();
        assert!(manager
            .on_session_lookup("does-not-exist")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_bumps_last_lookup() {
        let manager = InMemorySessionManager::new();
        let session = Session::new("k-2".to_string(), SessionInfo::new());
        manager.on_session_created(&session).await.unwrap();

        let first = manager.on_session_lookup("k-2").await.unwrap().unwrap();
        let second = manager.on_session_lookup("k-2").await.unwrap().unwrap();
        assert!(second.last_lookup >= first.last_lookup);
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let manager = InMemorySessionManager::new();
        let a = manager.generate_session_key();
        let b = manager.generate_session_key();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_session_record_conversion() {
        let mut info = SessionInfo::new();
        info.insert("role".to_string(), "admin".into());
        let session = Session::new("k-3".to_string(), info.clone());

        let record = session.record();
        assert_eq!(record.key, "k-3");
        assert_eq!(record.info, info);
        assert!(record.creation_ms > 0);
        assert_eq!(record.creation_ms, record.last_lookup_ms);
    }
}
