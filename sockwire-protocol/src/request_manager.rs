//! In-flight request registry.
//!
//! Maps 8-byte identifiers to reply waiters. Removal and delivery are a
//! single atomic transition (removing the entry yields the only sender),
//! which makes double fulfillment impossible.

use crate::message::MessageId;
use crate::payload::Payload;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::oneshot;

/// Terminal failure delivered to a reply waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestFailure {
    #[error("request timed out")]
    Timeout,
    #[error("request canceled")]
    Canceled,
    #[error("connection lost")]
    Disconnected,
    #[error("server is shutting down")]
    ServerShutdown,
    #[error("internal server error")]
    InternalServer,
    #[error("session not found")]
    SessionNotFound,
    #[error("sessions are disabled on this server")]
    SessionsDisabled,
    #[error("session connection limit reached")]
    MaxSessConnsReached,
}

impl From<crate::message::ErrorReplyKind> for RequestFailure {
    fn from(kind: crate::message::ErrorReplyKind) -> Self {
        use crate::message::ErrorReplyKind;
        match kind {
            ErrorReplyKind::Shutdown => RequestFailure::ServerShutdown,
            ErrorReplyKind::InternalError => RequestFailure::InternalServer,
            ErrorReplyKind::SessionNotFound => RequestFailure::SessionNotFound,
            ErrorReplyKind::MaxSessConnsReached => RequestFailure::MaxSessConnsReached,
            ErrorReplyKind::SessionsDisabled => RequestFailure::SessionsDisabled,
        }
    }
}

type ReplySender = oneshot::Sender<Result<Payload, RequestFailure>>;

struct Inner {
    pending: Mutex<HashMap<MessageId, ReplySender>>,
    next_id: AtomicU64,
}

/// Thread-safe registry of pending requests.
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<Inner>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new pending request under a fresh identifier.
    ///
    /// Identifiers come from a monotonic counter; a collision against the
    /// live set (only possible after wrap-around) retries with the next
    /// counter value.
    pub fn register(&self) -> ReplyWaiter {
        loop {
            let seq = self.inner.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            let id = MessageId::from_u64(seq);
            let (tx, rx) = oneshot::channel();
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            if pending.contains_key(&id) {
                continue;
            }
            pending.insert(id, tx);
            return ReplyWaiter {
                id,
                rx,
                manager: Arc::downgrade(&self.inner),
                done: false,
            };
        }
    }

    /// Delivers a reply to the pending request with the given identifier.
    ///
    /// Returns false (after a warning) when the identifier is unknown,
    /// which happens for replies arriving after a timeout or cancellation.
    pub fn fulfill(&self, id: MessageId, payload: Payload) -> bool {
        match self.remove(id) {
            Some(tx) => {
                let _ = tx.send(Ok(payload));
                true
            }
            None => {
                tracing::warn!("dropping reply for unknown request {}", id);
                false
            }
        }
    }

    /// Fails the pending request with the given identifier.
    pub fn fail(&self, id: MessageId, failure: RequestFailure) -> bool {
        match self.remove(id) {
            Some(tx) => {
                let _ = tx.send(Err(failure));
                true
            }
            None => {
                tracing::warn!("dropping failure {:?} for unknown request {}", failure, id);
                false
            }
        }
    }

    /// Fails every pending request; used on connection closure and shutdown.
    pub fn fail_all(&self, failure: RequestFailure) {
        let drained: Vec<ReplySender> = {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(failure));
        }
    }

    /// Snapshot of the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().expect("pending lock poisoned").len()
    }

    fn remove(&self, id: MessageId) -> Option<ReplySender> {
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id)
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle a request sender blocks on until the reply arrives or the
/// request fails.
///
/// Dropping an unresolved waiter (caller-side cancellation) removes the
/// pending entry; a reply arriving afterwards is dropped with a warning.
pub struct ReplyWaiter {
    id: MessageId,
    rx: oneshot::Receiver<Result<Payload, RequestFailure>>,
    manager: Weak<Inner>,
    done: bool,
}

impl ReplyWaiter {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Awaits resolution of the request.
    pub async fn wait(mut self) -> Result<Payload, RequestFailure> {
        let result = (&mut self.rx)
            .await
            .unwrap_or(Err(RequestFailure::Disconnected));
        self.done = true;
        result
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(inner) = self.manager.upgrade() {
            inner
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_fulfill_delivers_payload() {
        let manager = RequestManager::new();
        let waiter = manager.register();
        let id = waiter.id();

        assert!(manager.fulfill(id, Payload::binary(&b"reply"[..])));
        let payload = waiter.wait().await.unwrap();
        assert_eq!(payload.data, Bytes::from_static(b"reply"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_delivers_failure() {
        let manager = RequestManager::new();
        let waiter = manager.register();
        let id = waiter.id();

        assert!(manager.fail(id, RequestFailure::Timeout));
        assert_eq!(waiter.wait().await.unwrap_err(), RequestFailure::Timeout);
    }

    #[tokio::test]
    async fn test_at_most_once_completion() {
        let manager = RequestManager::new();
        let waiter = manager.register();
        let id = waiter.id();

        assert!(manager.fulfill(id, Payload::default()));
        // Second completion attempt is a no-op.
        assert!(!manager.fulfill(id, Payload::default()));
        assert!(!manager.fail(id, RequestFailure::Timeout));

        assert!(waiter.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_all_drains_every_entry() {
        let manager = RequestManager::new();
        let waiters: Vec<_> = (0..10).map(|_| manager.register()).collect();
        assert_eq!(manager.pending_count(), 10);

        manager.fail_all(RequestFailure::Disconnected);
        assert_eq!(manager.pending_count(), 0);

        for waiter in waiters {
            assert_eq!(
                waiter.wait().await.unwrap_err(),
                RequestFailure::Disconnected
            );
        }
    }

    #[tokio::test]
    async fn test_identifiers_unique_across_concurrent_registers() {
        let manager = RequestManager::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                (0..100)
                    .map(|_| {
                        let waiter = manager.register();
                        let id = waiter.id();
                        // Keep entries alive for the duration of the test.
                        std::mem::forget(waiter);
                        id
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut all = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all.insert(id), "duplicate identifier generated");
            }
        }
        assert_eq!(manager.pending_count(), 800);
    }

    #[tokio::test]
    async fn test_dropping_waiter_removes_pending_entry() {
        let manager = RequestManager::new();
        let waiter = manager.register();
        let id = waiter.id();
        drop(waiter);

        assert_eq!(manager.pending_count(), 0);
        // A late reply is dropped, not delivered.
        assert!(!manager.fulfill(id, Payload::default()));
    }
}
