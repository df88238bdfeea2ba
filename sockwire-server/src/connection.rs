//! Per-connection state: activity phase, session binding and write
//! serialization.

use crate::error::ServerError;
use crate::hooks::ConnectionOptions;
use crate::server::ServerInner;
use crate::session::Session;
use crate::stream::ServerStream;
use bytes::Bytes;
use sockwire_protocol::{codec, framing, Payload};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::io::WriteHalf;
use tokio::sync::{Mutex, Semaphore};

/// Connection lifecycle phase. Transitions are one-way:
/// `Active -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Active,
    Closing,
    Closed,
}

const PHASE_ACTIVE: u8 = 0;
const PHASE_CLOSING: u8 = 1;
const PHASE_CLOSED: u8 = 2;

/// One accepted connection.
///
/// Holds the writing half of the socket behind a mutex so no two tasks ever
/// interleave frames, and the session binding behind a read/write lock. The
/// server is referenced weakly; the server owns its connections, not the
/// other way around.
pub struct Connection {
    id: u64,
    remote_addr: SocketAddr,
    options: ConnectionOptions,
    phase: AtomicU8,
    session: RwLock<Option<Arc<Session>>>,
    writer: Mutex<Option<WriteHalf<ServerStream>>>,
    handler_permits: Option<Arc<Semaphore>>,
    server: Weak<ServerInner>,
    write_timeout: Duration,
    max_frame_size: u32,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        remote_addr: SocketAddr,
        options: ConnectionOptions,
        writer: WriteHalf<ServerStream>,
        server: Weak<ServerInner>,
        write_timeout: Duration,
        max_frame_size: u32,
    ) -> Self {
        let handler_permits = match options.concurrency_limit {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };
        Self {
            id,
            remote_addr,
            options,
            phase: AtomicU8::new(PHASE_ACTIVE),
            session: RwLock::new(None),
            writer: Mutex::new(Some(writer)),
            handler_permits,
            server,
            write_timeout,
            max_frame_size,
        }
    }

    /// Internal connection handle, unique per server instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// User agent attributed to this connection by the accept hook.
    pub fn user_agent(&self) -> &Bytes {
        &self.options.user_agent
    }

    pub fn phase(&self) -> ConnectionPhase {
        match self.phase.load(Ordering::Acquire) {
            PHASE_ACTIVE => ConnectionPhase::Active,
            PHASE_CLOSING => ConnectionPhase::Closing,
            _ => ConnectionPhase::Closed,
        }
    }

    /// Whether the connection still accepts traffic.
    pub fn is_active(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_ACTIVE
    }

    pub(crate) fn handler_permits(&self) -> Option<Arc<Semaphore>> {
        self.handler_permits.clone()
    }

    /// Sends a fire-and-forget signal to the peer.
    pub async fn signal(&self, name: &str, payload: Payload) -> Result<(), ServerError> {
        let frame = codec::encode_signal(name.as_bytes(), &payload)?;
        self.write_frame(&frame).await
    }

    /// Creates a session, binds it to this connection and notifies the
    /// client.
    ///
    /// Fails with [`ServerError::SessionAlreadyExists`] when a session is
    /// already bound; a handler must close the current session first.
    pub async fn create_session(
        self: &Arc<Self>,
        info: sockwire_protocol::SessionInfo,
    ) -> Result<Arc<Session>, ServerError> {
        let server = self.server()?;
        if !server.sessions_enabled() {
            return Err(ServerError::SessionsDisabled);
        }
        if !self.is_active() {
            return Err(ServerError::NotActive);
        }
        if self.has_session() {
            return Err(ServerError::SessionAlreadyExists);
        }

        let key = server.session_manager().generate_session_key();
        let session = Arc::new(Session::new(key, info));
        server.session_manager().on_session_created(&session).await?;

        if !server.registry().register(&session.key, self) {
            return Err(ServerError::MaxSessConnsReached);
        }

        let lost_race = {
            let mut slot = self.session.write().expect("session lock poisoned");
            if slot.is_some() {
                true
            } else {
                *slot = Some(Arc::clone(&session));
                false
            }
        };
        if lost_race {
            // Lost a race against a concurrent create on this connection.
            server.registry().deregister(&session.key, self.id);
            let _ = server.session_manager().on_session_closed(&session.key).await;
            return Err(ServerError::SessionAlreadyExists);
        }

        let body = session.record().to_bytes()?;
        self.write_frame(&codec::encode_session_created(&body))
            .await?;
        tracing::debug!(
            "connection {}: session {} created",
            self.id,
            session.key
        );
        Ok(session)
    }

    /// Closes the currently bound session across every connection it is
    /// bound to. Does nothing when no session is bound.
    pub async fn close_session(self: &Arc<Self>) -> Result<(), ServerError> {
        let Some(key) = self.session_key() else {
            return Ok(());
        };
        self.server()?.close_session(&key).await
    }

    pub fn has_session(&self) -> bool {
        self.session
            .read()
            .expect("session lock poisoned")
            .is_some()
    }

    /// Snapshot of the bound session.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().expect("session lock poisoned").clone()
    }

    pub fn session_key(&self) -> Option<String> {
        self.session
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|s| s.key.clone())
    }

    pub(crate) fn bind_session(&self, session: Arc<Session>) {
        *self.session.write().expect("session lock poisoned") = Some(session);
    }

    pub(crate) fn clear_session(&self) -> Option<Arc<Session>> {
        self.session.write().expect("session lock poisoned").take()
    }

    /// Writes one frame under the write mutex, bounded by the write
    /// deadline.
    pub(crate) async fn write_frame(&self, frame: &[u8]) -> Result<(), ServerError> {
        if !self.is_active() {
            return Err(ServerError::NotActive);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::NotActive)?;
        match tokio::time::timeout(
            self.write_timeout,
            framing::write_frame(writer, frame, self.max_frame_size),
        )
        .await
        {
            Ok(result) => result.map_err(ServerError::from),
            Err(_) => Err(ServerError::WriteTimeout),
        }
    }

    /// Closes the connection: flips the phase, shuts the socket down and
    /// unbinds the session from the registry. The session itself survives
    /// in the session manager until explicitly closed.
    pub async fn close(&self) {
        if self
            .phase
            .compare_exchange(
                PHASE_ACTIVE,
                PHASE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            use tokio::io::AsyncWriteExt;
            let _ = writer.shutdown().await;
        }

        if let Some(session) = self.clear_session() {
            if let Some(server) = self.server.upgrade() {
                server.registry().deregister(&session.key, self.id);
            }
        }

        self.phase.store(PHASE_CLOSED, Ordering::Release);
    }

    fn server(&self) -> Result<Arc<ServerInner>, ServerError> {
        self.server.upgrade().ok_or(ServerError::ShuttingDown)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("phase", &self.phase())
            .field("session", &self.session_key())
            .finish()
    }
}
