//! Server core: accept loop, per-connection read loops and message
//! dispatch.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::hooks::ServerHandler;
use crate::registry::SessionRegistry;
use crate::session::{InMemorySessionManager, Session, SessionManager};
use crate::stream::ServerStream;
use bytes::Bytes;
use sockwire_protocol::{
    codec, framing, ErrorReplyKind, Message, MessageId, MessagePool, Payload, ServerConfiguration,
    MAX_FRAME_SIZE, MIN_BUFFER_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};
use tokio::io::ReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio_rustls::TlsAcceptor;

/// Runtime server options.
#[derive(Clone)]
pub struct ServerOptions {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Read deadline per frame; refreshed by every successful read,
    /// heartbeats included.
    pub read_timeout: Duration,
    /// Write deadline per frame.
    pub write_timeout: Duration,
    /// Heartbeat interval advertised to clients (zero disables heartbeats).
    pub heartbeat_interval: Duration,
    /// Whether sessions are available.
    pub sessions_enabled: bool,
    /// Maximum connections simultaneously bound to one session
    /// (0 = unlimited).
    pub max_session_connections: usize,
    /// Inbound buffer size hint advertised to clients.
    pub read_buffer_size: usize,
    /// Outbound buffer size hint advertised to clients.
    pub write_buffer_size: usize,
    /// Maximum accepted frame size.
    pub max_frame_size: u32,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("bind_addr", &self.bind_addr)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("sessions_enabled", &self.sessions_enabled)
            .field("max_session_connections", &self.max_session_connections)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], sockwire_protocol::DEFAULT_PORT)),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            sessions_enabled: true,
            max_session_connections: 0,
            read_buffer_size: MIN_BUFFER_SIZE,
            write_buffer_size: MIN_BUFFER_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
            tls_acceptor: None,
        }
    }
}

impl ServerOptions {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds runtime options from a loaded configuration file.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let tls_acceptor = if config.tls.enabled {
            Some(Arc::new(crate::tls::create_tls_acceptor(&config.tls)?))
        } else {
            None
        };
        Ok(Self {
            bind_addr: config.network.bind_addr,
            read_timeout: Duration::from_secs(config.network.read_timeout_secs),
            write_timeout: Duration::from_secs(config.network.write_timeout_secs),
            heartbeat_interval: Duration::from_secs(config.network.heartbeat_interval_secs),
            sessions_enabled: config.sessions.enabled,
            max_session_connections: config.sessions.max_connections_per_session,
            read_buffer_size: config.network.read_buffer_size,
            write_buffer_size: config.network.write_buffer_size,
            max_frame_size: MAX_FRAME_SIZE,
            tls_acceptor: None,
        }
        .with_tls_acceptor(tls_acceptor))
    }

    fn with_tls_acceptor(mut self, acceptor: Option<Arc<TlsAcceptor>>) -> Self {
        self.tls_acceptor = acceptor;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_sessions_enabled(mut self, enabled: bool) -> Self {
        self.sessions_enabled = enabled;
        self
    }

    pub fn with_max_session_connections(mut self, max: usize) -> Self {
        self.max_session_connections = max;
        self
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    /// Validates the options.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.read_buffer_size < MIN_BUFFER_SIZE {
            return Err(ServerError::InvalidOptions(format!(
                "read buffer size too small: {} bytes (min: {} bytes)",
                self.read_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.write_buffer_size < MIN_BUFFER_SIZE {
            return Err(ServerError::InvalidOptions(format!(
                "write buffer size too small: {} bytes (min: {} bytes)",
                self.write_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// The configuration message advertised to connecting clients.
    fn server_configuration(&self) -> ServerConfiguration {
        ServerConfiguration {
            version: PROTOCOL_VERSION.to_string(),
            read_buffer_size: self.read_buffer_size as u32,
            write_buffer_size: self.write_buffer_size as u32,
            heartbeat_interval_ms: self.heartbeat_interval.as_millis() as u64,
        }
    }
}

pub(crate) struct ServerInner {
    options: ServerOptions,
    handler: Arc<dyn ServerHandler>,
    session_manager: Arc<dyn SessionManager>,
    registry: SessionRegistry,
    connections: Mutex<Vec<Arc<Connection>>>,
    /// Pre-encoded configuration frame, cached at startup.
    conf_frame: Bytes,
    pool: MessagePool,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    next_conn_id: AtomicU64,
    local_addr: OnceLock<SocketAddr>,
    bound: Notify,
    running: AtomicBool,
}

impl ServerInner {
    pub(crate) fn sessions_enabled(&self) -> bool {
        self.options.sessions_enabled
    }

    pub(crate) fn session_manager(&self) -> &Arc<dyn SessionManager> {
        &self.session_manager
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Closes a session across every connection it is bound to: deletes it
    /// from the session manager, clears each binding and notifies each
    /// client.
    pub(crate) async fn close_session(&self, key: &str) -> Result<(), ServerError> {
        self.session_manager.on_session_closed(key).await?;

        for connection in self.registry.take_connections(key) {
            connection.clear_session();
            if let Err(e) = connection.write_frame(&codec::encode_session_closed()).await {
                tracing::warn!(
                    "connection {}: session-closed notification failed: {}",
                    connection.id(),
                    e
                );
            }
        }
        tracing::debug!("session {} closed", key);
        Ok(())
    }
}

/// The sockwire server.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Creates a server with the in-memory session manager.
    pub fn new(
        options: ServerOptions,
        handler: impl ServerHandler,
    ) -> Result<Self, ServerError> {
        Self::with_session_manager(options, handler, InMemorySessionManager::new())
    }

    /// Creates a server with an application-provided session manager.
    pub fn with_session_manager(
        options: ServerOptions,
        handler: impl ServerHandler,
        session_manager: impl SessionManager,
    ) -> Result<Self, ServerError> {
        options.validate()?;
        let conf_frame = codec::encode_server_configuration(&options.server_configuration())?
            .freeze();
        let (shutdown, _) = broadcast::channel(1);
        let registry = SessionRegistry::new(options.max_session_connections);
        Ok(Self {
            inner: Arc::new(ServerInner {
                options,
                handler: Arc::new(handler),
                session_manager: Arc::new(session_manager),
                registry,
                connections: Mutex::new(Vec::new()),
                conf_frame,
                pool: MessagePool::default(),
                shutdown,
                shutting_down: AtomicBool::new(false),
                next_conn_id: AtomicU64::new(0),
                local_addr: OnceLock::new(),
                bound: Notify::new(),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.inner.options.bind_addr).await?;
        let addr = listener.local_addr()?;
        let _ = self.inner.local_addr.set(addr);
        self.inner.bound.notify_waiters();
        self.inner.running.store(true, Ordering::SeqCst);

        let tls_mode = if self.inner.options.tls_acceptor.is_some() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!("server listening on {} ({})", addr, tls_mode);

        let mut shutdown_rx = self.inner.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, remote_addr)) => {
                            let inner = Arc::clone(&self.inner);
                            let shutdown_rx = self.inner.shutdown.subscribe();
                            tokio::spawn(async move {
                                handle_socket(inner, tcp_stream, remote_addr, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The bound address, available once [`Server::run`] has bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Waits until the listener is bound and returns its address.
    pub async fn bound_addr(&self) -> SocketAddr {
        loop {
            let notified = self.inner.bound.notified();
            if let Some(addr) = self.local_addr() {
                return addr;
            }
            notified.await;
        }
    }

    /// Initiates shutdown: stops accepting, closes every connection, fires
    /// `on_client_disconnected` once per connection and answers requests
    /// received meanwhile with a shutdown reply.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.inner.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .expect("connections lock poisoned")
            .len()
    }

    /// Number of sessions with at least one bound connection.
    pub fn active_sessions(&self) -> usize {
        self.inner.registry.active_sessions()
    }
}

async fn handle_socket(
    inner: Arc<ServerInner>,
    tcp_stream: TcpStream,
    remote_addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if inner.shutting_down.load(Ordering::SeqCst) {
        return;
    }

    let connection_options = inner.handler.on_before_accept(remote_addr);
    if !connection_options.accept {
        tracing::debug!("[{}] connection rejected by accept hook", remote_addr);
        return;
    }

    tcp_stream.set_nodelay(true).ok();

    let stream = match inner.options.tls_acceptor.as_deref() {
        Some(acceptor) => match acceptor.accept(tcp_stream).await {
            Ok(tls_stream) => ServerStream::Tls { stream: tls_stream },
            Err(e) => {
                tracing::warn!("[{}] TLS handshake failed: {}", remote_addr, e);
                return;
            }
        },
        None => ServerStream::Plain { stream: tcp_stream },
    };

    let (mut read_half, mut write_half) = tokio::io::split(stream);

    // The configuration message is written before anything is read; a
    // failure here abandons the socket without firing any hook.
    if let Err(e) =
        framing::write_frame(&mut write_half, &inner.conf_frame, inner.options.max_frame_size)
            .await
    {
        tracing::error!("[{}] could not write configuration message: {}", remote_addr, e);
        return;
    }

    let id = inner.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
    let connection = Arc::new(Connection::new(
        id,
        remote_addr,
        connection_options,
        write_half,
        Arc::downgrade(&inner),
        inner.options.write_timeout,
        inner.options.max_frame_size,
    ));

    inner
        .connections
        .lock()
        .expect("connections lock poisoned")
        .push(Arc::clone(&connection));
    inner.handler.on_client_connected(&connection).await;
    tracing::info!("[{}] client connected (connection {})", remote_addr, id);

    let disconnect_error =
        read_loop(&inner, &connection, &mut read_half, &mut shutdown_rx).await;

    if let Some(error) = &disconnect_error {
        if framing_abnormal(error) {
            tracing::warn!("[{}] abnormal closure: {}", remote_addr, error);
        } else {
            tracing::debug!("[{}] connection error: {}", remote_addr, error);
        }
    }

    connection.close().await;
    inner
        .handler
        .on_client_disconnected(&connection, disconnect_error.as_ref())
        .await;
    inner
        .connections
        .lock()
        .expect("connections lock poisoned")
        .retain(|c| c.id() != id);
    tracing::info!("[{}] client disconnected (connection {})", remote_addr, id);
}

fn framing_abnormal(error: &ServerError) -> bool {
    matches!(error, ServerError::Protocol(p) if framing::is_abnormal_close(p))
}

/// Reads frames until the connection dies; returns the terminating error,
/// if any.
async fn read_loop(
    inner: &Arc<ServerInner>,
    connection: &Arc<Connection>,
    reader: &mut ReadHalf<ServerStream>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Option<ServerError> {
    loop {
        let mut buf = inner.pool.get();
        if !connection.is_active() {
            buf.release();
            return None;
        }

        let read = tokio::select! {
            read = tokio::time::timeout(
                inner.options.read_timeout,
                framing::read_frame(reader, &mut buf, inner.options.max_frame_size),
            ) => Some(read),
            _ = shutdown_rx.recv() => None,
        };
        let Some(read) = read else {
            buf.release();
            return Some(ServerError::ShuttingDown);
        };

        match read {
            Err(_elapsed) => {
                buf.release();
                return Some(ServerError::ReadTimeout);
            }
            Ok(Ok(framing::ReadOutcome::Closed)) => {
                buf.release();
                return None;
            }
            Ok(Err(e)) => {
                buf.release();
                return Some(ServerError::Protocol(e));
            }
            Ok(Ok(framing::ReadOutcome::Frame)) => {
                let frame = Bytes::copy_from_slice(&buf[..]);
                buf.release();
                if let Err(e) = dispatch(inner, connection, frame) {
                    return Some(e);
                }
            }
        }
    }
}

/// Routes one parsed frame. Parse failures are fatal for the connection.
fn dispatch(
    inner: &Arc<ServerInner>,
    connection: &Arc<Connection>,
    frame: Bytes,
) -> Result<(), ServerError> {
    let message = match Message::parse(&frame) {
        Ok(message) => message,
        Err(e) => {
            match (e.message_type, e.id) {
                (Some(t), Some(id)) => tracing::warn!(
                    "connection {}: malformed message (type {}, id {}): {}",
                    connection.id(),
                    t,
                    id,
                    e
                ),
                (Some(t), None) => tracing::warn!(
                    "connection {}: malformed message (type {}): {}",
                    connection.id(),
                    t,
                    e
                ),
                _ => tracing::warn!("connection {}: malformed message: {}", connection.id(), e),
            }
            return Err(ServerError::Protocol(e.error));
        }
    };

    match message {
        // A successful read already extended the read deadline.
        Message::Heartbeat => Ok(()),

        Message::Request { id, name, payload } => {
            if inner.shutting_down.load(Ordering::SeqCst) {
                spawn_error_reply(connection, id, ErrorReplyKind::Shutdown);
                return Ok(());
            }
            let inner = Arc::clone(inner);
            let connection = Arc::clone(connection);
            tokio::spawn(async move {
                let _permit = match connection.handler_permits() {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = inner
                    .handler
                    .on_request(Arc::clone(&connection), &name, payload)
                    .await;
                let frame = match result {
                    Ok(reply) => match codec::encode_reply(id, &reply) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(
                                "connection {}: reply for {} not encodable: {}",
                                connection.id(),
                                id,
                                e
                            );
                            codec::encode_error_reply(id, ErrorReplyKind::InternalError)
                        }
                    },
                    Err(e) => {
                        tracing::debug!(
                            "connection {}: handler failed request {} ({}): {}",
                            connection.id(),
                            id,
                            name,
                            e
                        );
                        codec::encode_error_reply(id, e.reply_kind())
                    }
                };
                if let Err(e) = connection.write_frame(&frame).await {
                    tracing::warn!(
                        "connection {}: could not write reply for {}: {}",
                        connection.id(),
                        id,
                        e
                    );
                }
            });
            Ok(())
        }

        Message::Signal { name, payload } => {
            let inner = Arc::clone(inner);
            let connection = Arc::clone(connection);
            tokio::spawn(async move {
                inner.handler.on_signal(connection, &name, payload).await;
            });
            Ok(())
        }

        Message::RestoreSessionRequest { id, key } => {
            let inner = Arc::clone(inner);
            let connection = Arc::clone(connection);
            tokio::spawn(async move {
                handle_restore_session(&inner, &connection, id, key).await;
            });
            Ok(())
        }

        Message::CloseSessionRequest { id } => {
            let inner = Arc::clone(inner);
            let connection = Arc::clone(connection);
            tokio::spawn(async move {
                handle_close_session(&inner, &connection, id).await;
            });
            Ok(())
        }

        Message::Reply { .. } | Message::ErrorReply { .. } => {
            Err(ServerError::UnexpectedMessage("reply"))
        }
        Message::SessionCreated { .. } | Message::SessionClosed => {
            Err(ServerError::UnexpectedMessage("session notification"))
        }
        Message::ServerConfiguration { .. } => {
            Err(ServerError::UnexpectedMessage("configuration"))
        }
    }
}

fn spawn_error_reply(connection: &Arc<Connection>, id: MessageId, kind: ErrorReplyKind) {
    let connection = Arc::clone(connection);
    tokio::spawn(async move {
        let frame = codec::encode_error_reply(id, kind);
        if let Err(e) = connection.write_frame(&frame).await {
            tracing::warn!(
                "connection {}: could not write error reply for {}: {}",
                connection.id(),
                id,
                e
            );
        }
    });
}

async fn handle_restore_session(
    inner: &Arc<ServerInner>,
    connection: &Arc<Connection>,
    id: MessageId,
    key: Bytes,
) {
    let reply = restore_session_reply(inner, connection, key).await;
    let frame = match reply {
        Ok(payload) => match codec::encode_reply(id, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("session restore reply not encodable: {}", e);
                codec::encode_error_reply(id, ErrorReplyKind::InternalError)
            }
        },
        Err(kind) => codec::encode_error_reply(id, kind),
    };
    if let Err(e) = connection.write_frame(&frame).await {
        tracing::warn!(
            "connection {}: could not write restore-session reply: {}",
            connection.id(),
            e
        );
    }
}

async fn restore_session_reply(
    inner: &Arc<ServerInner>,
    connection: &Arc<Connection>,
    key: Bytes,
) -> Result<Payload, ErrorReplyKind> {
    if !inner.options.sessions_enabled {
        return Err(ErrorReplyKind::SessionsDisabled);
    }
    let key = match std::str::from_utf8(&key) {
        Ok(key) if !key.is_empty() => key,
        _ => return Err(ErrorReplyKind::SessionNotFound),
    };
    if connection.has_session() {
        tracing::warn!(
            "connection {}: restore-session while a session is bound",
            connection.id()
        );
        return Err(ErrorReplyKind::InternalError);
    }

    let lookup = match inner.session_manager.on_session_lookup(key).await {
        Ok(Some(lookup)) => lookup,
        Ok(None) => return Err(ErrorReplyKind::SessionNotFound),
        Err(e) => {
            tracing::error!("session lookup for {} failed: {}", key, e);
            return Err(ErrorReplyKind::InternalError);
        }
    };

    if !inner.registry.register(key, connection) {
        return Err(ErrorReplyKind::MaxSessConnsReached);
    }

    let session = Arc::new(Session {
        key: key.to_string(),
        creation: lookup.creation,
        last_lookup: SystemTime::now(),
        info: lookup.info,
    });
    connection.bind_session(Arc::clone(&session));

    let body = session.record().to_bytes().map_err(|e| {
        tracing::error!("session record for {} not serializable: {}", key, e);
        ErrorReplyKind::InternalError
    })?;
    tracing::debug!(
        "connection {}: session {} restored",
        connection.id(),
        key
    );
    Ok(Payload::utf8(body))
}

async fn handle_close_session(
    inner: &Arc<ServerInner>,
    connection: &Arc<Connection>,
    id: MessageId,
) {
    let result = match connection.session_key() {
        Some(key) => inner.close_session(&key).await,
        None => Ok(()),
    };
    let frame = match result {
        Ok(()) => match codec::encode_reply(id, &Payload::default()) {
            Ok(frame) => frame,
            Err(_) => codec::encode_error_reply(id, ErrorReplyKind::InternalError),
        },
        Err(e) => {
            tracing::error!("session closure failed: {}", e);
            codec::encode_error_reply(id, ErrorReplyKind::InternalError)
        }
    };
    if let Err(e) = connection.write_frame(&frame).await {
        tracing::warn!(
            "connection {}: could not write close-session reply: {}",
            connection.id(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl ServerHandler for EchoHandler {
        async fn on_request(
            &self,
            _connection: Arc<Connection>,
            _name: &str,
            payload: Payload,
        ) -> Result<Payload, RequestError> {
            Ok(payload)
        }
    }

    #[test]
    fn test_options_validate_buffer_minimum() {
        let mut options = ServerOptions::default();
        options.read_buffer_size = 1024;
        assert!(options.validate().is_err());

        let options = ServerOptions::default();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_configuration_message_content() {
        let options = ServerOptions::default()
            .with_heartbeat_interval(Duration::from_secs(15));
        let conf = options.server_configuration();
        assert_eq!(conf.version, PROTOCOL_VERSION);
        assert_eq!(conf.heartbeat_interval_ms, 15_000);
        assert_eq!(conf.read_buffer_size as usize, MIN_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_server_not_running_before_run() {
        let server = Server::new(
            ServerOptions::new("127.0.0.1:0".parse().unwrap()),
            EchoHandler,
        )
        .unwrap();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_run_binds_ephemeral_port() {
        let server = Arc::new(
            Server::new(
                ServerOptions::new("127.0.0.1:0".parse().unwrap()),
                EchoHandler,
            )
            .unwrap(),
        );
        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.run().await });

        let addr = server.bound_addr().await;
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());

        server.shutdown();
        task.await.unwrap().unwrap();
        assert!(!server.is_running());
    }
}
