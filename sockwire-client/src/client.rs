//! Client core: connect/reconnect, request correlation and session cache.

use crate::error::ClientError;
use crate::hooks::ClientHandler;
use crate::stream::ClientStream;
use crate::tls::{create_tls_connector, TlsClientConfig};
use bytes::{Bytes, BytesMut};
use sockwire_protocol::message::NamelessRequestKind;
use sockwire_protocol::{
    codec, framing, Message, Payload, RequestFailure, RequestManager, ServerConfiguration,
    SessionRecord, MAX_FRAME_SIZE, MIN_BUFFER_SIZE,
};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Major protocol version this client speaks; servers advertising a
/// different major version are rejected.
const SUPPORTED_MAJOR_VERSION: u32 = 1;

/// Client connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not connected and autoconnect is disabled.
    Disabled,
    /// Not connected.
    Disconnected,
    /// Connection establishment in progress.
    Connecting,
    /// Connected and serving traffic.
    Connected,
}

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;

/// Client options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for establishing the connection, handshake included.
    pub dialing_timeout: Duration,
    /// Default timeout applied by `request` and the session operations.
    pub default_request_timeout: Duration,
    /// Whether to transparently re-establish a lost connection before
    /// failing an operation with `Disconnected`.
    pub autoconnect: bool,
    /// Interval between autoconnect attempts.
    pub reconnection_interval: Duration,
    /// Inbound buffer size in bytes (min 16 KiB).
    pub read_buffer_size: usize,
    /// Outbound buffer size in bytes (min 16 KiB).
    pub write_buffer_size: usize,
    /// Maximum accepted frame size.
    pub max_frame_size: u32,
    /// TLS configuration; plain TCP when absent.
    pub tls: Option<TlsClientConfig>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dialing_timeout: Duration::from_secs(5),
            default_request_timeout: Duration::from_secs(60),
            autoconnect: true,
            reconnection_interval: Duration::from_secs(2),
            read_buffer_size: MIN_BUFFER_SIZE,
            write_buffer_size: MIN_BUFFER_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
            tls: None,
        }
    }
}

impl ClientOptions {
    pub fn with_dialing_timeout(mut self, timeout: Duration) -> Self {
        self.dialing_timeout = timeout;
        self
    }

    pub fn with_default_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = timeout;
        self
    }

    pub fn with_autoconnect(mut self, enabled: bool) -> Self {
        self.autoconnect = enabled;
        self
    }

    pub fn with_reconnection_interval(mut self, interval: Duration) -> Self {
        self.reconnection_interval = interval;
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Validates the options.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.read_buffer_size < MIN_BUFFER_SIZE {
            return Err(ClientError::InvalidOptions(format!(
                "read buffer size too small: {} bytes (min: {} bytes)",
                self.read_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.write_buffer_size < MIN_BUFFER_SIZE {
            return Err(ClientError::InvalidOptions(format!(
                "write buffer size too small: {} bytes (min: {} bytes)",
                self.write_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.reconnection_interval.is_zero() {
            return Err(ClientError::InvalidOptions(
                "reconnection interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

struct ClientInner {
    addr: SocketAddr,
    options: ClientOptions,
    handler: Arc<dyn ClientHandler>,

    /// Raw connection status (never `Disabled`; that one is derived).
    status: AtomicU8,
    /// Set by an explicit close to suppress background reconnection.
    closed: AtomicBool,
    /// Bumped on every connect and close; stale loops check it and bail.
    generation: AtomicU64,

    /// Shared-held by request/signal traffic, exclusively held by the
    /// lifecycle operations (connect, restore/close session, close).
    api_lock: tokio::sync::RwLock<()>,
    /// Serializes actual connection establishment, independently of the
    /// API lock so autoconnect can run under a shared API lock.
    connect_lock: tokio::sync::Mutex<()>,

    session: std::sync::Mutex<Option<SessionRecord>>,
    server_conf: std::sync::Mutex<Option<ServerConfiguration>>,
    requests: RequestManager,
    writer: tokio::sync::Mutex<Option<WriteHalf<ClientStream>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ClientInner {
    fn status_raw(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    fn set_status(&self, status: u8) {
        self.status.store(status, Ordering::Release);
    }

    fn abort_tasks(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("tasks lock poisoned").push(handle);
    }
}

/// A sockwire client.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a disconnected client.
    pub fn new(
        addr: SocketAddr,
        options: ClientOptions,
        handler: impl ClientHandler,
    ) -> Result<Self, ClientError> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                addr,
                options,
                handler: Arc::new(handler),
                status: AtomicU8::new(STATUS_DISCONNECTED),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                api_lock: tokio::sync::RwLock::new(()),
                connect_lock: tokio::sync::Mutex::new(()),
                session: std::sync::Mutex::new(None),
                server_conf: std::sync::Mutex::new(None),
                requests: RequestManager::new(),
                writer: tokio::sync::Mutex::new(None),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    /// Current status. `Disabled` is reported instead of `Disconnected`
    /// when autoconnect is off, since the client will not self-heal.
    pub fn status(&self) -> Status {
        match self.inner.status_raw() {
            STATUS_CONNECTED => Status::Connected,
            STATUS_CONNECTING => Status::Connecting,
            _ if self.inner.options.autoconnect => Status::Disconnected,
            _ => Status::Disabled,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status_raw() == STATUS_CONNECTED
    }

    /// Number of currently pending requests.
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.pending_count()
    }

    /// Snapshot of the cached session.
    pub fn session(&self) -> Option<SessionRecord> {
        self.inner
            .session
            .lock()
            .expect("session lock poisoned")
            .clone()
    }

    /// Value of one cached session info field.
    pub fn session_info(&self, key: &str) -> Option<sockwire_protocol::InfoValue> {
        self.inner
            .session
            .lock()
            .expect("session lock poisoned")
            .as_ref()
            .and_then(|s| s.info.get(key).cloned())
    }

    /// The configuration advertised by the server at connect time.
    pub fn server_configuration(&self) -> Option<ServerConfiguration> {
        self.inner
            .server_conf
            .lock()
            .expect("conf lock poisoned")
            .clone()
    }

    /// Connects to the server and automatically tries to restore a
    /// previously cached session.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _api = self.inner.api_lock.write().await;
        self.connect_with_lock(true).await
    }

    /// Sends a request and awaits the reply, with the default timeout.
    pub async fn request(&self, name: &str, payload: Payload) -> Result<Payload, ClientError> {
        self.timed_request(name, payload, self.inner.options.default_request_timeout)
            .await
    }

    /// Sends a request and awaits the reply within `timeout`.
    ///
    /// With autoconnect enabled a disconnected client keeps retrying the
    /// connection until the timeout; with it disabled the request fails
    /// immediately with `Disconnected`. Dropping the returned future
    /// cancels the request: the pending slot is removed and a late reply
    /// is dropped with a warning.
    pub async fn timed_request(
        &self,
        name: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, ClientError> {
        let _api = self.inner.api_lock.read().await;
        let deadline = Instant::now() + timeout;
        self.ensure_connected(deadline).await?;

        let waiter = self.inner.requests.register();
        let frame = codec::encode_request(waiter.id(), name.as_bytes(), &payload)?;
        self.write_frame_locked(&frame).await?;

        match tokio::time::timeout_at(deadline, waiter.wait()).await {
            Err(_elapsed) => Err(ClientError::Timeout),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(failure)) => Err(failure.into()),
        }
    }

    /// Sends a fire-and-forget signal.
    pub async fn signal(&self, name: &str, payload: Payload) -> Result<(), ClientError> {
        let _api = self.inner.api_lock.read().await;
        let deadline = Instant::now() + self.inner.options.default_request_timeout;
        self.ensure_connected(deadline).await?;

        let frame = codec::encode_signal(name.as_bytes(), &payload)?;
        self.write_frame_locked(&frame).await
    }

    /// Restores a session by key and installs it as the cached session.
    ///
    /// Fails with `AlreadyHasSession` when a session is cached; close it
    /// first.
    pub async fn restore_session(&self, key: &str) -> Result<SessionRecord, ClientError> {
        let _api = self.inner.api_lock.write().await;
        if self.session().is_some() {
            return Err(ClientError::AlreadyHasSession);
        }
        let deadline = Instant::now() + self.inner.options.default_request_timeout;
        self.ensure_connected(deadline).await?;

        let record = self.request_session_restoration(key).await?;
        *self.inner.session.lock().expect("session lock poisoned") = Some(record.clone());
        Ok(record)
    }

    /// Closes the active session and synchronizes the closure to the
    /// server when connected. Offline, only the local cache is cleared.
    pub async fn close_session(&self) -> Result<(), ClientError> {
        let _api = self.inner.api_lock.write().await;
        if self.session().is_none() {
            return Ok(());
        }

        if self.is_connected() {
            let waiter = self.inner.requests.register();
            let frame = codec::encode_nameless_request(
                NamelessRequestKind::CloseSession,
                waiter.id(),
                &[],
            );
            self.write_frame_locked(&frame).await?;
            match tokio::time::timeout(
                self.inner.options.default_request_timeout,
                waiter.wait(),
            )
            .await
            {
                Err(_elapsed) => return Err(ClientError::Timeout),
                Ok(Err(failure)) => return Err(failure.into()),
                Ok(Ok(_)) => {}
            }
        }

        *self.inner.session.lock().expect("session lock poisoned") = None;
        Ok(())
    }

    /// Closes the connection. Pending requests are canceled; the session
    /// cache is retained so the session can be restored on reconnect.
    pub async fn close(&self) {
        let _api = self.inner.api_lock.write().await;
        // Taking the connect lock waits out any dial in flight, so a
        // background reconnection cannot resurrect a closed client.
        let _connect = self.inner.connect_lock.lock().await;
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_tasks();
        self.inner.requests.fail_all(RequestFailure::Canceled);

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.inner.set_status(STATUS_DISCONNECTED);
    }

    /// Establishes the connection while holding the connect lock.
    ///
    /// `resurrect` distinguishes user-driven connects (which revive an
    /// explicitly closed client) from background reconnection (which must
    /// not).
    async fn connect_with_lock(&self, resurrect: bool) -> Result<(), ClientError> {
        let _connect = self.inner.connect_lock.lock().await;
        if self.inner.status_raw() == STATUS_CONNECTED {
            return Ok(());
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            if !resurrect {
                return Err(ClientError::Disconnected);
            }
            self.inner.closed.store(false, Ordering::SeqCst);
        }

        self.inner.abort_tasks();
        self.inner.set_status(STATUS_CONNECTING);

        match self.dial().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.set_status(STATUS_DISCONNECTED);
                Err(e)
            }
        }
    }

    fn dial(&self) -> Pin<Box<dyn Future<Output = Result<(), ClientError>> + Send + '_>> {
        Box::pin(async move {
        let inner = &self.inner;
        tracing::debug!("connecting to {}", inner.addr);

        let tcp_stream = tokio::time::timeout(
            inner.options.dialing_timeout,
            TcpStream::connect(inner.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::Io)?;
        tcp_stream.set_nodelay(true).ok();

        let stream = match &inner.options.tls {
            Some(tls_config) => {
                let host = inner.addr.ip().to_string();
                let (connector, server_name) = create_tls_connector(tls_config, &host)?;
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                ClientStream::Tls { stream: tls_stream }
            }
            None => ClientStream::Plain { stream: tcp_stream },
        };

        let (mut read_half, write_half) = tokio::io::split(stream);

        // The configuration message is the first frame on every
        // connection; it is read directly, before the receive loop starts.
        let conf = tokio::time::timeout(
            inner.options.dialing_timeout,
            read_configuration(&mut read_half, inner.options.max_frame_size),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        let (major, _minor) = conf.version_pair()?;
        if major != SUPPORTED_MAJOR_VERSION {
            return Err(ClientError::ProtocolVersionMismatch {
                server: conf.version,
            });
        }

        let heartbeat_interval = Duration::from_millis(conf.heartbeat_interval_ms);
        *inner.server_conf.lock().expect("conf lock poisoned") = Some(conf);
        *inner.writer.lock().await = Some(write_half);

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reader_client = self.clone();
        inner.track_task(tokio::spawn(async move {
            receive_loop(reader_client, read_half, generation).await;
        }));
        if !heartbeat_interval.is_zero() {
            let heartbeat_client = self.clone();
            inner.track_task(tokio::spawn(async move {
                heartbeat_loop(heartbeat_client, heartbeat_interval, generation).await;
            }));
        }

        inner.set_status(STATUS_CONNECTED);
        tracing::debug!("connected to {}", inner.addr);

        // Automatic session restoration; the connection itself succeeded,
        // so a failure here is reported as a warning only.
        let cached_key = self.session().map(|s| s.key);
        if let Some(key) = cached_key {
            match self.request_session_restoration(&key).await {
                Ok(record) => {
                    *inner.session.lock().expect("session lock poisoned") = Some(record);
                }
                Err(e) => {
                    tracing::warn!("could not restore session {}: {}", key, e);
                    *inner.session.lock().expect("session lock poisoned") = None;
                }
            }
        }

        Ok(())
        })
    }

    /// Issues a restore-session request and parses the returned record.
    async fn request_session_restoration(
        &self,
        key: &str,
    ) -> Result<SessionRecord, ClientError> {
        let waiter = self.inner.requests.register();
        let frame = codec::encode_nameless_request(
            NamelessRequestKind::RestoreSession,
            waiter.id(),
            key.as_bytes(),
        );
        self.write_frame_locked(&frame).await?;

        let payload = tokio::time::timeout(
            self.inner.options.default_request_timeout,
            waiter.wait(),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::from)?;

        Ok(SessionRecord::parse(&payload.data)?)
    }

    /// Blocks until connected, retrying at the reconnection interval when
    /// autoconnect is enabled.
    async fn ensure_connected(&self, deadline: Instant) -> Result<(), ClientError> {
        loop {
            if self.inner.status_raw() == STATUS_CONNECTED {
                return Ok(());
            }
            if !self.inner.options.autoconnect {
                return Err(ClientError::Disconnected);
            }

            match self.connect_with_lock(true).await {
                Ok(()) => continue,
                Err(e @ ClientError::ProtocolVersionMismatch { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!("autoconnect attempt failed: {}", e);
                    if Instant::now() + self.inner.options.reconnection_interval >= deadline {
                        return Err(ClientError::Disconnected);
                    }
                    tokio::time::sleep(self.inner.options.reconnection_interval).await;
                }
            }
        }
    }

    /// Writes one frame under the write mutex.
    async fn write_frame_locked(&self, frame: &[u8]) -> Result<(), ClientError> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::Disconnected)?;
        framing::write_frame(writer, frame, self.inner.options.max_frame_size)
            .await
            .map_err(ClientError::from)
    }

    /// Routes one inbound frame. An error is fatal for the connection.
    fn dispatch_inbound(&self, frame: Bytes) -> Result<(), ClientError> {
        let message = Message::parse(&frame).map_err(|e| e.error)?;
        let inner = &self.inner;

        match message {
            Message::Reply { id, payload } => {
                inner.requests.fulfill(id, payload);
            }
            Message::ErrorReply { id, kind } => {
                inner.requests.fail(id, kind.into());
            }
            Message::SessionCreated { body } => match SessionRecord::parse(&body) {
                Ok(record) => {
                    *inner.session.lock().expect("session lock poisoned") = Some(record.clone());
                    let handler = Arc::clone(&inner.handler);
                    tokio::spawn(async move {
                        handler.on_session_created(record).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("discarding malformed session-created notification: {}", e);
                }
            },
            Message::SessionClosed => {
                *inner.session.lock().expect("session lock poisoned") = None;
                let handler = Arc::clone(&inner.handler);
                tokio::spawn(async move {
                    handler.on_session_closed().await;
                });
            }
            Message::Signal { name, payload } => {
                let handler = Arc::clone(&inner.handler);
                tokio::spawn(async move {
                    handler.on_signal(name, payload).await;
                });
            }
            Message::Heartbeat => {}
            Message::ServerConfiguration { .. } => {
                tracing::warn!("ignoring configuration message after handshake");
            }
            Message::Request { id, .. }
            | Message::RestoreSessionRequest { id, .. }
            | Message::CloseSessionRequest { id } => {
                tracing::warn!("ignoring inbound request {} (no client request handler)", id);
            }
        }
        Ok(())
    }
}

/// Reads the configuration frame during the handshake.
async fn read_configuration(
    reader: &mut ReadHalf<ClientStream>,
    max_frame_size: u32,
) -> Result<ServerConfiguration, ClientError> {
    let mut buf = BytesMut::new();
    match framing::read_frame(reader, &mut buf, max_frame_size).await? {
        framing::ReadOutcome::Closed => return Err(ClientError::Disconnected),
        framing::ReadOutcome::Frame => {}
    }
    let frame = buf.freeze();
    match Message::parse(&frame).map_err(|e| e.error)? {
        Message::ServerConfiguration { body } => Ok(ServerConfiguration::parse(&body)?),
        _ => Err(ClientError::Protocol(
            sockwire_protocol::ProtocolError::InvalidConfiguration(
                "first frame is not a configuration message".into(),
            ),
        )),
    }
}

/// Per-connection receive loop.
async fn receive_loop(client: Client, mut reader: ReadHalf<ClientStream>, generation: u64) {
    let inner = Arc::clone(&client.inner);
    let mut buf = BytesMut::with_capacity(inner.options.read_buffer_size);

    loop {
        match framing::read_frame(&mut reader, &mut buf, inner.options.max_frame_size).await {
            Ok(framing::ReadOutcome::Frame) => {
                let frame = Bytes::copy_from_slice(&buf[..]);
                if let Err(e) = client.dispatch_inbound(frame) {
                    tracing::warn!("fatal protocol error on receive: {}", e);
                    break;
                }
            }
            Ok(framing::ReadOutcome::Closed) => {
                tracing::debug!("connection closed by server");
                break;
            }
            Err(e) => {
                if framing::is_abnormal_close(&e) {
                    tracing::warn!("abnormal closure: {}", e);
                } else {
                    tracing::debug!("read error: {}", e);
                }
                break;
            }
        }
    }

    // A newer connection (or an explicit close) owns the state now.
    if inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }

    inner.set_status(STATUS_DISCONNECTED);
    *inner.writer.lock().await = None;
    inner.requests.fail_all(RequestFailure::Disconnected);
    inner.handler.on_disconnected().await;

    if inner.options.autoconnect && !inner.closed.load(Ordering::SeqCst) {
        tokio::spawn(async move {
            reconnect_loop(client).await;
        });
    }
}

/// Background reconnection after a lost connection.
async fn reconnect_loop(client: Client) {
    let interval = client.inner.options.reconnection_interval;
    loop {
        tokio::time::sleep(interval).await;
        if client.inner.closed.load(Ordering::SeqCst) || client.is_connected() {
            return;
        }
        match client.connect_with_lock(false).await {
            Ok(()) => {
                tracing::debug!("reconnected to {}", client.inner.addr);
                return;
            }
            Err(e) => {
                tracing::debug!("reconnection attempt failed: {}", e);
            }
        }
    }
}

/// Emits heartbeats at the server-advertised interval.
///
/// Heartbeats are best-effort: a write failure is logged and stops the
/// loop without failing any request.
async fn heartbeat_loop(client: Client, interval: Duration, generation: u64) {
    loop {
        tokio::time::sleep(interval).await;
        if client.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let frame = codec::encode_heartbeat();
        if let Err(e) = client.write_frame_locked(&frame).await {
            tracing::warn!("heartbeat write failed: {}", e);
            return;
        }
    }
}
