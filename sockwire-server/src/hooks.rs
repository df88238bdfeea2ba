//! Application-implemented server hooks.

use crate::connection::Connection;
use crate::error::{RequestError, ServerError};
use async_trait::async_trait;
use bytes::Bytes;
use sockwire_protocol::Payload;
use std::net::SocketAddr;
use std::sync::Arc;

/// Per-connection options decided before a socket is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Whether to accept the connection at all.
    pub accept: bool,
    /// Maximum number of concurrently running handlers for this
    /// connection, 0 = unbounded.
    pub concurrency_limit: usize,
    /// User agent attributed to the connection by the accept hook.
    pub user_agent: Bytes,
}

impl ConnectionOptions {
    pub fn accept() -> Self {
        Self {
            accept: true,
            concurrency_limit: 0,
            user_agent: Bytes::new(),
        }
    }

    pub fn reject() -> Self {
        Self {
            accept: false,
            concurrency_limit: 0,
            user_agent: Bytes::new(),
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<Bytes>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::accept()
    }
}

/// The application side of a server.
///
/// `on_request` runs on its own task per inbound request, so a slow handler
/// never blocks the connection's read loop. All hooks may be invoked
/// concurrently for different messages.
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Decides whether to accept an inbound socket, before anything is
    /// written to it.
    fn on_before_accept(&self, _remote_addr: SocketAddr) -> ConnectionOptions {
        ConnectionOptions::default()
    }

    /// Called once a connection is registered and ready.
    async fn on_client_connected(&self, _connection: &Arc<Connection>) {}

    /// Called exactly once when a connection goes away. `error` is `None`
    /// for a clean closure.
    async fn on_client_disconnected(
        &self,
        _connection: &Arc<Connection>,
        _error: Option<&ServerError>,
    ) {
    }

    /// Handles a named request and returns the reply payload.
    async fn on_request(
        &self,
        connection: Arc<Connection>,
        name: &str,
        payload: Payload,
    ) -> Result<Payload, RequestError>;

    /// Handles a named signal. No reply is ever written.
    async fn on_signal(&self, _connection: Arc<Connection>, _name: &str, _payload: Payload) {}
}
