//! Application-implemented client hooks.

use async_trait::async_trait;
use sockwire_protocol::{Payload, SessionRecord};

/// Callbacks fired by the client's receive loop.
///
/// Hooks run on their own tasks and never block reply routing.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// A session was created server-side and bound to this connection.
    async fn on_session_created(&self, _session: SessionRecord) {}

    /// The bound session was closed server-side.
    async fn on_session_closed(&self) {}

    /// A named signal arrived from the server.
    async fn on_signal(&self, _name: String, _payload: Payload) {}

    /// The connection was lost (not fired on an explicit close).
    async fn on_disconnected(&self) {}
}

/// Handler ignoring every event.
pub struct NoopHandler;

#[async_trait]
impl ClientHandler for NoopHandler {}
