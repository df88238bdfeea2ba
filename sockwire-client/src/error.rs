//! Client error types.

use sockwire_protocol::RequestFailure;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] sockwire_protocol::ProtocolError),

    #[error("not connected")]
    Disconnected,

    #[error("request timed out")]
    Timeout,

    #[error("request canceled")]
    Canceled,

    #[error("incompatible protocol version: server advertises {server}")]
    ProtocolVersionMismatch { server: String },

    #[error("internal server error")]
    InternalServer,

    #[error("session not found")]
    SessionNotFound,

    #[error("sessions are disabled on this server")]
    SessionsDisabled,

    #[error("session connection limit reached")]
    MaxSessConnsReached,

    #[error("server is shutting down")]
    ServerShutdown,

    #[error("a session is already active")]
    AlreadyHasSession,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("invalid client options: {0}")]
    InvalidOptions(String),
}

impl From<RequestFailure> for ClientError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Timeout => ClientError::Timeout,
            RequestFailure::Canceled => ClientError::Canceled,
            RequestFailure::Disconnected => ClientError::Disconnected,
            RequestFailure::ServerShutdown => ClientError::ServerShutdown,
            RequestFailure::InternalServer => ClientError::InternalServer,
            RequestFailure::SessionNotFound => ClientError::SessionNotFound,
            RequestFailure::SessionsDisabled => ClientError::SessionsDisabled,
            RequestFailure::MaxSessConnsReached => ClientError::MaxSessConnsReached,
        }
    }
}
