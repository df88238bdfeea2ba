//! Server error types.

use sockwire_protocol::message::ErrorReplyKind;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] sockwire_protocol::ProtocolError),

    #[error("unexpected {0} message on server side")]
    UnexpectedMessage(&'static str),

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("write deadline exceeded")]
    WriteTimeout,

    #[error("connection is no longer active")]
    NotActive,

    #[error("sessions are disabled on this server")]
    SessionsDisabled,

    #[error("connection already has a session")]
    SessionAlreadyExists,

    #[error("session connection limit reached")]
    MaxSessConnsReached,

    #[error("session manager error: {0}")]
    SessionManager(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("invalid server options: {0}")]
    InvalidOptions(String),
}

/// Error returned by request handlers, mapped onto wire error replies.
///
/// A generic failure becomes an internal-error reply; session failures keep
/// their specific reply codes.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    Internal(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("sessions are disabled")]
    SessionsDisabled,

    #[error("session connection limit reached")]
    MaxSessConnsReached,
}

impl RequestError {
    /// The wire error reply kind this handler error maps to.
    pub fn reply_kind(&self) -> ErrorReplyKind {
        match self {
            RequestError::Internal(_) => ErrorReplyKind::InternalError,
            RequestError::SessionNotFound => ErrorReplyKind::SessionNotFound,
            RequestError::SessionsDisabled => ErrorReplyKind::SessionsDisabled,
            RequestError::MaxSessConnsReached => ErrorReplyKind::MaxSessConnsReached,
        }
    }
}

impl From<ServerError> for RequestError {
    fn from(error: ServerError) -> Self {
        match error {
            ServerError::SessionsDisabled => RequestError::SessionsDisabled,
            ServerError::MaxSessConnsReached => RequestError::MaxSessConnsReached,
            other => RequestError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_reply_mapping() {
        assert_eq!(
            RequestError::Internal("boom".into()).reply_kind(),
            ErrorReplyKind::InternalError
        );
        assert_eq!(
            RequestError::SessionNotFound.reply_kind(),
            ErrorReplyKind::SessionNotFound
        );
        assert_eq!(
            RequestError::SessionsDisabled.reply_kind(),
            ErrorReplyKind::SessionsDisabled
        );
        assert_eq!(
            RequestError::MaxSessConnsReached.reply_kind(),
            ErrorReplyKind::MaxSessConnsReached
        );
    }

    #[test]
    fn test_server_error_converts_to_request_error() {
        assert!(matches!(
            RequestError::from(ServerError::SessionsDisabled),
            RequestError::SessionsDisabled
        ));
        assert!(matches!(
            RequestError::from(ServerError::MaxSessConnsReached),
            RequestError::MaxSessConnsReached
        ));
        assert!(matches!(
            RequestError::from(ServerError::SessionAlreadyExists),
            RequestError::Internal(_)
        ));
    }
}
