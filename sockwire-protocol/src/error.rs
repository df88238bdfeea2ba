//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing, encoding or parsing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("frame too short for message type {message_type}: {len} bytes")]
    Incomplete { message_type: u8, len: usize },

    #[error("message name missing (name length 0)")]
    MissingName,

    #[error("message name contains non-printable byte {0:#04x}")]
    InvalidName(u8),

    #[error("message name too long: {0} bytes (max 255)")]
    NameTooLong(usize),

    #[error("UTF-16 payload length {0} is odd")]
    OddUtf16Payload(usize),

    #[error("UTF-16 frame is missing its header padding byte")]
    MissingPadding,

    #[error("unexpected trailing bytes after message type {message_type}")]
    TrailingBytes { message_type: u8 },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("invalid configuration message: {0}")]
    InvalidConfiguration(String),
}

/// A parse failure together with whatever the codec managed to read
/// before failing.
///
/// The message type is known as soon as the first byte is consumed; for
/// identified messages the 8-byte identifier is exposed as well so the
/// caller can log the failure with request correlation.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ParseError {
    /// The underlying protocol error.
    pub error: ProtocolError,
    /// Message type byte, if at least one byte was present.
    pub message_type: Option<u8>,
    /// Message identifier, if the layout places one and it was readable.
    pub id: Option<crate::message::MessageId>,
}

impl ParseError {
    pub(crate) fn new(error: ProtocolError) -> Self {
        Self {
            error,
            message_type: None,
            id: None,
        }
    }

    pub(crate) fn typed(error: ProtocolError, message_type: u8) -> Self {
        Self {
            error,
            message_type: Some(message_type),
            id: None,
        }
    }

    pub(crate) fn identified(
        error: ProtocolError,
        message_type: u8,
        id: crate::message::MessageId,
    ) -> Self {
        Self {
            error,
            message_type: Some(message_type),
            id: Some(id),
        }
    }
}
