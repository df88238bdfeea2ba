//! Message model and frame parsing.
//!
//! Every frame starts with a single type byte that unambiguously determines
//! the layout of the remainder:
//!
//! ```text
//! signal          [type][nameLen:u8][name][pad?][payload..]
//! request         [type][id:8][nameLen:u8][name][pad?][payload..]
//! nameless req    [type][id:8][payload..]
//! reply           [type][id:8][pad?][payload..]
//! error reply     [type][id:8]
//! notification    [type][body..] | [type]
//! configuration   [type][body..]
//! heartbeat       [type]
//! ```
//!
//! The single zero padding byte keeps UTF-16 payloads starting at an even
//! offset from the beginning of the frame: it is present after an
//! odd-length name, and always present in a UTF-16 reply (whose 9-byte
//! header is odd).

use crate::error::{ParseError, ProtocolError};
use crate::payload::{Encoding, Payload};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type bytes.
pub mod msg_type {
    pub const REPLY_SHUTDOWN: u8 = 1;
    pub const REPLY_INTERNAL_ERROR: u8 = 2;
    pub const SESSION_NOT_FOUND: u8 = 3;
    pub const MAX_SESS_CONNS_REACHED: u8 = 4;
    pub const SESSIONS_DISABLED: u8 = 5;

    pub const NOTIFY_SESSION_CREATED: u8 = 21;
    pub const NOTIFY_SESSION_CLOSED: u8 = 22;

    pub const REQUEST_CLOSE_SESSION: u8 = 31;
    pub const REQUEST_RESTORE_SESSION: u8 = 32;

    pub const SERVER_CONFIGURATION: u8 = 33;
    pub const HEARTBEAT: u8 = 34;

    pub const SIGNAL_BINARY: u8 = 63;
    pub const SIGNAL_UTF8: u8 = 64;
    pub const SIGNAL_UTF16: u8 = 65;

    pub const REQUEST_BINARY: u8 = 127;
    pub const REQUEST_UTF8: u8 = 128;
    pub const REQUEST_UTF16: u8 = 129;

    pub const REPLY_BINARY: u8 = 191;
    pub const REPLY_UTF8: u8 = 192;
    pub const REPLY_UTF16: u8 = 193;
}

/// Length of a message identifier in bytes.
pub const ID_LENGTH: usize = 8;

/// Maximum length of a message name in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// An 8-byte request correlation identifier.
///
/// Chosen by the sender, unique among the sender's in-flight requests, and
/// echoed unchanged by the receiver in the reply.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; ID_LENGTH]);

impl MessageId {
    /// Builds an identifier from a `u64` sequence number (big endian).
    pub fn from_u64(n: u64) -> Self {
        Self(n.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(bytes);
        Self(id)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Parameterless error reply kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReplyKind {
    /// The server is shutting down and no longer accepts requests.
    Shutdown,
    /// The request handler failed with a non-session error.
    InternalError,
    /// Session restoration failed: key unknown to the session manager.
    SessionNotFound,
    /// Session restoration failed: connection limit for the session reached.
    MaxSessConnsReached,
    /// Session restoration failed: the server has sessions disabled.
    SessionsDisabled,
}

impl ErrorReplyKind {
    pub fn type_byte(&self) -> u8 {
        match self {
            ErrorReplyKind::Shutdown => msg_type::REPLY_SHUTDOWN,
            ErrorReplyKind::InternalError => msg_type::REPLY_INTERNAL_ERROR,
            ErrorReplyKind::SessionNotFound => msg_type::SESSION_NOT_FOUND,
            ErrorReplyKind::MaxSessConnsReached => msg_type::MAX_SESS_CONNS_REACHED,
            ErrorReplyKind::SessionsDisabled => msg_type::SESSIONS_DISABLED,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            msg_type::REPLY_SHUTDOWN => Some(ErrorReplyKind::Shutdown),
            msg_type::REPLY_INTERNAL_ERROR => Some(ErrorReplyKind::InternalError),
            msg_type::SESSION_NOT_FOUND => Some(ErrorReplyKind::SessionNotFound),
            msg_type::MAX_SESS_CONNS_REACHED => Some(ErrorReplyKind::MaxSessConnsReached),
            msg_type::SESSIONS_DISABLED => Some(ErrorReplyKind::SessionsDisabled),
            _ => None,
        }
    }
}

/// Nameless request kinds (session lifecycle only).
///
/// Any other nameless request type is rejected at the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamelessRequestKind {
    RestoreSession,
    CloseSession,
}

impl NamelessRequestKind {
    pub fn type_byte(&self) -> u8 {
        match self {
            NamelessRequestKind::RestoreSession => msg_type::REQUEST_RESTORE_SESSION,
            NamelessRequestKind::CloseSession => msg_type::REQUEST_CLOSE_SESSION,
        }
    }
}

/// Body of the configuration message, the first server-to-client frame on
/// every connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfiguration {
    /// Protocol version, "major.minor".
    pub version: String,
    /// Advertised inbound buffer size hint in bytes.
    pub read_buffer_size: u32,
    /// Advertised outbound buffer size hint in bytes.
    pub write_buffer_size: u32,
    /// Heartbeat emission interval expected from clients, 0 = disabled.
    pub heartbeat_interval_ms: u64,
}

impl ServerConfiguration {
    /// Parses the configuration body received from the server.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body)
            .map_err(|e| ProtocolError::InvalidConfiguration(e.to_string()))
    }

    /// Returns the (major, minor) version pair.
    pub fn version_pair(&self) -> Result<(u32, u32), ProtocolError> {
        crate::parse_version(&self.version).ok_or_else(|| {
            ProtocolError::InvalidConfiguration(format!(
                "malformed version string: {:?}",
                self.version
            ))
        })
    }
}

/// A parsed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Server configuration, sent once after accept.
    ServerConfiguration { body: Bytes },
    /// Fire-and-forget named message, either direction.
    Signal { name: String, payload: Payload },
    /// Named reply-expected message.
    Request {
        id: MessageId,
        name: String,
        payload: Payload,
    },
    /// Nameless request carrying a session key to restore.
    RestoreSessionRequest { id: MessageId, key: Bytes },
    /// Nameless request closing the currently bound session.
    CloseSessionRequest { id: MessageId },
    /// Successful reply to a request.
    Reply { id: MessageId, payload: Payload },
    /// Parameterless error reply to a request.
    ErrorReply { id: MessageId, kind: ErrorReplyKind },
    /// Server notification: a session was created and bound.
    SessionCreated { body: Bytes },
    /// Server notification: the bound session was closed.
    SessionClosed,
    /// Single-byte keep-alive.
    Heartbeat,
}

impl Message {
    /// Parses one complete frame.
    ///
    /// The type byte is consumed first; any later failure still reports the
    /// type (and the identifier, for identified layouts) through
    /// [`ParseError`].
    pub fn parse(frame: &Bytes) -> Result<Message, ParseError> {
        let first = match frame.first() {
            Some(byte) => *byte,
            None => return Err(ParseError::new(ProtocolError::EmptyFrame)),
        };

        match first {
            msg_type::SERVER_CONFIGURATION => Ok(Message::ServerConfiguration {
                body: frame.slice(1..),
            }),

            msg_type::HEARTBEAT => {
                if frame.len() > 1 {
                    return Err(ParseError::typed(
                        ProtocolError::TrailingBytes { message_type: first },
                        first,
                    ));
                }
                Ok(Message::Heartbeat)
            }

            msg_type::NOTIFY_SESSION_CREATED => Ok(Message::SessionCreated {
                body: frame.slice(1..),
            }),

            msg_type::NOTIFY_SESSION_CLOSED => {
                if frame.len() > 1 {
                    return Err(ParseError::typed(
                        ProtocolError::TrailingBytes { message_type: first },
                        first,
                    ));
                }
                Ok(Message::SessionClosed)
            }

            msg_type::SIGNAL_BINARY => parse_signal(frame, Encoding::Binary),
            msg_type::SIGNAL_UTF8 => parse_signal(frame, Encoding::Utf8),
            msg_type::SIGNAL_UTF16 => parse_signal(frame, Encoding::Utf16),

            msg_type::REQUEST_BINARY => parse_request(frame, Encoding::Binary),
            msg_type::REQUEST_UTF8 => parse_request(frame, Encoding::Utf8),
            msg_type::REQUEST_UTF16 => parse_request(frame, Encoding::Utf16),

            msg_type::REQUEST_RESTORE_SESSION | msg_type::REQUEST_CLOSE_SESSION => {
                parse_nameless_request(frame)
            }

            msg_type::REPLY_BINARY => parse_reply(frame, Encoding::Binary),
            msg_type::REPLY_UTF8 => parse_reply(frame, Encoding::Utf8),
            msg_type::REPLY_UTF16 => parse_reply(frame, Encoding::Utf16),

            byte => match ErrorReplyKind::from_type_byte(byte) {
                Some(kind) => parse_error_reply(frame, kind),
                None => Err(ParseError::typed(ProtocolError::UnknownType(byte), byte)),
            },
        }
    }
}

fn incomplete(message_type: u8, len: usize) -> ProtocolError {
    ProtocolError::Incomplete { message_type, len }
}

fn parse_name(name: &[u8]) -> Result<String, ProtocolError> {
    for &byte in name {
        if !(0x20..=0x7e).contains(&byte) {
            return Err(ProtocolError::InvalidName(byte));
        }
    }
    // Printable ASCII is valid UTF-8.
    Ok(String::from_utf8(name.to_vec()).expect("printable ASCII"))
}

/// Parses the `[nameLen][name][pad?][payload..]` tail shared by signals and
/// named requests. `offset` points at the name length byte.
fn parse_named_tail(
    frame: &Bytes,
    message_type: u8,
    offset: usize,
    encoding: Encoding,
) -> Result<(String, Payload), ProtocolError> {
    if frame.len() <= offset {
        return Err(incomplete(message_type, frame.len()));
    }
    let name_len = frame[offset] as usize;
    if name_len == 0 {
        return Err(ProtocolError::MissingName);
    }

    let name_end = offset + 1 + name_len;
    if frame.len() < name_end {
        return Err(incomplete(message_type, frame.len()));
    }
    let name = parse_name(&frame[offset + 1..name_end])?;

    let mut payload_start = name_end;
    if encoding.is_utf16() && name_len % 2 != 0 {
        if frame.len() < name_end + 1 {
            return Err(ProtocolError::MissingPadding);
        }
        payload_start += 1;
    }

    let payload = Payload::new(encoding, frame.slice(payload_start..));
    payload.validate()?;
    Ok((name, payload))
}

fn parse_signal(frame: &Bytes, encoding: Encoding) -> Result<Message, ParseError> {
    let message_type = frame[0];
    let (name, payload) = parse_named_tail(frame, message_type, 1, encoding)
        .map_err(|e| ParseError::typed(e, message_type))?;
    Ok(Message::Signal { name, payload })
}

fn parse_id(frame: &Bytes, message_type: u8) -> Result<MessageId, ParseError> {
    if frame.len() < 1 + ID_LENGTH {
        return Err(ParseError::typed(
            incomplete(message_type, frame.len()),
            message_type,
        ));
    }
    Ok(MessageId::from_slice(&frame[1..1 + ID_LENGTH]))
}

fn parse_request(frame: &Bytes, encoding: Encoding) -> Result<Message, ParseError> {
    let message_type = frame[0];
    let id = parse_id(frame, message_type)?;
    let (name, payload) = parse_named_tail(frame, message_type, 1 + ID_LENGTH, encoding)
        .map_err(|e| ParseError::identified(e, message_type, id))?;
    Ok(Message::Request { id, name, payload })
}

fn parse_nameless_request(frame: &Bytes) -> Result<Message, ParseError> {
    let message_type = frame[0];
    let id = parse_id(frame, message_type)?;
    let payload = frame.slice(1 + ID_LENGTH..);
    match message_type {
        msg_type::REQUEST_RESTORE_SESSION => Ok(Message::RestoreSessionRequest { id, key: payload }),
        _ => {
            if !payload.is_empty() {
                return Err(ParseError::identified(
                    ProtocolError::TrailingBytes { message_type },
                    message_type,
                    id,
                ));
            }
            Ok(Message::CloseSessionRequest { id })
        }
    }
}

fn parse_reply(frame: &Bytes, encoding: Encoding) -> Result<Message, ParseError> {
    let message_type = frame[0];
    let id = parse_id(frame, message_type)?;

    // The 9-byte reply header is odd, so UTF-16 replies always pad.
    let mut payload_start = 1 + ID_LENGTH;
    if encoding.is_utf16() {
        if frame.len() < payload_start + 1 {
            return Err(ParseError::identified(
                ProtocolError::MissingPadding,
                message_type,
                id,
            ));
        }
        payload_start += 1;
    }

    let payload = Payload::new(encoding, frame.slice(payload_start..));
    payload
        .validate()
        .map_err(|e| ParseError::identified(e, message_type, id))?;
    Ok(Message::Reply { id, payload })
}

fn parse_error_reply(frame: &Bytes, kind: ErrorReplyKind) -> Result<Message, ParseError> {
    let message_type = frame[0];
    let id = parse_id(frame, message_type)?;
    if frame.len() > 1 + ID_LENGTH {
        return Err(ParseError::identified(
            ProtocolError::TrailingBytes { message_type },
            message_type,
            id,
        ));
    }
    Ok(Message::ErrorReply { id, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: Vec<u8>) -> Bytes {
        Bytes::from(bytes)
    }

    #[test]
    fn test_parse_heartbeat() {
        let msg = Message::parse(&frame(vec![msg_type::HEARTBEAT])).unwrap();
        assert_eq!(msg, Message::Heartbeat);
    }

    #[test]
    fn test_parse_heartbeat_trailing_bytes_rejected() {
        let err = Message::parse(&frame(vec![msg_type::HEARTBEAT, 0])).unwrap_err();
        assert_eq!(err.message_type, Some(msg_type::HEARTBEAT));
        assert!(matches!(err.error, ProtocolError::TrailingBytes { .. }));
    }

    #[test]
    fn test_parse_empty_frame() {
        let err = Message::parse(&frame(vec![])).unwrap_err();
        assert!(err.message_type.is_none());
        assert!(matches!(err.error, ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = Message::parse(&frame(vec![250])).unwrap_err();
        assert_eq!(err.message_type, Some(250));
        assert!(matches!(err.error, ProtocolError::UnknownType(250)));
    }

    #[test]
    fn test_parse_signal_binary() {
        let mut bytes = vec![msg_type::SIGNAL_BINARY, 4];
        bytes.extend_from_slice(b"tick");
        bytes.extend_from_slice(b"payload data");
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(
            msg,
            Message::Signal {
                name: "tick".to_string(),
                payload: Payload::binary(&b"payload data"[..]),
            }
        );
    }

    #[test]
    fn test_parse_signal_utf16_odd_name_skips_padding() {
        let mut bytes = vec![msg_type::SIGNAL_UTF16, 3];
        bytes.extend_from_slice(b"odd");
        bytes.push(0);
        bytes.extend_from_slice(&[b'h', 0, b'i', 0]);
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(
            msg,
            Message::Signal {
                name: "odd".to_string(),
                payload: Payload::utf16(vec![b'h', 0, b'i', 0]),
            }
        );
    }

    #[test]
    fn test_parse_signal_utf16_even_name_no_padding() {
        let mut bytes = vec![msg_type::SIGNAL_UTF16, 4];
        bytes.extend_from_slice(b"even");
        bytes.extend_from_slice(&[b'h', 0]);
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(
            msg,
            Message::Signal {
                name: "even".to_string(),
                payload: Payload::utf16(vec![b'h', 0]),
            }
        );
    }

    #[test]
    fn test_parse_signal_zero_name_length_rejected() {
        let err = Message::parse(&frame(vec![msg_type::SIGNAL_BINARY, 0, b'x'])).unwrap_err();
        assert!(matches!(err.error, ProtocolError::MissingName));
    }

    #[test]
    fn test_parse_signal_non_printable_name_rejected() {
        let err = Message::parse(&frame(vec![msg_type::SIGNAL_BINARY, 1, 0x07])).unwrap_err();
        assert!(matches!(err.error, ProtocolError::InvalidName(0x07)));
    }

    #[test]
    fn test_parse_request_binary() {
        let mut bytes = vec![msg_type::REQUEST_BINARY];
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        bytes.push(4);
        bytes.extend_from_slice(b"echo");
        bytes.extend_from_slice(b"data");
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(
            msg,
            Message::Request {
                id: MessageId([1, 2, 3, 4, 5, 6, 7, 8]),
                name: "echo".to_string(),
                payload: Payload::binary(&b"data"[..]),
            }
        );
    }

    #[test]
    fn test_parse_request_utf16_odd_payload_rejected_with_id() {
        let mut bytes = vec![msg_type::REQUEST_UTF16];
        bytes.extend_from_slice(&[9; 8]);
        bytes.push(2);
        bytes.extend_from_slice(b"ab");
        bytes.extend_from_slice(&[1, 2, 3]); // odd payload
        let err = Message::parse(&frame(bytes)).unwrap_err();
        assert_eq!(err.message_type, Some(msg_type::REQUEST_UTF16));
        assert_eq!(err.id, Some(MessageId([9; 8])));
        assert!(matches!(err.error, ProtocolError::OddUtf16Payload(3)));
    }

    #[test]
    fn test_parse_restore_session_request() {
        let mut bytes = vec![msg_type::REQUEST_RESTORE_SESSION];
        bytes.extend_from_slice(&[7; 8]);
        bytes.extend_from_slice(b"somesamplesessionkey");
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(
            msg,
            Message::RestoreSessionRequest {
                id: MessageId([7; 8]),
                key: Bytes::from_static(b"somesamplesessionkey"),
            }
        );
    }

    #[test]
    fn test_parse_close_session_request() {
        let mut bytes = vec![msg_type::REQUEST_CLOSE_SESSION];
        bytes.extend_from_slice(&[3; 8]);
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(msg, Message::CloseSessionRequest { id: MessageId([3; 8]) });
    }

    #[test]
    fn test_parse_reply_utf16_empty_payload() {
        // [type][id:8][padding]; no payload bytes at all
        let mut bytes = vec![msg_type::REPLY_UTF16];
        bytes.extend_from_slice(&[0x52; 8]);
        bytes.push(0);
        let msg = Message::parse(&frame(bytes)).unwrap();
        assert_eq!(
            msg,
            Message::Reply {
                id: MessageId([0x52; 8]),
                payload: Payload::utf16(Bytes::new()),
            }
        );
    }

    #[test]
    fn test_parse_reply_utf16_missing_padding_rejected() {
        let mut bytes = vec![msg_type::REPLY_UTF16];
        bytes.extend_from_slice(&[0x52; 8]);
        let err = Message::parse(&frame(bytes)).unwrap_err();
        assert_eq!(err.id, Some(MessageId([0x52; 8])));
        assert!(matches!(err.error, ProtocolError::MissingPadding));
    }

    #[test]
    fn test_parse_error_replies() {
        for (byte, kind) in [
            (msg_type::REPLY_SHUTDOWN, ErrorReplyKind::Shutdown),
            (msg_type::REPLY_INTERNAL_ERROR, ErrorReplyKind::InternalError),
            (msg_type::SESSION_NOT_FOUND, ErrorReplyKind::SessionNotFound),
            (
                msg_type::MAX_SESS_CONNS_REACHED,
                ErrorReplyKind::MaxSessConnsReached,
            ),
            (msg_type::SESSIONS_DISABLED, ErrorReplyKind::SessionsDisabled),
        ] {
            let mut bytes = vec![byte];
            bytes.extend_from_slice(&[0xaa; 8]);
            let msg = Message::parse(&frame(bytes)).unwrap();
            assert_eq!(
                msg,
                Message::ErrorReply {
                    id: MessageId([0xaa; 8]),
                    kind,
                }
            );
        }
    }

    #[test]
    fn test_parse_truncated_request_reports_type() {
        let err = Message::parse(&frame(vec![msg_type::REQUEST_BINARY, 1, 2])).unwrap_err();
        assert_eq!(err.message_type, Some(msg_type::REQUEST_BINARY));
        assert!(err.id.is_none());
        assert!(matches!(err.error, ProtocolError::Incomplete { .. }));
    }

    #[test]
    fn test_server_configuration_version_pair() {
        let conf = ServerConfiguration {
            version: "1.2".to_string(),
            read_buffer_size: 16 * 1024,
            write_buffer_size: 16 * 1024,
            heartbeat_interval_ms: 0,
        };
        assert_eq!(conf.version_pair().unwrap(), (1, 2));

        let bad = ServerConfiguration {
            version: "one.two".to_string(),
            ..conf
        };
        assert!(bad.version_pair().is_err());
    }

    #[test]
    fn test_server_configuration_json_roundtrip() {
        let conf = ServerConfiguration {
            version: "1.2".to_string(),
            read_buffer_size: 32 * 1024,
            write_buffer_size: 16 * 1024,
            heartbeat_interval_ms: 30_000,
        };
        let body = serde_json::to_vec(&conf).unwrap();
        assert_eq!(ServerConfiguration::parse(&body).unwrap(), conf);
    }

    #[test]
    fn test_message_id_display() {
        let id = MessageId([0, 1, 0xab, 0xcd, 0, 0, 0, 0xff]);
        assert_eq!(id.to_string(), "0001abcd000000ff");
    }
}
