//! Frame encoders.
//!
//! Each `encode_*` function produces exactly one complete frame as a
//! `BytesMut`; the transport writes it atomically. UTF-16 encoders assert
//! even payload alignment before the frame is finished.

use crate::error::ProtocolError;
use crate::message::{
    msg_type, ErrorReplyKind, MessageId, NamelessRequestKind, ServerConfiguration, MAX_NAME_LENGTH,
};
use crate::payload::Payload;
use bytes::{BufMut, BytesMut};

fn validate_name(name: &[u8]) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::MissingName);
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ProtocolError::NameTooLong(name.len()));
    }
    for &byte in name {
        if !(0x20..=0x7e).contains(&byte) {
            return Err(ProtocolError::InvalidName(byte));
        }
    }
    Ok(())
}

fn put_payload(buf: &mut BytesMut, payload: &Payload) {
    if payload.encoding.is_utf16() {
        if buf.len() % 2 != 0 {
            buf.put_u8(0);
        }
        debug_assert_eq!(buf.len() % 2, 0, "UTF-16 payload must start even");
    }
    buf.put_slice(&payload.data);
}

/// Encodes a named signal frame.
pub fn encode_signal(name: &[u8], payload: &Payload) -> Result<BytesMut, ProtocolError> {
    validate_name(name)?;
    payload.validate()?;

    let signal_type = match payload.encoding {
        crate::payload::Encoding::Binary => msg_type::SIGNAL_BINARY,
        crate::payload::Encoding::Utf8 => msg_type::SIGNAL_UTF8,
        crate::payload::Encoding::Utf16 => msg_type::SIGNAL_UTF16,
    };

    let mut buf = BytesMut::with_capacity(3 + name.len() + payload.len());
    buf.put_u8(signal_type);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    put_payload(&mut buf, payload);
    Ok(buf)
}

/// Encodes a named request frame.
pub fn encode_request(
    id: MessageId,
    name: &[u8],
    payload: &Payload,
) -> Result<BytesMut, ProtocolError> {
    validate_name(name)?;
    payload.validate()?;

    let request_type = match payload.encoding {
        crate::payload::Encoding::Binary => msg_type::REQUEST_BINARY,
        crate::payload::Encoding::Utf8 => msg_type::REQUEST_UTF8,
        crate::payload::Encoding::Utf16 => msg_type::REQUEST_UTF16,
    };

    let mut buf = BytesMut::with_capacity(11 + name.len() + payload.len());
    buf.put_u8(request_type);
    buf.put_slice(id.as_bytes());
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    put_payload(&mut buf, payload);
    Ok(buf)
}

/// Encodes a nameless session lifecycle request.
///
/// The payload is the raw session key for [`NamelessRequestKind::RestoreSession`]
/// and must be empty for [`NamelessRequestKind::CloseSession`].
pub fn encode_nameless_request(
    kind: NamelessRequestKind,
    id: MessageId,
    payload: &[u8],
) -> BytesMut {
    debug_assert!(
        kind == NamelessRequestKind::RestoreSession || payload.is_empty(),
        "close-session requests carry no payload"
    );
    let mut buf = BytesMut::with_capacity(9 + payload.len());
    buf.put_u8(kind.type_byte());
    buf.put_slice(id.as_bytes());
    buf.put_slice(payload);
    buf
}

/// Encodes a successful reply frame.
pub fn encode_reply(id: MessageId, payload: &Payload) -> Result<BytesMut, ProtocolError> {
    payload.validate()?;

    let reply_type = match payload.encoding {
        crate::payload::Encoding::Binary => msg_type::REPLY_BINARY,
        crate::payload::Encoding::Utf8 => msg_type::REPLY_UTF8,
        crate::payload::Encoding::Utf16 => msg_type::REPLY_UTF16,
    };

    let mut buf = BytesMut::with_capacity(10 + payload.len());
    buf.put_u8(reply_type);
    buf.put_slice(id.as_bytes());
    put_payload(&mut buf, payload);
    Ok(buf)
}

/// Encodes a parameterless error reply frame.
pub fn encode_error_reply(id: MessageId, kind: ErrorReplyKind) -> BytesMut {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_u8(kind.type_byte());
    buf.put_slice(id.as_bytes());
    buf
}

/// Encodes a session-created notification carrying the serialized session.
pub fn encode_session_created(body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(msg_type::NOTIFY_SESSION_CREATED);
    buf.put_slice(body);
    buf
}

/// Encodes a session-closed notification.
pub fn encode_session_closed() -> BytesMut {
    let mut buf = BytesMut::with_capacity(1);
    buf.put_u8(msg_type::NOTIFY_SESSION_CLOSED);
    buf
}

/// Encodes a heartbeat frame.
pub fn encode_heartbeat() -> BytesMut {
    let mut buf = BytesMut::with_capacity(1);
    buf.put_u8(msg_type::HEARTBEAT);
    buf
}

/// Encodes the server configuration message.
pub fn encode_server_configuration(
    conf: &ServerConfiguration,
) -> Result<BytesMut, ProtocolError> {
    let body = serde_json::to_vec(conf)?;
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(msg_type::SERVER_CONFIGURATION);
    buf.put_slice(&body);
    Ok(buf)
}
