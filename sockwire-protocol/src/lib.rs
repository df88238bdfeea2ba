//! # sockwire-protocol
//!
//! Wire protocol core for sockwire: a bidirectional, message-oriented RPC
//! protocol over a persistent binary transport.
//!
//! This crate provides:
//! - The message model and byte-exact frame codec (including the UTF-16
//!   payload alignment rules)
//! - Length-delimited framing helpers over any async byte stream
//! - The in-flight request registry keyed by 8-byte identifiers
//! - A reusable message buffer pool for read loops
//! - The serialized session model shared by client and server

pub mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod payload;
pub mod pool;
pub mod request_manager;
pub mod session;

pub use error::{ParseError, ProtocolError};
pub use message::{
    ErrorReplyKind, Message, MessageId, NamelessRequestKind, ServerConfiguration,
};
pub use payload::{Encoding, Payload};
pub use pool::{MessagePool, PooledBuffer};
pub use request_manager::{ReplyWaiter, RequestFailure, RequestManager};
pub use session::{InfoValue, SessionInfo, SessionRecord};

/// Protocol version implemented by this crate, "major.minor".
pub const PROTOCOL_VERSION: &str = "1.2";

/// Default port for sockwire servers.
pub const DEFAULT_PORT: u16 = 7341;

/// Maximum frame size accepted by either side (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Minimum read/write buffer size accepted in configuration (16 KiB).
pub const MIN_BUFFER_SIZE: usize = 16 * 1024;

/// Splits a "major.minor" version string.
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_parses() {
        assert_eq!(parse_version(PROTOCOL_VERSION), Some((1, 2)));
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert_eq!(parse_version("2"), None);
        assert_eq!(parse_version("a.b"), None);
        assert_eq!(parse_version(""), None);
    }
}
