//! # sockwire-client
//!
//! Client side of the sockwire RPC framework.
//!
//! This crate provides:
//! - Connection establishment with protocol version validation
//! - Requests correlated by identifier, signals and timeouts
//! - Session cache surviving reconnects, with automatic restoration
//! - Autoconnect with periodic reconnection attempts
//! - Optional TLS

pub mod client;
pub mod error;
pub mod hooks;
pub mod stream;
pub mod tls;

pub use client::{Client, ClientOptions, Status};
pub use error::ClientError;
pub use hooks::{ClientHandler, NoopHandler};
pub use tls::TlsClientConfig;
