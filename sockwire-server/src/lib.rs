//! # sockwire-server
//!
//! Server side of the sockwire RPC framework.
//!
//! This crate provides:
//! - The accept loop and per-connection read loops
//! - Connection state with session binding and write serialization
//! - Request/signal dispatch to application handlers on worker tasks
//! - The session registry and a pluggable session manager
//! - YAML/env configuration and optional TLS

pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub mod registry;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;

pub use config::{Config, ConfigError, NetworkConfig, SessionsConfig, TlsConfig};
pub use connection::{Connection, ConnectionPhase};
pub use error::{RequestError, ServerError};
pub use hooks::{ConnectionOptions, ServerHandler};
pub use registry::SessionRegistry;
pub use server::{Server, ServerOptions};
pub use session::{InMemorySessionManager, Session, SessionLookup, SessionManager};
