//! sockwire - demo server binary.
//!
//! Runs an echo server with session support: `login` creates a session,
//! `logout` closes it, `whoami` returns the bound session key and any
//! other request name echoes its payload back.

use async_trait::async_trait;
use sockwire_protocol::{Payload, SessionInfo};
use sockwire_server::{
    Config, Connection, RequestError, Server, ServerError, ServerHandler, ServerOptions,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct DemoHandler;

#[async_trait]
impl ServerHandler for DemoHandler {
    async fn on_client_connected(&self, connection: &Arc<Connection>) {
        tracing::info!("client {} connected", connection.remote_addr());
    }

    async fn on_client_disconnected(
        &self,
        connection: &Arc<Connection>,
        error: Option<&ServerError>,
    ) {
        match error {
            Some(e) => tracing::info!("client {} lost: {}", connection.remote_addr(), e),
            None => tracing::info!("client {} disconnected", connection.remote_addr()),
        }
    }

    async fn on_request(
        &self,
        connection: Arc<Connection>,
        name: &str,
        payload: Payload,
    ) -> Result<Payload, RequestError> {
        match name {
            "login" => {
                let username = String::from_utf8_lossy(&payload.data).to_string();
                let mut info = SessionInfo::new();
                info.insert("username".to_string(), username.into());
                let session = connection.create_session(info).await?;
                Ok(Payload::utf8(session.key.clone().into_bytes()))
            }
            "logout" => {
                connection.close_session().await?;
                Ok(Payload::default())
            }
            "whoami" => {
                let key = connection.session_key().unwrap_or_default();
                Ok(Payload::utf8(key.into_bytes()))
            }
            _ => Ok(payload),
        }
    }

    async fn on_signal(&self, connection: Arc<Connection>, name: &str, payload: Payload) {
        tracing::info!(
            "signal {} from {} ({} bytes)",
            name,
            connection.remote_addr(),
            payload.len()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // From file if SOCKWIRE_CONFIG is set, then env overrides.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            if std::env::var("SOCKWIRE_CONFIG").is_ok() {
                tracing::error!("failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("using default configuration");
            Config::default()
        }
    };

    tracing::info!("starting sockwire demo server");
    tracing::info!("  bind address: {}", config.network.bind_addr);
    tracing::info!(
        "  sessions: {}",
        if config.sessions.enabled { "enabled" } else { "disabled" }
    );
    tracing::info!(
        "  TLS: {}",
        if config.tls.enabled { "enabled" } else { "disabled" }
    );

    let options = ServerOptions::from_config(&config)?;
    let server = Server::new(options, DemoHandler)?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
            server.shutdown();
        }
    }

    Ok(())
}
