//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SOCKWIRE_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use sockwire_protocol::MIN_BUFFER_SIZE;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("cannot parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration file model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub sessions: SessionsConfig,
    pub tls: TlsConfig,
}

impl Config {
    /// Loads configuration from file (if `SOCKWIRE_CONFIG` is set), then
    /// applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SOCKWIRE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.sessions.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.tls.validate()
    }
}

/// Network and protocol timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Read deadline per frame, in seconds.
    pub read_timeout_secs: u64,
    /// Write deadline per frame, in seconds.
    pub write_timeout_secs: u64,
    /// Heartbeat interval advertised to clients, in seconds (0 = disabled).
    pub heartbeat_interval_secs: u64,
    /// Inbound buffer size hint in bytes (min 16 KiB).
    pub read_buffer_size: usize,
    /// Outbound buffer size hint in bytes (min 16 KiB).
    pub write_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], sockwire_protocol::DEFAULT_PORT)),
            read_timeout_secs: 60,
            write_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            read_buffer_size: MIN_BUFFER_SIZE,
            write_buffer_size: MIN_BUFFER_SIZE,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("SOCKWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Ok(secs) = std::env::var("SOCKWIRE_READ_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.read_timeout_secs = parsed;
            }
        }
        if let Ok(secs) = std::env::var("SOCKWIRE_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.heartbeat_interval_secs = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "read buffer size too small: {} bytes (min: {} bytes)",
                self.read_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.write_buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "write buffer size too small: {} bytes (min: {} bytes)",
                self.write_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid("read timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Session feature configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Whether sessions are available at all.
    pub enabled: bool,
    /// Maximum connections simultaneously bound to one session
    /// (0 = unlimited).
    pub max_connections_per_session: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections_per_session: 0,
        }
    }
}

impl SessionsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("SOCKWIRE_SESSIONS_ENABLED") {
            if let Ok(parsed) = enabled.parse() {
                self.enabled = parsed;
            }
        }
        if let Ok(max) = std::env::var("SOCKWIRE_MAX_SESSION_CONNECTIONS") {
            if let Ok(parsed) = max.parse() {
                self.max_connections_per_session = parsed;
            }
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(cert) = std::env::var("SOCKWIRE_TLS_CERT") {
            self.cert_path = Some(cert.into());
            self.enabled = true;
        }
        if let Ok(key) = std::env::var("SOCKWIRE_TLS_KEY") {
            self.key_path = Some(key.into());
            self.enabled = true;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && (self.cert_path.is_none() || self.key_path.is_none()) {
            return Err(ConfigError::Invalid(
                "TLS enabled but cert_path or key_path not set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.read_timeout_secs, 60);
        assert_eq!(config.network.read_buffer_size, MIN_BUFFER_SIZE);
        assert!(config.sessions.enabled);
        assert_eq!(config.sessions.max_connections_per_session, 0);
        assert!(!config.tls.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"network:\n  bind_addr: \"0.0.0.0:9000\"\n  read_timeout_secs: 120\nsessions:\n  enabled: false\n",
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.network.read_timeout_secs, 120);
        assert!(!config.sessions.enabled);
        // Unspecified fields keep their defaults.
        assert_eq!(config.network.write_timeout_secs, 10);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            Config::from_file("/nonexistent/sockwire.yaml"),
            Err(ConfigError::Io(_, _))
        ));
    }

    #[test]
    fn test_small_buffer_rejected() {
        let mut config = Config::default();
        config.network.read_buffer_size = 1024;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_tls_enabled_requires_paths() {
        let mut config = Config::default();
        config.tls.enabled = true;
        assert!(config.validate().is_err());

        config.tls.cert_path = Some("/cert.pem".into());
        config.tls.key_path = Some("/key.pem".into());
        assert!(config.validate().is_ok());
    }
}
