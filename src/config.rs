//! Runtime configuration.
//!
//! Loaded from JSON; every field has a default, so `{}` is a valid config.
//!
//! ```
//! use ampwire::config::Config;
//!
//! let config = Config::from_json_str(r#"{ "session": { "max_count": 11, "initiate": true } }"#).unwrap();
//! assert_eq!(config.session.max_count, 11);
//! assert_eq!(config.transport.port, 7113);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::DEFAULT_MAX_BODY_SIZE;
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 7113;

/// Default counting limit.
pub const DEFAULT_MAX_COUNT: u32 = 10;

/// Default maximum concurrent call handlers per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Counting session settings.
    pub session: SessionConfig,
    /// Where to listen or connect.
    pub transport: TransportConfig,
    /// Per-connection limits.
    pub connection: ConnectionConfig,
}

impl Config {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Counting session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Counter limit: `Count(n + 1)` is only sent while `n + 1 < max_count`.
    pub max_count: u32,
    /// Whether this side sends the first `Count(1)`.
    pub initiate: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            initiate: false,
        }
    }
}

/// Network endpoint and optional TLS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Host to bind or connect to.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// TLS settings; plain TCP when absent.
    pub tls: Option<TlsSettings>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tls: None,
        }
    }
}

/// TLS file locations and trust policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM certificate chain (server side).
    pub cert_path: Option<PathBuf>,
    /// PEM private key (server side).
    pub key_path: Option<PathBuf>,
    /// PEM CA certificates to trust (client side).
    pub ca_path: Option<PathBuf>,
    /// Accept any server certificate without verification (client side).
    pub insecure: bool,
}

/// Per-connection limits and writer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest accepted message body in bytes.
    pub max_body_size: u32,
    /// Calls handled concurrently before the read loop waits.
    pub max_concurrent_handlers: usize,
    /// Writer channel capacity.
    pub channel_capacity: usize,
    /// Queued frames before senders wait.
    pub max_pending_frames: usize,
    /// How long a sender waits for the queue to drain, in milliseconds.
    pub backpressure_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    /// Writer settings derived from this config.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: Duration::from_millis(self.backpressure_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AmpError;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session.max_count, 10);
        assert!(!config.session.initiate);
        assert_eq!(config.transport.host, "127.0.0.1");
        assert!(config.transport.tls.is_none());
        assert_eq!(config.connection.writer_config(), WriterConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_json_str(
            r#"{
                "transport": { "port": 9000, "tls": { "insecure": true } },
                "connection": { "backpressure_timeout_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.transport.port, 9000);
        assert_eq!(config.transport.host, "127.0.0.1");
        assert!(config.transport.tls.unwrap().insecure);
        assert_eq!(
            config.connection.writer_config().backpressure_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Config::from_json_str(r#"{ "session": { "max_count": -1 } }"#),
            Err(AmpError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ampwire-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "session": { "max_count": 11 } }"#).unwrap();

        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.session.max_count, 11);
    }
}
