//! Configuration structures for aesdsocket

use crate::{AesdError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Backing storage for the shared log
    pub storage: StorageSettings,
    /// Timestamp producer settings
    pub timestamp: TimestampSettings,
}

/// Core server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to listen on
    pub bind_address: String,
    /// TCP port to listen on, 0 picks an ephemeral port
    pub port: u16,
    /// Size of each connection's receive buffer
    pub buffer_size: usize,
    /// Drop a connection that sends nothing for this many seconds
    pub idle_timeout_secs: Option<u64>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path of the shared log file
    pub log_path: PathBuf,
}

/// Timestamp producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampSettings {
    /// Enable periodic timestamp records
    pub enabled: bool,
    /// Interval between timestamp records in milliseconds
    pub interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "0.0.0.0".to_string(),
                port: 9000,
                buffer_size: 1024,
                idle_timeout_secs: None,
            },
            storage: StorageSettings {
                log_path: PathBuf::from("/var/tmp/aesdsocketdata"),
            },
            timestamp: TimestampSettings {
                enabled: true,
                interval_ms: 10_000,
            },
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.log_path.as_os_str().is_empty() {
            return Err(AesdError::Config("Log path cannot be empty".to_string()));
        }
        if self.server.buffer_size == 0 {
            return Err(AesdError::Config("Buffer size must be non-zero".to_string()));
        }
        if self.timestamp.enabled && self.timestamp.interval_ms == 0 {
            return Err(AesdError::Config(
                "Timestamp interval must be non-zero".to_string(),
            ));
        }
        if self.server.idle_timeout_secs == Some(0) {
            return Err(AesdError::Config(
                "Idle timeout must be non-zero when set".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Socket address the listener binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| {
                AesdError::Config(format!(
                    "Invalid bind address {}: {}",
                    self.server.bind_address, e
                ))
            })
    }

    /// Period of the timestamp producer
    pub fn timestamp_interval(&self) -> Duration {
        Duration::from_millis(self.timestamp.interval_ms)
    }

    /// Per-connection idle timeout, if one is configured
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.server.idle_timeout_secs.map(Duration::from_secs)
    }
}
