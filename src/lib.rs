//! # aesdsocket - Concurrent Append-Log Server
//!
//! A TCP server that collects newline-delimited records from any number of
//! concurrent clients into one shared, append-only log file. Every client that
//! completes a record gets the whole log sent back, and a background producer
//! stamps the log with the wall-clock time at a fixed interval.
//!
//! ## Features
//!
//! - **One task per connection**: each accepted client is owned by its own handler
//! - **Single-lock log**: appends and full reads are serialized, records never tear
//! - **Timestamp records**: `timestamp:<RFC 2822 time>` every ten seconds by default
//! - **Clean shutdown**: SIGINT/SIGTERM stop accepting, join handlers, remove the log
//! - **Daemon mode**: `-d` detaches from the terminal after the port is bound
//!
//! ## Quick Start
//!
//! ```no_run
//! use aesdsocket::config::ServerConfig;
//! use aesdsocket::server::LogServer;
//!
//! #[tokio::main]
//! async fn main() -> aesdsocket::Result<()> {
//!     let server = LogServer::bind(ServerConfig::default()).await?;
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod server;
#[cfg(feature = "syslog-backend")]
pub mod log_channel;
pub mod types;

/// Common error types used throughout aesdsocket
pub mod error {
    use thiserror::Error;

    /// aesdsocket error types
    #[derive(Debug, Error)]
    pub enum AesdError {
        /// I/O operation failed
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
        /// Serialization failed
        #[error("Serialization error: {0}")]
        Serde(#[from] serde_json::Error),
        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(String),
        /// Listener or runtime setup failed
        #[error("Setup error: {0}")]
        Setup(String),
        /// The shared log was already removed by shutdown
        #[error("Shared log is closed")]
        LogClosed,
        /// Detaching into the background failed
        #[error("Daemon error: {context}: {source}")]
        Daemon {
            /// Which step of detaching failed
            context: &'static str,
            /// OS error reported by the failed call
            source: std::io::Error,
        },
    }

    /// Result type alias for aesdsocket operations
    pub type Result<T> = std::result::Result<T, AesdError>;
}

pub use error::{AesdError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::server::{LogServer, ServerContext, SharedLog};
    pub use crate::types::TimestampRecord;
    pub use crate::{AesdError, Result};
}
