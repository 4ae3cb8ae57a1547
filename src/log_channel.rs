//! Syslog output for server logs
//!
//! In daemon mode stdout and stderr point at `/dev/null`, so this is where
//! accept/close events, errors and shutdown messages end up.

use crate::{AesdError, Result};
use ::syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

type SyslogLogger = Logger<LoggerBackend, Formatter3164>;

/// Syslog priority a tracing level is sent with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// LOG_ERR
    Error,
    /// LOG_WARNING
    Warning,
    /// LOG_INFO
    Info,
    /// LOG_DEBUG, also used for TRACE
    Debug,
}

impl From<&Level> for Severity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warning,
            Level::INFO => Severity::Info,
            _ => Severity::Debug,
        }
    }
}

/// A `MakeWriter` for a tracing fmt layer that forwards each formatted
/// event to syslog (facility `LOG_USER`).
///
/// Events written before [`SyslogChannel::connect`] succeeds are dropped by
/// this channel only; other layers still see them.
#[derive(Clone, Default)]
pub struct SyslogChannel {
    logger: Arc<Mutex<Option<SyslogLogger>>>,
}

impl SyslogChannel {
    /// Create an unconnected channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the local syslog socket as `process`.
    ///
    /// Call again after forking so messages carry the daemon's pid. On
    /// failure any existing connection is kept.
    pub fn connect(&self, process: &str) -> Result<()> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: process.to_string(),
            pid: std::process::id(),
        };
        let logger = ::syslog::unix(formatter)
            .map_err(|e| AesdError::Setup(format!("Failed to connect to syslog: {}", e)))?;

        *self.logger.lock() = Some(logger);
        Ok(())
    }

    /// True once a connection to syslog is open
    pub fn is_connected(&self) -> bool {
        self.logger.lock().is_some()
    }

    fn writer(&self, severity: Severity) -> SyslogWriter {
        SyslogWriter {
            logger: Arc::clone(&self.logger),
            severity,
        }
    }
}

/// Writer for one formatted event
pub struct SyslogWriter {
    logger: Arc<Mutex<Option<SyslogLogger>>>,
    severity: Severity,
}

impl io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.logger.lock();
        if let Some(logger) = guard.as_mut() {
            let message = String::from_utf8_lossy(buf);
            let message = message.trim_end();
            let sent = match self.severity {
                Severity::Error => logger.err(message),
                Severity::Warning => logger.warning(message),
                Severity::Info => logger.info(message),
                Severity::Debug => logger.debug(message),
            };
            sent.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SyslogChannel {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer(Severity::Info)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.writer(Severity::from(meta.level()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_levels_map_to_syslog_priorities() {
        assert_eq!(Severity::from(&Level::ERROR), Severity::Error);
        assert_eq!(Severity::from(&Level::WARN), Severity::Warning);
        assert_eq!(Severity::from(&Level::INFO), Severity::Info);
        assert_eq!(Severity::from(&Level::DEBUG), Severity::Debug);
        assert_eq!(Severity::from(&Level::TRACE), Severity::Debug);
    }

    #[test]
    fn test_unconnected_channel_swallows_events() {
        let channel = SyslogChannel::new();
        assert!(!channel.is_connected());

        let mut writer = channel.make_writer();
        assert_eq!(writer.write(b"Accepted connection from 127.0.0.1\n").unwrap(), 35);
        writer.flush().unwrap();
    }

    #[test]
    fn test_clones_share_one_connection() {
        let channel = SyslogChannel::new();
        let clone = channel.clone();

        // Hosts without a syslog socket leave both unconnected
        let connected = channel.connect("aesdsocket-test").is_ok();
        assert_eq!(clone.is_connected(), connected);
    }
}
