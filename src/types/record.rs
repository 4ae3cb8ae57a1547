//! Record framing and timestamp records

use chrono::{DateTime, FixedOffset, Local};
use std::fmt;

/// Byte that terminates every record in the shared log
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Prefix that marks a record written by the timestamp producer
pub const TIMESTAMP_PREFIX: &str = "timestamp:";

/// RFC 2822 layout: `Sun, 18 Oct 2026 14:03:09 +0200`
const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Returns true when `chunk` completes at least one record
pub fn completes_record(chunk: &[u8]) -> bool {
    chunk.contains(&RECORD_TERMINATOR)
}

/// A wall-clock time stamp appended to the log by the timestamp producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampRecord {
    at: DateTime<FixedOffset>,
}

impl TimestampRecord {
    /// Stamp for the current local time
    pub fn now() -> Self {
        Self {
            at: Local::now().fixed_offset(),
        }
    }

    /// Stamp for a specific instant
    pub fn at(at: DateTime<FixedOffset>) -> Self {
        Self { at }
    }

    /// Full newline-terminated record as written to the log
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }

    /// Parse one log line (with or without its terminator) back into a stamp.
    ///
    /// Returns `None` for client records and for malformed stamps.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line
            .strip_suffix(RECORD_TERMINATOR as char)
            .unwrap_or(line)
            .strip_prefix(TIMESTAMP_PREFIX)?;
        DateTime::parse_from_rfc2822(body).ok().map(Self::at)
    }
}

impl fmt::Display for TimestampRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", TIMESTAMP_PREFIX, self.at.format(TIMESTAMP_FORMAT))
    }
}
