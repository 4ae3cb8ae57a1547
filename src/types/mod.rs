//! Record types written into the shared log

pub mod record;

pub use record::{completes_record, TimestampRecord, RECORD_TERMINATOR, TIMESTAMP_PREFIX};
