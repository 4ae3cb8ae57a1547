//! Configuration management for aesdsocket

pub mod settings;

pub use settings::{ServerConfig, ServerSettings, StorageSettings, TimestampSettings};
