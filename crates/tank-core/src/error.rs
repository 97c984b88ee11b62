use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the tank monitor.
#[derive(Error, Debug)]
pub enum TankError {
    /// A single transport attempt failed (connect, HTTP status, body decode).
    #[error("Transport {transport} failed: {message}")]
    Transport { transport: String, message: String },

    /// A transport attempt did not complete within its time budget.
    #[error("Transport {transport} timed out after {timeout_ms} ms")]
    Timeout { transport: String, timeout_ms: u64 },

    /// Every configured transport was tried once and none succeeded.
    #[error("All {attempted} transports failed; last error: {last}")]
    TransportsExhausted { attempted: usize, last: String },

    /// A provider payload or entry did not carry a usable value.
    #[error("Invalid telemetry payload: {0}")]
    Validation(String),

    /// The persisted usage store could not be read.
    #[error("Failed to read store {path}: {source}")]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted usage store could not be written.
    #[error("Failed to write store {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted usage store exists but cannot be decoded.
    #[error("Store {path} is corrupt: {message}")]
    StorageCorrupt { path: PathBuf, message: String },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A timestamp string did not match any recognised format.
    #[error("Invalid timestamp format: {0}")]
    TimestampParse(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the tank crates.
pub type Result<T> = std::result::Result<T, TankError>;
