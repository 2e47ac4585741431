//! Error types for valheim-core operations.

use std::path::PathBuf;

/// All errors that can occur in valheim-core operations.
///
/// Log lines never produce errors; unrecognised text is simply ignored by the
/// tracker. These variants cover configuration and the external commands the
/// monitor shells out to.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidSetting { key: String, value: String },

    // ─────────────────────────────────────────────────────────────────────
    // External Command Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to start {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {timeout_ms}ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using MonitorError.
pub type Result<T> = std::result::Result<T, MonitorError>;

impl From<MonitorError> for String {
    fn from(err: MonitorError) -> String {
        err.to_string()
    }
}
