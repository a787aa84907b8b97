//! Error types for vpilot-alert.
//!
//! Failures fall into three classes. Transport failures (network errors,
//! timeouts, non-success statuses) are always logged and dropped by the
//! caller. Audio load failures are reported to whoever asked for playback.
//! A missing stored value is not an error at all and shows up as `None`.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for vpilot-alert operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Transport Errors ===
    /// The HTTP request could not be completed.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Endpoint path the request targeted.
        endpoint: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    HttpStatus {
        /// Endpoint path the request targeted.
        endpoint: String,
        /// The status code returned.
        status: u16,
    },

    /// The connection-status body was not a boolean.
    #[error("unreadable connection signal: {body:?}")]
    InvalidSignal {
        /// The raw response body.
        body: String,
    },

    /// A server base address could not be used.
    #[error("invalid server address '{address}': {message}")]
    InvalidServerAddress {
        /// The offending address.
        address: String,
        /// Why it was rejected.
        message: String,
    },

    // === Audio Errors ===
    /// A sound resource could not be opened or decoded.
    #[error("failed to load sound '{uri}': {message}")]
    AudioLoad {
        /// The sound that failed.
        uri: String,
        /// Description of what went wrong.
        message: String,
    },

    /// No audio output device is available.
    #[error("audio device unavailable: {0}")]
    AudioDevice(String),

    // === Storage Errors ===
    /// Failed to open or create the device database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for vpilot-alert operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create an audio load error.
    #[must_use]
    pub fn audio_load(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AudioLoad {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error belongs to the transport class.
    ///
    /// Transport errors are never fatal; callers log them and move on.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::HttpStatus { .. } | Self::InvalidSignal { .. }
        )
    }

    /// Check if this error means a sound could not be opened.
    #[must_use]
    pub fn is_audio_load(&self) -> bool {
        matches!(self, Self::AudioLoad { .. })
    }
}
