//! Error types for fleetpulse.
//!
//! This module defines all error types used throughout the fleetpulse crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::feed::EntityKind;

/// The main error type for fleetpulse operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Snapshot Store Errors ===
    /// Failed to open or create the snapshot database.
    #[error("failed to open snapshot database at {path}: {source}")]
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

    /// A persisted snapshot row could not be decoded.
    #[error("failed to decode snapshot key '{key}': {source}")]
    SnapshotDecode {
        /// The snapshot key that failed to decode.
        key: &'static str,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
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

    // === Backend Errors ===
    /// A request to the backend data service failed.
    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    // === Change Feed Errors ===
    /// A change event arrived without the payloads its kind requires.
    #[error("malformed {entity} change event: {message}")]
    MalformedEvent {
        /// The entity stream the event arrived on.
        entity: EntityKind,
        /// Description of what was missing.
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

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for fleetpulse operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a malformed change-event error.
    #[must_use]
    pub fn malformed_event(entity: EntityKind, message: impl Into<String>) -> Self {
        Self::MalformedEvent {
            entity,
            message: message.into(),
        }
    }

    /// Check if this error is a configuration problem.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad(_) | Self::ConfigValidation { .. })
    }

    /// Check if this error came from the backend data service.
    #[must_use]
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
