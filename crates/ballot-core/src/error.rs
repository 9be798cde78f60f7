//! Error types for ballot-core

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias using ballot-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ballot-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Duplicate id, missing parent row, or unique key violation
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connectivity monitor reports no network
    #[error("Offline: sync skipped until connectivity returns")]
    Offline,

    /// The remote could not be reached (connect failure, timeout)
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// The remote answered with an error for a request or batch
    #[error("Remote rejected write to {table}: {message}")]
    RemoteRejected { table: String, message: String },
}

impl Error {
    /// Whether this error means the network is unavailable rather than a bad request.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Offline | Self::Unreachable(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(message.unwrap_or_else(|| code.to_string()))
            }
            other => Self::Sqlite(other),
        }
    }
}
