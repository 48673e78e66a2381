//! Common error types for the ingester

use thiserror::Error;

/// Common result type for store and configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the ingester crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored value could not be decoded
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True when the failure is about reaching the store rather than the data in it.
    ///
    /// Pool timeouts, closed pools and I/O failures clear up on their own;
    /// the scanner logs them and tries again on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ) || err.to_string().contains("database is locked"),
            Error::Io(_) => true,
            _ => false,
        }
    }
}
