//! Error taxonomy for the migration engine.
//!
//! Database failures are classified once, in [`DbError`], from the SQLSTATE the
//! server reports. Everything above the connection layer speaks [`Error`].

use thiserror::Error;

/// Failure reported by a [`Backend`](crate::db::Backend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// `lock_timeout` expired before a lock was acquired (SQLSTATE 55P03).
    #[error("lock acquisition timed out: {0}")]
    LockTimeout(String),
    /// A referenced relation does not exist (SQLSTATE 42P01).
    #[error("relation does not exist: {0}")]
    UndefinedTable(String),
    /// The server could not be reached or dropped the connection.
    #[error("cannot connect to database: {0}")]
    Connection(String),
    /// Any other statement failure.
    #[error("{0}")]
    Statement(String),
}

/// Errors surfaced by ledger, strategy and driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The script or its target objects failed validation. Nothing was touched.
    #[error("{0}")]
    Validation(String),

    /// The ledger is in the wrong state for the requested command.
    #[error("{0}")]
    InvalidTransition(String),

    /// The ledger table is missing.
    #[error("laridae has not been initialized in this database; run `laridae init` first")]
    NotInitialized,

    #[error("cannot connect to database: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(DbError),

    /// Expand failed after the ledger row was written. The row stays `aborted`
    /// and `restore` cleans up whatever was created.
    #[error("expand of migration '{name}' failed: {source}; run `laridae restore` to clean up")]
    PartialExpand {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid migration script: {0}")]
    Script(#[from] serde_json::Error),

    /// A physical column was given two aliases in the same view.
    #[error(
        "column {column} in view {view} is already bound to {existing}; cannot rebind it to {requested}"
    )]
    ViewBinding {
        view: String,
        column: String,
        existing: String,
        requested: String,
    },

    #[error("statement still blocked on locks after {attempts} attempts")]
    LockRetriesExhausted { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<DbError> for Error {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Connection(msg) => Error::Connection(msg),
            DbError::UndefinedTable(msg) if msg.contains("laridae.migrations") => {
                Error::NotInitialized
            }
            other => Error::Database(other),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
