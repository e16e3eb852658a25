//! Import error types
//!
//! Row validation failures never show up here: a malformed row is classified
//! invalid and counted, it is not an error. Everything in [`ImportError`] is
//! fatal to the run that raised it.

use thiserror::Error;

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    /// The input could not be opened, or a read failed mid-stream
    #[error("Failed to read input '{path}' after {rows_read} rows: {message}")]
    StreamRead {
        path: String,
        rows_read: u64,
        message: String,
    },

    /// A batch upsert (or its reconciliation reads) did not commit
    #[error("Batch {batch} upsert failed ({rows} rows): {source}")]
    UpsertCommit {
        batch: u64,
        rows: usize,
        #[source]
        source: Box<ImportError>,
    },

    #[error("Import run not found: {0}")]
    RunNotFound(String),

    #[error("Import run already exists: {0}")]
    DuplicateRun(String),

    #[error("Import run {run_key} is {status} and no longer accepts updates")]
    RunTerminal { run_key: String, status: String },

    #[error("Import run {run_key} cannot move to {to}: {reason}")]
    InvalidTransition {
        run_key: String,
        to: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Common(#[from] catalog_common::CommonError),
}

impl ImportError {
    pub fn stream_read(path: impl Into<String>, rows_read: u64, err: impl std::fmt::Display) -> Self {
        ImportError::StreamRead {
            path: path.into(),
            rows_read,
            message: err.to_string(),
        }
    }

    pub fn upsert_commit(batch: u64, rows: usize, source: ImportError) -> Self {
        ImportError::UpsertCommit {
            batch,
            rows,
            source: Box::new(source),
        }
    }

    pub fn is_stream_read(&self) -> bool {
        matches!(self, ImportError::StreamRead { .. })
    }

    pub fn is_upsert_commit(&self) -> bool {
        matches!(self, ImportError::UpsertCommit { .. })
    }
}
