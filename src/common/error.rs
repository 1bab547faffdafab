use thiserror::Error;

use super::types::PageId;

/// Storage error types
#[derive(Error, Debug)]
pub enum StraitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("{0} is past the end of the file")]
    Eof(PageId),

    #[error("Offset {0} is beyond the last strait of the lookup tree")]
    OffsetOutOfRange(u64),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Out of space: cannot grow file to {requested} pages (limit {limit})")]
    OutOfSpace { requested: u64, limit: u64 },

    #[error("Critical storage error: {0}")]
    Critical(String),

    #[error("Handle already has {0} checked out")]
    AlreadyStarted(PageId),

    #[error("Handle has no page checked out")]
    NotStarted,

    #[error("Buffer pool has {0} slots and cannot serve more handles")]
    TooManyHandles(usize),

    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl StraitError {
    /// Builds a critical error, logging it where it was detected.
    pub fn critical(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(error = %msg, "storage.critical");
        StraitError::Critical(msg)
    }

    /// Returns true when retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StraitError::OutOfMemory)
    }
}

pub type Result<T> = std::result::Result<T, StraitError>;
