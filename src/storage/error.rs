//! Error types for the storage engine.

use super::protocol::ErrorCode;

/// Errors returned by [`Store`](super::engine::Store) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A primary write was attempted on a replica.
    #[error("read-only mode")]
    ReadOnly,

    /// The outbox holds no entry for the acknowledged key.
    #[error("key not found")]
    NotFound,

    /// The outbox entry was overwritten after it was fetched.
    #[error("value mismatch")]
    Mismatch,

    /// Replicated entries are carried as text.
    #[error("key and value must be valid UTF-8")]
    InvalidUtf8,

    #[error("redb error: {0}")]
    Database(#[from] redb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ReadOnly => ErrorCode::ReadOnly,
            Self::NotFound => ErrorCode::NotFound,
            Self::Mismatch => ErrorCode::Mismatch,
            Self::InvalidUtf8 | Self::Database(_) | Self::Io(_) => ErrorCode::IoError,
        }
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(source: redb::DatabaseError) -> Self {
        Self::Database(source.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(source: redb::TransactionError) -> Self {
        Self::Database(source.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(source: redb::TableError) -> Self {
        Self::Database(source.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(source: redb::StorageError) -> Self {
        Self::Database(source.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(source: redb::CommitError) -> Self {
        Self::Database(source.into())
    }
}
