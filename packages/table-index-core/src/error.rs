//! Synchronization error types.

use thiserror::Error;

use crate::model::{ColumnId, ResetToken, TableId};

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Table index synchronization errors.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Reset token presented by the caller no longer matches the status record
    #[error("Reset token for table '{table}' is stale: expected {expected}, current {current}")]
    StaleToken {
        table: TableId,
        expected: ResetToken,
        current: ResetToken,
    },

    /// Exclusive lock is held by another worker
    #[error("Lock '{key}' is held by another worker")]
    LockUnavailable { key: String },

    /// Lease expired or was released before the holder renewed it
    #[error("Lease on '{key}' was lost")]
    LockLost { key: String },

    /// Table not found
    #[error("Table '{table}' not found")]
    TableNotFound { table: TableId },

    /// Row version not found in the truth store
    #[error("Row {row_id} not found in table '{table}' at version {version}")]
    RowNotFound {
        table: TableId,
        row_id: u64,
        version: u64,
    },

    /// Concurrent structural change detected mid-operation
    #[error("Conflicting update: {0}")]
    ConflictingUpdate(String),

    /// Work was interrupted before completion
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Cell value cannot be stored in its column
    #[error("Invalid value '{value}' for column {column}: expected {expected}")]
    InvalidValue {
        column: ColumnId,
        value: String,
        expected: String,
    },

    /// Row set shape does not match its headers
    #[error("Invalid row set for table '{table}': {reason}")]
    InvalidRowSet { table: TableId, reason: String },

    /// Caller lacks the privilege for an administrative operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error during persistence
    #[error("I/O error: {0}")]
    Io(String),

    /// Transient I/O error that may succeed on retry
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    /// Any other failure
    #[error("{0}")]
    Unknown(String),
}

impl SyncError {
    /// Returns true if the work can be retried later by redelivering the message.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::LockUnavailable { .. }
                | SyncError::LockLost { .. }
                | SyncError::Interrupted(_)
                | SyncError::TransientIo(_)
        )
    }

    /// Returns true if the referenced table or row has vanished.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::TableNotFound { .. } | SyncError::RowNotFound { .. }
        )
    }

    /// Builds the diagnostic text stored as a failed table's error detail.
    pub fn diagnostic_detail(&self, context: &str) -> String {
        let mut detail = format!("{}\n  while {}\n  caused by: {:?}", self, context, self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            detail.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
        detail
    }
}
