//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object exists at the resolved path.
    #[error("key not found: {key}")]
    NotFound {
        /// The logical key that was looked up.
        key: String,
    },

    /// The logical key cannot be mapped to a backend path.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The offending logical key.
        key: String,
        /// Why the key was rejected.
        reason: String,
    },

    /// The blob store reported a network, auth or service failure.
    #[error("transport error for {key}: {source}")]
    Transport {
        /// The logical key (or prefix) the operation targeted.
        key: String,
        /// The underlying object store error.
        #[source]
        source: object_store::Error,
    },

    /// The caller's context was canceled before the operation completed.
    #[error("operation canceled")]
    Canceled,

    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A fresh lock held by someone else prevents acquisition.
    #[error("lock on {key} is held by {holder}")]
    LockContention {
        /// The logical key being locked.
        key: String,
        /// Holder identity recorded in the existing lock.
        holder: String,
    },

    /// A lock object exists but its payload could not be used.
    #[error("corrupted lock record at {key}: {reason}")]
    CorruptLock {
        /// The logical key of the lock.
        key: String,
        /// What was wrong with the record.
        reason: String,
    },

    /// Lock record serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Maps an object store error for `key`, keeping "not found" distinguishable.
    pub(crate) fn from_store(key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                key: key.to_string(),
            },
            source => StorageError::Transport {
                key: key.to_string(),
                source,
            },
        }
    }

    /// Returns true if this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Returns true if the caller's context ended the operation.
    pub fn is_context_error(&self) -> bool {
        matches!(self, StorageError::Canceled | StorageError::DeadlineExceeded)
    }
}
