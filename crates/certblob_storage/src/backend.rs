//! Storage backend trait definition.

use crate::context::Context;
use crate::error::StorageResult;
use crate::types::KeyInfo;
use async_trait::async_trait;
use tracing::error;

/// Certificate storage as seen by the certificate manager.
///
/// Backends are **opaque byte stores** addressed by slash-delimited
/// logical keys. They do not interpret certificates, keys or account
/// metadata.
///
/// # Invariants
///
/// - `load` after a successful `store` returns exactly the stored bytes
/// - `load` of an absent key fails with [`StorageError::NotFound`]
/// - `delete` of an absent key succeeds
/// - `unlock` of a key that is not locked succeeds
/// - at most one caller across all processes sharing the backend holds
///   `lock(key)` at a time, unless the holder stopped refreshing it for
///   longer than the staleness threshold
///
/// Implementations must be `Send + Sync`; one instance is shared by all
/// tasks of a process.
///
/// [`StorageError::NotFound`]: crate::StorageError::NotFound
#[async_trait]
pub trait CertStorage: Send + Sync {
    /// Writes `value` at `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the backend rejects the
    /// write, or the context ends first.
    async fn store(&self, ctx: &Context, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Reads the full payload at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if nothing is stored at
    /// `key`, or a transport/context error.
    async fn load(&self, ctx: &Context, key: &str) -> StorageResult<Vec<u8>>;

    /// Removes the object at `key`. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns a transport or context error.
    async fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()>;

    /// Reports whether an object or virtual directory exists at `key`.
    ///
    /// # Errors
    ///
    /// Returns a transport or context error when existence could not be
    /// determined.
    async fn try_exists(&self, ctx: &Context, key: &str) -> StorageResult<bool>;

    /// Lenient form of [`try_exists`](CertStorage::try_exists).
    ///
    /// Any failure is reported as `false`, so "absent" and "could not
    /// check" are indistinguishable here.
    async fn exists(&self, ctx: &Context, key: &str) -> bool {
        self.try_exists(ctx, key).await.unwrap_or(false)
    }

    /// Returns metadata for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if neither an object nor a
    /// virtual directory exists at `key`, or a transport/context error.
    async fn try_stat(&self, ctx: &Context, key: &str) -> StorageResult<KeyInfo>;

    /// Lenient form of [`try_stat`](CertStorage::try_stat).
    ///
    /// Failures are logged and reported as `KeyInfo::default()`.
    async fn stat(&self, ctx: &Context, key: &str) -> KeyInfo {
        match self.try_stat(ctx, key).await {
            Ok(info) => info,
            Err(e) => {
                error!(key = %key, error = %e, "stat failed");
                KeyInfo::default()
            }
        }
    }

    /// Lists logical keys under `prefix`.
    ///
    /// With `recursive` every descendant object is returned. Without it
    /// only direct children are returned; child directories carry a
    /// trailing separator.
    ///
    /// # Errors
    ///
    /// Returns a transport or context error.
    async fn list(&self, ctx: &Context, prefix: &str, recursive: bool)
        -> StorageResult<Vec<String>>;

    /// Acquires the distributed lock for `key`, waiting while it is held.
    ///
    /// Ending `ctx` never leaves a lock behind: a write that wins after
    /// the context ended is deleted again before the error is returned.
    /// Dropping the returned future does not get that guarantee. If it is
    /// dropped while a write is in flight the lock may persist until it
    /// goes stale, so cancel through `ctx` instead.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Canceled`] or
    /// [`crate::StorageError::DeadlineExceeded`] if the context ends
    /// before the lock is won, or a transport error.
    async fn lock(&self, ctx: &Context, key: &str) -> StorageResult<()>;

    /// Makes a single attempt to acquire the lock for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::LockContention`] if a fresh lock is
    /// held by someone else.
    async fn try_lock(&self, ctx: &Context, key: &str) -> StorageResult<()>;

    /// Releases the lock for `key`. Releasing an unlocked key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a transport or context error.
    async fn unlock(&self, ctx: &Context, key: &str) -> StorageResult<()>;
}
