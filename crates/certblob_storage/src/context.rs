//! Per-call execution context carrying cancellation and a deadline.

use crate::error::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Execution context passed to every storage operation.
///
/// A context bundles a [`CancellationToken`] and an optional deadline.
/// Backend calls issued under it are abandoned as soon as the token is
/// cancelled or the deadline passes, and the operation then fails with
/// [`StorageError::Canceled`] or [`StorageError::DeadlineExceeded`].
///
/// Contexts are cheap to clone; clones share the same token.
///
/// # Example
///
/// ```rust
/// use certblob_storage::Context;
/// use std::time::Duration;
///
/// let ctx = Context::background().with_timeout(Duration::from_secs(30));
/// assert!(ctx.err().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Returns a context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Limits the context to `timeout` from now.
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Limits the context to the given deadline.
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        });
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the cancellation token of this context.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the reason the context is done, or `None` if it is still live.
    pub fn err(&self) -> Option<StorageError> {
        if self.cancel.is_cancelled() {
            return Some(StorageError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StorageError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Runs `fut` until it completes or the context ends.
    ///
    /// When the context ends first the future is dropped, which abandons
    /// the in-flight backend request.
    pub async fn run<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Canceled),
            _ = expired => Err(StorageError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleeps for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> StorageResult<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
