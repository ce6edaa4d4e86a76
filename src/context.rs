//! Execution Context Module
//!
//! Cancellable, deadline-bearing context handed to every backend operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};

// == Cache Context ==
/// Carries a cancellation signal and an optional deadline for one logical
/// operation. Cloning shares the same token; [`CacheContext::child`] derives a
/// token that is cancelled with its parent but can also be cancelled alone.
#[derive(Debug, Clone)]
pub struct CacheContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CacheContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derives a child context. The earlier of the two deadlines wins.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(CacheError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CacheError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Runs `operation` bound to this context.
    ///
    /// The future is dropped (and its I/O abandoned) as soon as the context is
    /// cancelled or the deadline passes.
    pub async fn run<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(CacheError::Canceled),
                result = operation => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .map_err(|_| CacheError::DeadlineExceeded)?,
            None => guarded.await,
        }
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::background()
    }
}
