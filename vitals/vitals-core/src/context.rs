//! Context - Cancellation and Deadlines
//!
//! TigerStyle: Every storage call is bounded. A `Context` carries an
//! optional deadline and a cancellation flag shared by all of its clones.
//!
//! ```text
//!   caller ──clone──► storage op ──► ctx.err()?  (before work)
//!     │                   │
//!     └── cancel() ───────┴────────► ctx.err()?  (before commit)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// `cancel()` was called.
    #[error("context canceled")]
    Cancelled,
    /// The deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct ContextInner {
    deadline: Option<Instant>,
    cancelled: watch::Sender<bool>,
}

/// Request-scoped cancellation and deadline.
///
/// Cloning is cheap; clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    fn build(deadline: Option<Instant>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                deadline,
                cancelled,
            }),
        }
    }

    /// A context that never ends on its own.
    #[must_use]
    pub fn background() -> Self {
        Self::build(None)
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.inner.cancelled.send_replace(true);
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the context ended, or `None` while it is live.
    ///
    /// Cancellation is reported even if the deadline has also passed.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if *self.inner.cancelled.borrow() {
            return Some(ContextError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context has ended.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let mut rx = self.inner.cancelled.subscribe();
        let cancelled = async move {
            // The sender lives in `self`, so the channel cannot close here.
            let closed = rx.wait_for(|c| *c).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };

        match self.inner.deadline {
            Some(deadline) => tokio::select! {
                () = cancelled => ContextError::Cancelled,
                () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                ContextError::Cancelled
            }
        }
    }

    /// Drive `fut` unless the context ends first.
    ///
    /// When the context wins, `fut` is dropped and the context error is
    /// returned converted into the caller's error type.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ContextError>,
    {
        if let Some(err) = self.err() {
            return Err(err.into());
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err.into()),
            res = fut => res,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let ctx = Context::background();
        let clone = ctx.clone();

        clone.cancel();

        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert!(clone.is_done());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let ctx = Context::background();
        ctx.cancel();
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::with_timeout(Duration::from_millis(100));
        assert!(ctx.err().is_none());

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let ctx = Context::background();
        let waiter = ctx.clone();

        let handle = tokio::spawn(async move { waiter.done().await });
        ctx.cancel();

        assert_eq!(handle.await.unwrap(), ContextError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_deadline_error() {
        let ctx = Context::with_timeout(Duration::from_millis(50));

        let result: Result<(), ContextError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_run_completes_when_live() {
        let ctx = Context::background();
        let result: Result<u32, ContextError> = ctx.run(async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_run_refuses_ended_context() {
        let ctx = Context::background();
        ctx.cancel();

        let result: Result<u32, ContextError> = ctx.run(async { Ok(7) }).await;
        assert_eq!(result, Err(ContextError::Cancelled));
    }
}
