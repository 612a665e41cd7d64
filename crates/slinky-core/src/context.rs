//! Caller-scoped cancellation and deadlines.
//!
//! Every blocking point in the pipeline races its work against
//! [`Context::done`], so a cancelled or timed-out caller gets control back
//! promptly instead of waiting on a cache round trip or an empty id stream.

use std::fmt;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled explicitly.
    Cancelled,
    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("context cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Cancellation scope passed down the pipeline.
///
/// Cloning is cheap; all clones observe the same cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// The cancelling side of a [`Context`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context paired with a handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// Derives a context that also expires after `timeout`.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check; `Some` once the context is done.
    pub fn err(&self) -> Option<CancelReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                    if fired {
                        CancelReason::Cancelled
                    } else {
                        // handle dropped without cancelling: never fires
                        pending::<CancelReason>().await
                    }
                }
                None => pending::<CancelReason>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    CancelReason::DeadlineExceeded
                }
                None => pending::<CancelReason>().await,
            }
        };
        tokio::select! {
            reason = cancelled => reason,
            reason = expired => reason,
        }
    }

    /// Runs `fut` unless the context finishes first.
    ///
    /// An already-done context wins without polling `fut`.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        if let Some(reason) = self.err() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_cancels() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn cancel_is_observed_by_clones() {
        let (ctx, handle) = Context::with_cancel();
        let child = ctx.clone();
        handle.cancel();
        assert_eq!(child.err(), Some(CancelReason::Cancelled));
        assert_eq!(child.done().await, CancelReason::Cancelled);
    }

    #[tokio::test]
    async fn run_aborts_pending_work_on_cancel() {
        let (ctx, handle) = Context::with_cancel();
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.run(pending::<()>()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert_eq!(task.await.unwrap(), Err(CancelReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let out = ctx.run(pending::<()>()).await;
        assert_eq!(out, Err(CancelReason::DeadlineExceeded));
        assert_eq!(ctx.err(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn earlier_deadline_is_kept() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let derived = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), derived.deadline());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        assert_eq!(ctx.err(), None);
        let out = ctx.run(async { "done" }).await;
        assert_eq!(out, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn done_waits_forever_once_handle_is_gone() {
        let (ctx, handle) = Context::with_cancel();
        let waiting = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        tokio::task::yield_now().await;
        drop(handle);

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiting).await;
        assert!(outcome.is_err());
    }
}
