//! Cooperative cancellation for pipeline suspension points.
//!
//! A pipeline run only ever waits in two places: an outbound HTTP call and
//! the delay between two status queries. Both go through [`Suspend::run`],
//! which races the awaited future against the caller's [`CancelSignal`] and
//! the optional end-to-end deadline. Whichever fires first wins; a cancelled
//! run never issues another remote call.

use crate::error::StageError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// A cloneable cancellation signal.
///
/// Cancellation is idempotent: the first reason is kept. Clones share state,
/// so the caller keeps one clone and hands another to the pipeline.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Only the first reason is recorded.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Resolve once cancellation has been requested, with the reason.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as `self`; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Guard applied to every suspension point of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct Suspend {
    signal: CancelSignal,
    deadline: Option<Instant>,
}

impl Suspend {
    /// Create a guard with an optional budget measured from now.
    ///
    /// A budget too large to represent as an instant means no deadline.
    pub fn new(signal: CancelSignal, budget: Option<Duration>) -> Self {
        Self {
            signal,
            deadline: budget.and_then(|b| Instant::now().checked_add(b)),
        }
    }

    /// Fail with `Cancelled` if the run must stop before its next remote call.
    pub fn check(&self) -> Result<(), StageError> {
        if let Some(reason) = self.signal.reason() {
            return Err(StageError::Cancelled(reason));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StageError::Cancelled("pipeline deadline elapsed".into()));
            }
        }
        Ok(())
    }

    /// Await `fut` unless cancellation or the deadline comes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            reason = self.signal.cancelled() => {
                debug!("Suspension point aborted: {}", reason);
                Err(StageError::Cancelled(reason))
            }
            _ = deadline => {
                debug!("Suspension point aborted: deadline elapsed");
                Err(StageError::Cancelled("pipeline deadline elapsed".into()))
            }
            out = fut => Ok(out),
        }
    }

    /// Sleep for `delay` as a cancellable suspension point.
    pub async fn sleep(&self, delay: Duration) -> Result<(), StageError> {
        self.run(tokio::time::sleep(delay)).await
    }
}
