//! Per-call deadline, cancellation and outgoing headers

use cloudrt_core::{CallHeaders, CloudRuntimesError, RuntimesResult};
use futures::future::select_all;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Context passed to every client operation
///
/// Cloning a context shares its cancellation signals.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    /// Signals of this context and every context it was derived from
    cancel: Vec<watch::Receiver<bool>>,
    headers: CallHeaders,
}

/// Fires the cancellation signal of the contexts it was created with
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CallContext {
    /// No deadline, never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().deadline_at(deadline)
    }

    /// A cancellable context and the handle that cancels it
    pub fn with_cancel() -> (Self, CancelHandle) {
        Self::background().cancellable()
    }

    /// Derive a context that is also cancelled by the returned handle
    ///
    /// Signals inherited from this context keep cancelling the derived one.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel.push(rx);
        (self, CancelHandle { tx })
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline_at(Instant::now() + timeout)
    }

    /// Set the deadline, keeping an earlier one if present
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Apply `timeout` only when the context has no deadline yet
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.timeout(timeout),
            _ => self,
        }
    }

    pub fn trace_id(mut self, id: impl Into<String>) -> Self {
        self.headers.trace_id = Some(id.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.headers.auth_token = Some(token.into());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn headers(&self) -> &CallHeaders {
        &self.headers
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|rx| *rx.borrow())
    }

    /// Fail early if the context is already done
    pub fn check(&self) -> RuntimesResult<()> {
        if self.is_cancelled() {
            return Err(CloudRuntimesError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(CloudRuntimesError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Completes once any signal fires
    async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return pending::<()>().await;
        }

        let waits = self.cancel.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                // a dropped handle can no longer cancel
                if closed {
                    pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }

    /// Race `fut` against this context
    ///
    /// `fut` is dropped as soon as the context is cancelled or its deadline
    /// passes, which cancels any work it still had in flight.
    pub async fn run<F, T>(&self, fut: F) -> RuntimesResult<T>
    where
        F: Future<Output = RuntimesResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(CloudRuntimesError::Cancelled),
            _ = self.expired() => Err(CloudRuntimesError::DeadlineExceeded),
            result = fut => result,
        }
    }
}
