//! Cancellation-carrying run context
//!
//! Every public entry point in the core takes a `&RunContext` as its
//! first argument. It is the single channel through which a run's
//! correlation id, deadline, and cancellation reach every suspension
//! point (rate-limiter waits, provider calls, file writes, audit
//! writes).

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque per-run identifier, stamped on every log record and audit entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a wait on the rate limiter or a provider call was abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    DeadlineExceeded,
}

/// The cancellation-carrying context threaded through a run.
///
/// Cloning a `RunContext` is cheap: the cancellation token is
/// reference-counted internally and cancelling any clone cancels every
/// derived child.
#[derive(Clone)]
pub struct RunContext {
    correlation_id: CorrelationId,
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl RunContext {
    /// Start a brand-new run: fresh correlation id, fresh cancellation token.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            deadline: timeout.map(|d| Instant::now() + d),
            token: CancellationToken::new(),
        }
    }

    /// A context with no deadline and no way to cancel it (test convenience).
    pub fn detached() -> Self {
        Self::new(None)
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Derive a child context for a single unit of work. Cancelling the
    /// parent (deadline or explicit) cancels every child.
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    /// Explicitly cancel this run and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline has
    /// passed, whichever comes first. Never resolves for a context with
    /// no deadline and no cancellation.
    pub async fn stopped(&self) -> StopReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => StopReason::Cancelled,
                    () = tokio::time::sleep_until(deadline) => StopReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                StopReason::Cancelled
            }
        }
    }

    /// Race an arbitrary future against cancellation/deadline. Returns
    /// `Err(reason)` if the context stopped first.
    pub async fn race<F, T>(&self, fut: F) -> Result<T, StopReason>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            reason = self.stopped() => Err(reason),
            value = fut => Ok(value),
        }
    }
}
