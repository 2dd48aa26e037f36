//! Rate limiter (C2)
//!
//! Two independent gates stand between a `Processor` and a provider
//! call:
//!
//! - a global `Semaphore` sized to `max_concurrent` (skipped entirely
//!   when `max_concurrent == 0`, meaning unbounded)
//! - a per-model token bucket refilled continuously at `rpm / 60`
//!   tokens/sec with a burst capacity of `rpm` (skipped entirely when
//!   `rpm == 0`, meaning unlimited)
//!
//! `acquire` races both gates against the run's cancellation/deadline.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::context::{RunContext, StopReason};

/// A per-model token bucket. Tokens are computed lazily from elapsed
/// time rather than refilled by a background task, so an idle
/// `RateLimiter` costs nothing.
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rpm: u32) -> Self {
        let capacity = f64::from(rpm.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to take one token. Returns `true` if admitted.
    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds until at least one token will be available.
    fn wait_estimate(&self) -> std::time::Duration {
        if self.tokens >= 1.0 {
            return std::time::Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        std::time::Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

/// Why a call to [`RateLimiter::acquire`] returned without admission.
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(ReleaseHandle),
    Cancelled,
    DeadlineExceeded,
}

impl PartialEq for ReleaseHandle {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
impl Eq for ReleaseHandle {}

impl std::fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReleaseHandle")
    }
}

/// Holds the global concurrency permit for the duration of one model
/// call. Dropping it returns the permit; the per-model RPM token is
/// never returned (RPM counts call starts, per spec).
pub struct ReleaseHandle {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Admission gate shared across every model in a run.
pub struct RateLimiter {
    global: Option<Arc<Semaphore>>,
    buckets: Mutex<HashMap<String, Bucket>>,
    default_rpm: u32,
}

impl RateLimiter {
    /// `max_concurrent == 0` means unbounded: no semaphore is built at
    /// all, so `acquire` never blocks on global concurrency.
    pub fn new(max_concurrent: usize, default_rpm: u32) -> Self {
        Self {
            global: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
            buckets: Mutex::new(HashMap::new()),
            default_rpm,
        }
    }

    /// Acquire both gates for `model`, racing against the context's
    /// cancellation/deadline. `rpm` overrides the limiter's default for
    /// this model only (e.g. from registry per-model config);
    /// `rpm == 0` means this model has no RPM ceiling.
    pub async fn acquire(&self, ctx: &RunContext, model: &str, rpm: Option<u32>) -> AcquireOutcome {
        let rpm = rpm.unwrap_or(self.default_rpm);

        if rpm > 0 {
            loop {
                let wait = {
                    let mut buckets = self.buckets.lock().await;
                    let bucket = buckets
                        .entry(model.to_string())
                        .or_insert_with(|| Bucket::new(rpm));
                    if bucket.try_take() {
                        None
                    } else {
                        Some(bucket.wait_estimate())
                    }
                };
                match wait {
                    None => break,
                    Some(duration) => {
                        tokio::select! {
                            biased;
                            reason = ctx.stopped() => {
                                return match reason {
                                    StopReason::Cancelled => AcquireOutcome::Cancelled,
                                    StopReason::DeadlineExceeded => AcquireOutcome::DeadlineExceeded,
                                };
                            }
                            () = tokio::time::sleep(duration) => {}
                        }
                    }
                }
            }
        }

        let permit = match &self.global {
            None => None,
            Some(sem) => {
                let sem = Arc::clone(sem);
                tokio::select! {
                    biased;
                    reason = ctx.stopped() => {
                        return match reason {
                            StopReason::Cancelled => AcquireOutcome::Cancelled,
                            StopReason::DeadlineExceeded => AcquireOutcome::DeadlineExceeded,
                        };
                    }
                    permit = sem.acquire_owned() => {
                        match permit {
                            Ok(permit) => Some(permit),
                            Err(_closed) => return AcquireOutcome::Cancelled,
                        }
                    }
                }
            }
        };

        AcquireOutcome::Granted(ReleaseHandle { _permit: permit })
    }
}
