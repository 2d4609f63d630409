//! # Retry Controller
//!
//! Re-invokes one backend operation with exponential backoff.
//!
//! - Non-retryable errors stop immediately.
//! - `rate_limited` waits one extra doubling step.
//! - `timeout` is retried at most once.
//! - Cancellation is observed while an attempt runs and while sleeping.

use async_trait::async_trait;
use config::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use task_core::{TaskError, TaskErrorKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Timeout errors get this many attempts at most, whatever the policy says.
const MAX_TIMEOUT_ATTEMPTS: u32 = 2;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, TaskError>,
    pub attempts: u32,
    pub cancelled: bool
}

/// Stateless apart from its policy; cheap to clone per call.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>
}

impl RetryController {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Backoff before attempt `attempt + 1`, given the error that ended
    /// attempt `attempt`. Jitter is applied by [`RetryController::run`].
    pub fn delay_after(&self, attempt: u32, kind: TaskErrorKind) -> Duration {
        match kind {
            TaskErrorKind::RateLimited => self.policy.delay_for(attempt + 1),
            _ => self.policy.delay_for(attempt)
        }
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F, cancel: &CancellationToken) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        let mut timeouts = 0;
        let mut last_error: Option<TaskError> = None;

        loop {
            if cancel.is_cancelled() {
                return Self::cancelled(last_error, attempt);
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Self::cancelled(last_error, attempt),
                result = operation(attempt) => result
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        cancelled: false
                    };
                }
                Err(error) => error
            };

            if error.kind == TaskErrorKind::Timeout {
                timeouts += 1;
            }
            let exhausted = attempt >= max_attempts || timeouts >= MAX_TIMEOUT_ATTEMPTS;
            if !error.retryable || exhausted {
                debug!(
                    attempt,
                    kind = %error.kind,
                    retryable = error.retryable,
                    "Giving up on operation"
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                    cancelled: false
                };
            }

            let delay = self.jittered(self.delay_after(attempt, error.kind));
            warn!(
                attempt,
                max_attempts,
                kind = %error.kind,
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying: {}",
                error.message
            );
            last_error = Some(error);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Self::cancelled(last_error, attempt),
                () = self.sleeper.sleep(delay) => {}
            }
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.policy.jitter {
            return delay;
        }
        let factor = rand::random::<f32>() * 0.3 + 0.85;
        let max = Duration::from_millis(self.policy.max_delay_ms);
        Duration::from_millis((delay.as_millis() as f32 * factor) as u64).min(max)
    }

    fn cancelled<T>(last_error: Option<TaskError>, attempts: u32) -> RetryOutcome<T> {
        RetryOutcome {
            result: Err(last_error.unwrap_or_else(|| TaskError::timeout("operation cancelled"))),
            attempts,
            cancelled: true
        }
    }
}
