//! Per-task retry on transient errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::task::{Patch, RunContext, Task};
use crate::error::IndexerError;

/// Decides whether a failed attempt may be retried.
pub type TransientPredicate = fn(&IndexerError) -> bool;

/// Fixed attempt ceiling with exponential delay between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Cap on the delay.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay on each further attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            ..Default::default()
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base_ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Returns `true` if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Wraps a task so transient failures are re-invoked up to the policy's ceiling.
///
/// Cancellation is checked before every attempt and interrupts the delay
/// between attempts.
pub struct RetryingTask<P> {
    inner: Arc<dyn Task<P>>,
    policy: RetryPolicy,
    is_transient: TransientPredicate,
}

impl<P: Send + Sync> RetryingTask<P> {
    pub fn new(inner: Arc<dyn Task<P>>, policy: RetryPolicy, is_transient: TransientPredicate) -> Self {
        Self {
            inner,
            policy,
            is_transient,
        }
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> Task<P> for RetryingTask<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn writes(&self) -> &'static [&'static str] {
        self.inner.writes()
    }

    async fn run(&self, ctx: &RunContext, payload: &P) -> Result<Patch<P>, IndexerError> {
        let mut attempt = 0u32;
        loop {
            ctx.check()?;
            attempt += 1;
            match self.inner.run(ctx, payload).await {
                Ok(patch) => return Ok(patch),
                Err(e) if (self.is_transient)(&e) && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        task = self.inner.name(),
                        height = ctx.height(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient task failure, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(IndexerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if (self.is_transient)(&e) {
                        tracing::error!(
                            task = self.inner.name(),
                            height = ctx.height(),
                            attempt,
                            error = %e,
                            "task attempts exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        error: IndexerError,
    }

    #[async_trait]
    impl Task<()> for Flaky {
        fn name(&self) -> &'static str {
            "Flaky"
        }

        async fn run(&self, _ctx: &RunContext, _p: &()) -> Result<Patch<()>, IndexerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Err(self.error.clone())
            } else {
                Ok(Patch::none())
            }
        }
    }

    fn flaky(fail_times: u32, error: IndexerError) -> Arc<Flaky> {
        Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times,
            error,
        })
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    fn ctx() -> RunContext {
        RunContext::new(1, CancellationToken::new())
    }

    #[test]
    fn delays_grow_and_cap() {
        let p = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_attempt_limit() {
        let inner = flaky(2, IndexerError::Rpc("reset".into()));
        let task = RetryingTask::new(inner.clone(), policy(), IndexerError::is_transient);
        assert!(task.run(&ctx(), &()).await.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_fails() {
        let inner = flaky(5, IndexerError::Rpc("reset".into()));
        let task = RetryingTask::new(inner.clone(), policy(), IndexerError::is_transient);
        assert!(matches!(task.run(&ctx(), &()).await, Err(IndexerError::Rpc(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let inner = flaky(5, IndexerError::validation("block", "no hash"));
        let task = RetryingTask::new(inner.clone(), policy(), IndexerError::is_transient);
        assert!(task.run(&ctx(), &()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_first_attempt() {
        let inner = flaky(0, IndexerError::Rpc("unused".into()));
        let task = RetryingTask::new(inner.clone(), policy(), IndexerError::is_transient);
        let token = CancellationToken::new();
        token.cancel();
        let result = task.run(&RunContext::new(1, token), &()).await;
        assert!(matches!(result, Err(IndexerError::Cancelled)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }
}
