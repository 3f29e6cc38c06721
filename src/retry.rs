use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Bounded retry envelope with exponential backoff: an explicit policy
/// value rather than decorator-style control flow.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt after `attempt` (1-based): doubles from
    /// the base, clamped to the cap. Non-decreasing by construction.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_delay)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping the backoff delay
/// between failures. Each failure is logged with its attempt number before
/// any retry; the final attempt's error propagates verbatim.
pub async fn run<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, max = policy.max_attempts, "attempt failed: {e:#}");
                last_err = Some(e);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry policy allowed zero attempts")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_within_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        // clamped thereafter
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(30), Duration::from_secs(10));
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..10 {
            let d = policy.delay_for(attempt);
            assert!(d >= prev);
            assert!(d >= policy.base_delay && d <= policy.max_delay);
            prev = d;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts_and_keeps_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = run(&RetryPolicy::default(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow::anyhow!("boom on attempt {attempt}")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().to_string(), "boom on attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_midway_without_further_attempts() {
        let calls = AtomicU32::new(0);
        let result = run(&RetryPolicy::default(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(anyhow::anyhow!("flaky"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_every_time_when_op_always_fails() {
        // A planner that always gives up exhausts the envelope; nothing
        // masks the deterministic failure.
        let result: Result<()> = run(&RetryPolicy::default(), |_| async {
            Err(anyhow::Error::from(crate::error::AcquireError::PlannerGaveUp {
                rationale: "nothing to click".into(),
            }))
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::AcquireError>(),
            Some(crate::error::AcquireError::PlannerGaveUp { .. })
        ));
    }
}
