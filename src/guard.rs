use std::time::Duration;

use tokio::time::Instant;

use crate::error::AcquireError;

/// Whole-attempt wall-clock watchdog. Raced against the attempt body with
/// `tokio::select!`; when the attempt wins, dropping the future cancels the
/// watchdog. Step-level timeouts (navigation, download wait) are enforced
/// elsewhere; this only guards the overall ceiling.
pub struct TimeGuard {
    started: Instant,
    budget: Duration,
}

impl TimeGuard {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Resolves once the budget is exceeded, polling elapsed time once per
    /// second. Never resolves before then.
    pub async fn expired(&self) -> AcquireError {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let elapsed = self.started.elapsed();
            if elapsed > self.budget {
                return AcquireError::TimeBudgetExceeded {
                    budget_secs: self.budget.as_secs(),
                    elapsed_secs: elapsed.as_secs(),
                };
            }
        }
    }
}
