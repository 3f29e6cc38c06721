use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use crate::brain::PlannerOracle;
use crate::executor;
use crate::guard::TimeGuard;
use crate::handoff::HandoffRecord;
use crate::hands::BrowserSession;
use crate::retry::{self, RetryPolicy};
use crate::sandbox::Sandbox;

/// The acquisition agent: a bounded plan-execute-retry loop around one
/// browser-driven download, ending in a written handoff record.
pub struct DownloadAgent {
    planner: PlannerOracle,
    sandbox: Sandbox,
    policy: RetryPolicy,
}

impl DownloadAgent {
    pub fn new(api_key: String, sandbox: Sandbox) -> Self {
        info!("acquisition agent init: reasoner=gpt-5-mini executor=headless-chrome");
        Self {
            planner: PlannerOracle::new(api_key),
            sandbox,
            policy: RetryPolicy::default(),
        }
    }

    /// Acquire the document at `url`, retrying whole attempts under the
    /// policy. The final attempt's error reaches the caller unchanged.
    pub async fn run(&self, url: &str, budget: Duration) -> Result<HandoffRecord> {
        info!(%url, budget_secs = budget.as_secs(), "acquisition start");
        retry::run(&self.policy, |attempt| self.attempt(url, budget, attempt)).await
    }

    /// One full attempt: fresh browser session, watchdog race, forensic
    /// screenshot on failure, teardown regardless of outcome.
    async fn attempt(&self, url: &str, budget: Duration, attempt: u32) -> Result<HandoffRecord> {
        info!(attempt, "starting attempt");
        let session = BrowserSession::launch(self.sandbox.downloads_dir.clone()).await?;
        let guard = TimeGuard::new(budget);

        let result = tokio::select! {
            res = self.drive(&session, url, attempt) => res,
            err = guard.expired() => Err(err.into()),
        };

        if let Err(ref e) = result {
            error!(attempt, "attempt failed: {e:#}");
            session
                .capture_failure_screenshot("acquire_error", &self.sandbox.screenshots_dir)
                .await;
        }
        // Dropping the session tears the browser down on both paths.
        drop(session);
        result
    }

    /// The strictly sequential attempt body: navigate → observe → plan →
    /// execute → hash and write the handoff record.
    async fn drive(
        &self,
        session: &BrowserSession,
        url: &str,
        attempt: u32,
    ) -> Result<HandoffRecord> {
        session.navigate(url).await?;

        let observation = session.observe().await;
        info!(
            title = %observation.title,
            controls = observation.controls.len(),
            "page observed"
        );

        let plan = self.planner.plan(&observation, attempt).await?;
        let download = executor::execute(session, &plan).await?;

        let file_path = Sandbox::absolutize(&download.path)?;
        let notes = format!(
            "Downloaded via headless-chrome browser flow (no hosting-service API). \
             Terminal action: {}.",
            plan.action.wire_name()
        );
        let record = HandoffRecord::for_download(file_path, download.file_name, url, &notes)?;
        record.write(&self.sandbox.handoff_path)?;

        info!("acquisition attempt succeeded");
        Ok(record)
    }
}
