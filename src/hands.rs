use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use headless_chrome::protocol::cdp::Browser::{
    SetDownloadBehavior, SetDownloadBehaviorBehaviorOption,
};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{info, warn};

use crate::error::AcquireError;
use crate::types::{PageObservation, NAVIGATION_TIMEOUT_SECS, SETTLE_AFTER_NAV_SECS};
use crate::dom;

/// One live Chrome session, exclusively owned by one acquisition attempt.
/// The blocking headless_chrome client is bridged into the async world with
/// `spawn_blocking`; dropping the session tears the browser down.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
    downloads_dir: PathBuf,
}

impl BrowserSession {
    /// Launch Chrome with downloads routed into the sandbox directory.
    pub async fn launch(downloads_dir: PathBuf) -> Result<Self> {
        let dir = downloads_dir.clone();
        tokio::task::spawn_blocking(move || Self::launch_blocking(dir))
            .await
            .map_err(|e| anyhow!("browser launch panicked: {e}"))?
    }

    fn launch_blocking(downloads_dir: PathBuf) -> Result<Self> {
        let options = LaunchOptions {
            headless: false,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!("launching Chrome");
        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(Duration::from_secs(NAVIGATION_TIMEOUT_SECS));
        tab.set_user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            None,
            None,
        )?;

        // Route downloads into the sandbox instead of prompting.
        tab.call_method(SetDownloadBehavior {
            behavior: SetDownloadBehaviorBehaviorOption::Allow,
            browser_context_id: None,
            download_path: Some(downloads_dir.to_string_lossy().into_owned()),
            events_enabled: Some(true),
        })?;

        Ok(Self {
            _browser: browser,
            tab,
            downloads_dir,
        })
    }

    /// Navigate and give page scripts a moment to settle.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        info!(%url, "navigating");
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("navigation task panicked: {e}"))??;
        tokio::time::sleep(Duration::from_secs(SETTLE_AFTER_NAV_SECS)).await;
        Ok(())
    }

    /// Reload the current page and wait for it to settle again.
    pub async fn reload(&self) -> Result<()> {
        let tab = self.tab.clone();
        info!("reloading page");
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.reload(false, None)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("reload task panicked: {e}"))??;
        tokio::time::sleep(Duration::from_secs(SETTLE_AFTER_NAV_SECS)).await;
        Ok(())
    }

    /// Snapshot the page into a bounded observation for the planner.
    pub async fn observe(&self) -> PageObservation {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || dom::observe(&tab))
            .await
            .unwrap_or_default()
    }

    /// Run a JS expression, expecting a string result.
    pub async fn evaluate_string(&self, js: String) -> Result<String> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || dom::evaluate_string(&tab, &js))
            .await
            .map_err(|e| anyhow!("evaluate task panicked: {e}"))?
    }

    /// Run a JS expression, expecting a boolean result.
    pub async fn evaluate_bool(&self, js: String) -> Result<bool> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || dom::evaluate_bool(&tab, &js))
            .await
            .map_err(|e| anyhow!("evaluate task panicked: {e}"))?
    }

    /// Names currently present in the downloads directory; taken before a
    /// download-triggering interaction so the new file can be told apart.
    pub fn snapshot_downloads(&self) -> HashSet<OsString> {
        let mut names = HashSet::new();
        if let Ok(entries) = std::fs::read_dir(&self.downloads_dir) {
            for entry in entries.flatten() {
                names.insert(entry.file_name());
            }
        }
        names
    }

    /// Wait for a new, fully written file to land in the downloads
    /// directory.
    pub async fn wait_for_download(
        &self,
        before: &HashSet<OsString>,
        timeout: Duration,
    ) -> Result<PathBuf> {
        wait_for_download_in(&self.downloads_dir, before, timeout).await
    }

    /// Capture a full-page PNG to `dir` with a timestamped name. Forensic
    /// only: failures are logged and swallowed so capture can never crash
    /// the failure path it runs on.
    pub async fn capture_failure_screenshot(&self, label: &str, dir: &Path) {
        let tab = self.tab.clone();
        let out = dir.join(format!(
            "{label}_{}.png",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let shot = tokio::task::spawn_blocking(move || {
            tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await;
        match shot {
            Ok(Ok(bytes)) => match std::fs::write(&out, bytes) {
                Ok(()) => info!(path = %out.display(), "saved failure screenshot"),
                Err(e) => warn!("screenshot write failed: {e}"),
            },
            Ok(Err(e)) => warn!("screenshot capture failed: {e}"),
            Err(e) => warn!("screenshot task panicked: {e}"),
        }
    }
}

/// Poll `dir` until a new, fully written file shows up. Chrome writes
/// `.crdownload` placeholders while a download is in flight; a download
/// counts as finished once a name that was not in `before` carries no
/// in-progress marker and holds a stable size across two polls.
async fn wait_for_download_in(
    dir: &Path,
    before: &HashSet<OsString>,
    timeout: Duration,
) -> Result<PathBuf> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut pending: Option<(PathBuf, u64)> = None;

    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(500)).await;

        if let Some((path, size)) = pending.take() {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.len() == size => {
                    info!(path = %path.display(), bytes = size, "download finished");
                    return Ok(path);
                }
                Ok(meta) => pending = Some((path, meta.len())),
                Err(_) => {}
            }
            continue;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if before.contains(&name) {
                continue;
            }
            let lossy = name.to_string_lossy();
            if lossy.ends_with(".crdownload") || lossy.starts_with(".com.google.Chrome") {
                continue;
            }
            let path = entry.path();
            if let Ok(meta) = entry.metadata() {
                pending = Some((path, meta.len()));
                break;
            }
        }
    }

    Err(AcquireError::DownloadNotStarted {
        timeout_secs: timeout.as_secs(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolves_a_new_stable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let before = HashSet::new();
        std::fs::write(tmp.path().join("report.pdf"), b"content").unwrap();

        let path = wait_for_download_in(tmp.path(), &before, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "report.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_files_present_before_the_click() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("old.pdf"), b"stale").unwrap();
        let mut before = HashSet::new();
        before.insert(OsString::from("old.pdf"));

        let err = wait_for_download_in(tmp.path(), &before, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AcquireError>(),
            Some(AcquireError::DownloadNotStarted { timeout_secs: 5 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn in_progress_marker_alone_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let before = HashSet::new();
        std::fs::write(tmp.path().join("report.pdf.crdownload"), b"partial").unwrap();

        let err = wait_for_download_in(tmp.path(), &before, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AcquireError>(),
            Some(AcquireError::DownloadNotStarted { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn file_appearing_mid_wait_is_picked_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let before = HashSet::new();

        let writer = tokio::spawn({
            let dir = dir.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                std::fs::write(dir.join("late.pdf"), b"bytes").unwrap();
            }
        });

        let path = wait_for_download_in(&dir, &before, Duration::from_secs(60))
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(path.file_name().unwrap(), "late.pdf");
    }
}
