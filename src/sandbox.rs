use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filesystem layout shared by the whole run: downloads, logs, screenshots,
/// and the handoff record. Built once in `main` and passed down; nothing
/// in this crate reaches for a global path.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub root: PathBuf,
    pub downloads_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub handoff_path: PathBuf,
}

impl Sandbox {
    /// Create the sandbox layout, making every directory if absent.
    pub fn bootstrap(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let sandbox = Self {
            downloads_dir: root.join("downloads"),
            logs_dir: root.join("logs"),
            screenshots_dir: root.join("screenshots"),
            handoff_path: root.join("handoff.json"),
            root,
        };
        for dir in [
            &sandbox.downloads_dir,
            &sandbox.logs_dir,
            &sandbox.screenshots_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating sandbox dir {}", dir.display()))?;
        }
        Ok(sandbox)
    }

    /// Install the process-wide tracing subscriber: console plus a file log
    /// under `logs/`. Init-once; the returned guard must outlive the run so
    /// the file writer flushes.
    pub fn init_logging(&self) -> Result<WorkerGuard> {
        let file_appender = tracing_appender::rolling::never(&self.logs_dir, "bravebird.log");
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "bravebird=info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

        Ok(guard)
    }

    /// Absolute form of a path inside the sandbox, for the handoff record.
    pub fn absolutize(path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }
}
