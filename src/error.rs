use std::path::PathBuf;
use thiserror::Error;

/// Failures that end one acquisition attempt.
///
/// Everything here is retryable by the controller except that retries are
/// capped; the last attempt's error reaches the caller verbatim.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("time budget of {budget_secs}s exceeded after {elapsed_secs}s")]
    TimeBudgetExceeded { budget_secs: u64, elapsed_secs: u64 },

    #[error("planner chose {action} but {reason}")]
    ControlNotFound { action: &'static str, reason: String },

    #[error("download did not start within {timeout_secs}s")]
    DownloadNotStarted { timeout_secs: u64 },

    #[error("planner gave up: {rationale}")]
    PlannerGaveUp { rationale: String },
}

/// Rejections at the handoff boundary, before any indexing happens.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("handoff record not found at {0}")]
    RecordMissing(PathBuf),

    #[error("handoff record missing required field: {0}")]
    MissingField(String),

    #[error("handoff record is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("handoff file_path does not reference an existing file: {0}")]
    FileMissing(PathBuf),
}
