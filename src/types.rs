use serde::{Deserialize, Serialize};

/// One action from the closed vocabulary the planner is allowed to pick.
///
/// Wire values are the SCREAMING_SNAKE strings the planner is prompted
/// with; anything outside this set fails decode and is coerced to the
/// fallback plan by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAction {
    ClickDownloadAnyway,
    ClickDownloadButton,
    OpenOverflowMenuAndDownload,
    RefreshAndRetrySelectors,
    FailGiveUp,
}

impl AgentAction {
    /// Wire names, in the order they are offered to the planner.
    pub const ALLOWED: [&'static str; 5] = [
        "CLICK_DOWNLOAD_ANYWAY",
        "CLICK_DOWNLOAD_BUTTON",
        "OPEN_OVERFLOW_MENU_AND_DOWNLOAD",
        "REFRESH_AND_RETRY_SELECTORS",
        "FAIL_GIVE_UP",
    ];

    /// The wire name this action serializes to.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ClickDownloadAnyway => Self::ALLOWED[0],
            Self::ClickDownloadButton => Self::ALLOWED[1],
            Self::OpenOverflowMenuAndDownload => Self::ALLOWED[2],
            Self::RefreshAndRetrySelectors => Self::ALLOWED[3],
            Self::FailGiveUp => Self::ALLOWED[4],
        }
    }
}

/// What the planner replied: one allowed action plus advisory free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub action: AgentAction,
    #[serde(default)]
    pub rationale: String,
}

impl ActionPlan {
    /// Safe plan used whenever the planner's output cannot be trusted.
    pub fn fallback(reason: &str) -> Self {
        Self {
            action: AgentAction::RefreshAndRetrySelectors,
            rationale: format!("{reason}; fallback."),
        }
    }
}

/// Compact page snapshot handed to the planner before each decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageObservation {
    pub title: String,
    pub url: String,
    /// Visible button-like labels, deduplicated, first-seen order.
    pub controls: Vec<String>,
}

/// Where a finished download landed.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: std::path::PathBuf,
    pub file_name: String,
}

/// Extension every persisted document must carry.
pub const DOC_EXTENSION: &str = ".pdf";

/// How many candidate elements the extractor scans at most.
pub const CONTROL_SCAN_LIMIT: usize = 40;
/// How many unique labels make it into an observation.
pub const OBSERVATION_CONTROL_CAP: usize = 25;
/// Per-label character cap.
pub const CONTROL_LABEL_MAX_CHARS: usize = 80;

pub const NAVIGATION_TIMEOUT_SECS: u64 = 60;
pub const DOWNLOAD_WAIT_SECS: u64 = 60;
/// Grace period after navigation/reload for page scripts to settle.
pub const SETTLE_AFTER_NAV_SECS: u64 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_wire_names() {
        for name in AgentAction::ALLOWED {
            let action: AgentAction =
                serde_json::from_value(serde_json::Value::String(name.to_string())).unwrap();
            assert_eq!(serde_json::to_value(action).unwrap(), name);
        }
    }

    #[test]
    fn unknown_action_fails_decode() {
        let out = serde_json::from_str::<AgentAction>("\"CLICK_EVERYTHING\"");
        assert!(out.is_err());
    }

    #[test]
    fn plan_decodes_without_rationale() {
        let plan: ActionPlan = serde_json::from_str(r#"{"action":"FAIL_GIVE_UP"}"#).unwrap();
        assert_eq!(plan.action, AgentAction::FailGiveUp);
        assert!(plan.rationale.is_empty());
    }
}
