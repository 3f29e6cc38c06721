use std::sync::Arc;

use anyhow::Result;
use headless_chrome::Tab;

use crate::types::{
    PageObservation, CONTROL_LABEL_MAX_CHARS, CONTROL_SCAN_LIMIT, OBSERVATION_CONTROL_CAP,
};

/// JavaScript injected into the page to list visible button-like controls.
/// NON-DESTRUCTIVE: reads the DOM without modifying styles or layout.
///
/// The script:
///   1. Queries button elements, ARIA-role buttons, and labelled containers.
///   2. Keeps only currently visible elements, up to a fixed scan limit.
///   3. Prefers the accessible label (aria-label) over inner text.
///   4. Swallows per-element failures so one bad node cannot abort the scan.
///   5. Returns the raw labels as a JSON array string.
const CONTROLS_JS: &str = r#"
(() => {
  const els = document.querySelectorAll(
    "button, [role='button'], a[role='button'], div[aria-label], button[aria-label]"
  );
  const out = [];
  const limit = Math.min(els.length, __SCAN_LIMIT__);
  for (let i = 0; i < limit; i++) {
    try {
      const el = els[i];
      const s = getComputedStyle(el);
      if (el.offsetParent === null || s.display === 'none' ||
          s.visibility === 'hidden' || s.opacity === '0') continue;
      const aria = (el.getAttribute('aria-label') || '').trim();
      const text = (el.innerText || '').trim();
      const label = aria || text;
      if (label) out.push(label);
    } catch (e) { continue; }
  }
  return JSON.stringify(out);
})()
"#;

/// Snapshot the page into a bounded observation. Never fails: title, URL
/// and control list each degrade to empty on error.
pub fn observe(tab: &Arc<Tab>) -> PageObservation {
    PageObservation {
        title: evaluate_string(tab, "document.title").unwrap_or_default(),
        url: evaluate_string(tab, "window.location.href").unwrap_or_default(),
        controls: collect_controls(tab).unwrap_or_default(),
    }
}

fn collect_controls(tab: &Arc<Tab>) -> Result<Vec<String>> {
    let js = CONTROLS_JS.replace("__SCAN_LIMIT__", &CONTROL_SCAN_LIMIT.to_string());
    let raw = evaluate_string(tab, &js)?;
    let labels: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
    Ok(normalize_labels(labels))
}

/// Evaluate a JS expression and pull out its string value.
pub fn evaluate_string(tab: &Arc<Tab>, js: &str) -> Result<String> {
    let result = tab.evaluate(js, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

/// Evaluate a JS expression expected to yield a boolean.
pub fn evaluate_bool(tab: &Arc<Tab>, js: &str) -> Result<bool> {
    let result = tab.evaluate(js, false)?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

/// Collapse whitespace, truncate each label, drop duplicates keeping the
/// first occurrence, and cap the list.
pub fn normalize_labels(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for label in raw {
        let collapsed: String = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        let truncated: String = collapsed.chars().take(CONTROL_LABEL_MAX_CHARS).collect();
        if seen.insert(truncated.clone()) {
            out.push(truncated);
            if out.len() == OBSERVATION_CONTROL_CAP {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_twenty_five_preserving_first_seen_order() {
        let raw: Vec<String> = (0..40).map(|i| format!("Button {i}")).collect();
        let out = normalize_labels(raw);
        assert_eq!(out.len(), OBSERVATION_CONTROL_CAP);
        assert_eq!(out[0], "Button 0");
        assert_eq!(out[24], "Button 24");
    }

    #[test]
    fn dedups_before_capping() {
        let raw = vec![
            "Download".to_string(),
            "Download".to_string(),
            "Share".to_string(),
        ];
        assert_eq!(normalize_labels(raw), vec!["Download", "Share"]);
    }

    #[test]
    fn collapses_whitespace_and_truncates() {
        let raw = vec![format!("  Download\n\t {}  ", "x".repeat(200))];
        let out = normalize_labels(raw);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("Download x"));
        assert_eq!(out[0].chars().count(), CONTROL_LABEL_MAX_CHARS);
    }

    #[test]
    fn drops_empty_labels() {
        let raw = vec!["   ".to_string(), String::new(), "Ok".to_string()];
        assert_eq!(normalize_labels(raw), vec!["Ok"]);
    }
}
