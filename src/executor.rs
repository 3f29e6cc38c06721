use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::error::AcquireError;
use crate::hands::BrowserSession;
use crate::types::{ActionPlan, AgentAction, DownloadResult, DOC_EXTENSION, DOWNLOAD_WAIT_SECS};

/// Download-control candidates, evaluated in order. Main-page selectors
/// first; the same-origin iframe probe runs only if none of these match.
pub const DOWNLOAD_BUTTON_SELECTORS: &[&str] = &[
    "[aria-label='Download']",
    "[aria-label='Download file']",
    "button[aria-label*='Download']",
    "div[aria-label='Download']",
    "div[data-tooltip='Download']",
    "a[role='button'][aria-label*='Download']",
];

/// "More actions" (overflow) control candidates, evaluated in order.
pub const OVERFLOW_MENU_SELECTORS: &[&str] = &[
    "button[aria-label*='More actions']",
    "div[aria-label*='More actions']",
    "[role='button'][aria-label*='More actions']",
];

/// Drive the browser through the interaction sequence for one chosen
/// action. Every download-expecting branch snapshots the downloads
/// directory, interacts, then waits (bounded) for the file to land.
pub async fn execute(session: &BrowserSession, plan: &ActionPlan) -> Result<DownloadResult> {
    match plan.action {
        AgentAction::ClickDownloadAnyway => {
            let before = session.snapshot_downloads();
            if !click_download_anyway(session).await? {
                return Err(AcquireError::ControlNotFound {
                    action: "CLICK_DOWNLOAD_ANYWAY",
                    reason: "the warning control was not visible".into(),
                }
                .into());
            }
            resolve_download(session, before).await
        }

        AgentAction::ClickDownloadButton => {
            let before = session.snapshot_downloads();
            if !click_download_button(session).await? {
                return Err(AcquireError::ControlNotFound {
                    action: "CLICK_DOWNLOAD_BUTTON",
                    reason: "no download button matched any selector".into(),
                }
                .into());
            }
            dismiss_secondary_warning(session).await;
            resolve_download(session, before).await
        }

        AgentAction::OpenOverflowMenuAndDownload => {
            let before = session.snapshot_downloads();
            if !overflow_menu_download(session).await? {
                return Err(AcquireError::ControlNotFound {
                    action: "OPEN_OVERFLOW_MENU_AND_DOWNLOAD",
                    reason: "overflow menu route failed".into(),
                }
                .into());
            }
            dismiss_secondary_warning(session).await;
            resolve_download(session, before).await
        }

        AgentAction::RefreshAndRetrySelectors => {
            info!("refreshing page before retrying selectors");
            session.reload().await?;
            let before = session.snapshot_downloads();
            if click_download_button(session).await? {
                dismiss_secondary_warning(session).await;
                return resolve_download(session, before).await;
            }
            info!("no download button after refresh; falling back to overflow menu");
            if overflow_menu_download(session).await? {
                dismiss_secondary_warning(session).await;
                return resolve_download(session, before).await;
            }
            Err(AcquireError::ControlNotFound {
                action: "REFRESH_AND_RETRY_SELECTORS",
                reason: "no download route found after refresh".into(),
            }
            .into())
        }

        AgentAction::FailGiveUp => Err(AcquireError::PlannerGaveUp {
            rationale: plan.rationale.clone(),
        }
        .into()),
    }
}

/// Wait for the triggered download and enforce the document extension.
async fn resolve_download(
    session: &BrowserSession,
    before: HashSet<OsString>,
) -> Result<DownloadResult> {
    let path = session
        .wait_for_download(&before, Duration::from_secs(DOWNLOAD_WAIT_SECS))
        .await?;
    ensure_doc_extension(path)
}

/// The persisted name always ends in the expected extension; a file whose
/// suggested name lacks it is renamed in place. Collisions are last-write-
/// wins by design.
fn ensure_doc_extension(path: PathBuf) -> Result<DownloadResult> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("downloaded_doc{DOC_EXTENSION}"));

    if file_name.to_lowercase().ends_with(DOC_EXTENSION) {
        return Ok(DownloadResult { path, file_name });
    }

    let corrected = format!("{file_name}{DOC_EXTENSION}");
    let corrected_path = path.with_file_name(&corrected);
    std::fs::rename(&path, &corrected_path)?;
    info!(from = %file_name, to = %corrected, "appended document extension");
    Ok(DownloadResult {
        path: corrected_path,
        file_name: corrected,
    })
}

/// Click the "proceed past warning" control if it is visible right now.
async fn click_download_anyway(session: &BrowserSession) -> Result<bool> {
    let clicked = session
        .evaluate_bool(click_labeled_control_js("Download anyway"))
        .await?;
    if clicked {
        info!("clicked 'Download anyway'");
    }
    Ok(clicked)
}

/// Some routes surface a second warning dialog after the main click; probe
/// for it without treating its absence as an error.
async fn dismiss_secondary_warning(session: &BrowserSession) {
    tokio::time::sleep(Duration::from_secs(1)).await;
    let _ = click_download_anyway(session).await;
}

/// Walk the selector cascade on the main page, then probe same-origin
/// iframes. Returns whether anything was clicked.
async fn click_download_button(session: &BrowserSession) -> Result<bool> {
    for (idx, selector) in DOWNLOAD_BUTTON_SELECTORS.iter().enumerate() {
        if session
            .evaluate_bool(click_first_visible_js(selector))
            .await?
        {
            info!(candidate = idx, selector, "download selector hit (main)");
            return Ok(true);
        }
    }

    info!("searching for download control inside iframes");
    if session.evaluate_bool(IFRAME_DOWNLOAD_JS.to_string()).await? {
        info!("download selector hit (iframe)");
        return Ok(true);
    }
    Ok(false)
}

/// "More actions" → brief menu-render wait → "Download" menu item (by
/// role, falling back to exact text).
async fn overflow_menu_download(session: &BrowserSession) -> Result<bool> {
    let mut opened = false;
    for selector in OVERFLOW_MENU_SELECTORS {
        if session
            .evaluate_bool(click_first_visible_js(selector))
            .await?
        {
            opened = true;
            break;
        }
    }
    if !opened {
        info!("overflow menu not found");
        return Ok(false);
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    let clicked = session
        .evaluate_bool(click_menu_item_js("Download"))
        .await?;
    if clicked {
        info!("clicked overflow 'Download'");
    }
    Ok(clicked)
}

/// JS: force-click the first visible match for `selector`.
fn click_first_visible_js(selector: &str) -> String {
    let sel = serde_json::Value::String(selector.to_string());
    format!(
        r#"
(() => {{
  try {{
    const els = document.querySelectorAll({sel});
    for (const el of els) {{
      const s = getComputedStyle(el);
      if (el.offsetParent === null || s.display === 'none' ||
          s.visibility === 'hidden' || s.opacity === '0') continue;
      el.click();
      return true;
    }}
  }} catch (e) {{}}
  return false;
}})()
"#
    )
}

/// JS: click a visible button-like control whose accessible label or text
/// matches `label`.
fn click_labeled_control_js(label: &str) -> String {
    let target = serde_json::Value::String(label.to_string());
    format!(
        r#"
(() => {{
  const target = {target}.toLowerCase();
  const els = document.querySelectorAll("button, [role='button'], div[aria-label]");
  for (const el of els) {{
    try {{
      const s = getComputedStyle(el);
      if (el.offsetParent === null || s.display === 'none' ||
          s.visibility === 'hidden' || s.opacity === '0') continue;
      const aria = (el.getAttribute('aria-label') || '').trim().toLowerCase();
      const text = (el.innerText || '').trim().toLowerCase();
      if (aria === target || text === target) {{
        el.click();
        return true;
      }}
    }} catch (e) {{ continue; }}
  }}
  return false;
}})()
"#
    )
}

/// JS: click a menu item by role, falling back to an exact text match.
fn click_menu_item_js(label: &str) -> String {
    let target = serde_json::Value::String(label.to_string());
    format!(
        r#"
(() => {{
  const target = {target}.toLowerCase();
  const byRole = document.querySelectorAll("[role='menuitem']");
  for (const el of byRole) {{
    const name = ((el.getAttribute('aria-label') || el.innerText) || '').trim().toLowerCase();
    if (name === target || name.startsWith(target)) {{
      el.click();
      return true;
    }}
  }}
  const all = document.querySelectorAll("div, span, a");
  for (const el of all) {{
    if (el.children.length === 0 && (el.innerText || '').trim().toLowerCase() === target) {{
      el.click();
      return true;
    }}
  }}
  return false;
}})()
"#
    )
}

/// JS: probe same-origin iframes for a labelled download control.
/// Cross-origin frames throw on access; those are swallowed per-frame.
const IFRAME_DOWNLOAD_JS: &str = r#"
(() => {
  for (let i = 0; i < window.frames.length; i++) {
    try {
      const doc = window.frames[i].document;
      const el = doc.querySelector("[aria-label='Download'], button[aria-label*='Download']");
      if (el) {
        el.click();
        return true;
      }
    } catch (e) { continue; }
  }
  return false;
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_cascade_prefers_exact_label() {
        assert_eq!(DOWNLOAD_BUTTON_SELECTORS[0], "[aria-label='Download']");
        assert!(!DOWNLOAD_BUTTON_SELECTORS.is_empty());
        assert!(!OVERFLOW_MENU_SELECTORS.is_empty());
    }

    #[test]
    fn selector_embeds_as_js_string_literal() {
        let js = click_first_visible_js("div[data-tooltip='Download']");
        assert!(js.contains(r#""div[data-tooltip='Download']""#));
    }

    #[test]
    fn extension_appended_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let odd = tmp.path().join("report");
        std::fs::write(&odd, b"x").unwrap();

        let result = ensure_doc_extension(odd.clone()).unwrap();
        assert_eq!(result.file_name, "report.pdf");
        assert!(result.path.exists());
        assert!(!odd.exists());
    }

    #[test]
    fn extension_kept_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("Report.PDF");
        std::fs::write(&pdf, b"x").unwrap();

        let result = ensure_doc_extension(pdf.clone()).unwrap();
        assert_eq!(result.file_name, "Report.PDF");
        assert_eq!(result.path, pdf);
    }
}
