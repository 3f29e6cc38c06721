use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::types::{ActionPlan, AgentAction, PageObservation};

const MODEL: &str = "gpt-5-mini";

const SYSTEM_PROMPT: &str = "You are the download planner. Choose the next browser action to \
download a Google Drive PDF. You MUST choose one action from the allowed list and provide a \
short rationale. Output ONLY valid JSON matching the schema.";

/// The single trust boundary between free-form model output and the
/// deterministic executor: whatever comes back, only allow-listed actions
/// leave this adapter.
pub struct PlannerOracle {
    client: Client,
    api_key: String,
    base_url: String,
}

impl PlannerOracle {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com".to_string())
    }

    fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    /// Ask the model for the next action. Malformed or disallowed replies
    /// are coerced to the safe default plan; a transport failure falls
    /// back to the secondary channel, and only when both channels are
    /// unreachable does the attempt fail.
    pub async fn plan(&self, observation: &PageObservation, attempt: u32) -> Result<ActionPlan> {
        let request = json!({
            "attempt": attempt,
            "page_state": observation,
            "allowed_actions": AgentAction::ALLOWED,
            "json_schema": {
                "action": "one of allowed_actions",
                "rationale": "short string",
            },
        });

        let text = match self.ask_responses_api(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("responses API failed ({e:#}); falling back to chat completions");
                self.ask_chat_api(&request)
                    .await
                    .map_err(|e| anyhow!("planner unreachable on both channels: {e:#}"))?
            }
        };

        let plan = decode_plan(&text);
        info!(action = ?plan.action, rationale = %plan.rationale, "planner decision");
        Ok(plan)
    }

    /// Primary channel: the Responses API.
    async fn ask_responses_api(&self, request: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": MODEL,
                "input": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": request.to_string()},
                ],
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("responses API error ({status}): {msg}"));
        }
        extract_output_text(&body).ok_or_else(|| anyhow!("no output text in response: {body}"))
    }

    /// Secondary channel: classic chat completions.
    async fn ask_chat_api(&self, request: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": MODEL,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": request.to_string()},
                ],
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("chat API error ({status}): {msg}"));
        }
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("no content in chat response: {body}"))
    }
}

/// Pull the assistant text out of a Responses API body: the `output` array
/// holds typed items; we want the message's `output_text` parts.
fn extract_output_text(body: &serde_json::Value) -> Option<String> {
    let items = body["output"].as_array()?;
    let mut text = String::new();
    for item in items {
        if item["type"] == "message" {
            if let Some(parts) = item["content"].as_array() {
                for part in parts {
                    if part["type"] == "output_text" {
                        if let Some(t) = part["text"].as_str() {
                            text.push_str(t);
                        }
                    }
                }
            }
        }
    }
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Strict decode-or-coerce: strip possible markdown fences, then require a
/// well-formed plan whose action is in the closed vocabulary.
fn decode_plan(text: &str) -> ActionPlan {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<ActionPlan>(cleaned) {
        Ok(plan) => plan,
        Err(e) => {
            warn!("planner output rejected ({e}); content: {cleaned}");
            ActionPlan::fallback("Invalid or non-JSON planner output")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_plan() {
        let plan = decode_plan(r#"{"action":"CLICK_DOWNLOAD_BUTTON","rationale":"visible"}"#);
        assert_eq!(plan.action, AgentAction::ClickDownloadButton);
        assert_eq!(plan.rationale, "visible");
    }

    #[test]
    fn strips_markdown_fences() {
        let plan = decode_plan("```json\n{\"action\":\"FAIL_GIVE_UP\",\"rationale\":\"r\"}\n```");
        assert_eq!(plan.action, AgentAction::FailGiveUp);
    }

    #[test]
    fn disallowed_action_coerces_to_refresh() {
        let plan = decode_plan(r#"{"action":"DELETE_EVERYTHING","rationale":"no"}"#);
        assert_eq!(plan.action, AgentAction::RefreshAndRetrySelectors);
    }

    #[test]
    fn non_json_coerces_to_refresh() {
        let plan = decode_plan("I think you should click the big blue button");
        assert_eq!(plan.action, AgentAction::RefreshAndRetrySelectors);
    }

    #[test]
    fn extracts_responses_output_text() {
        let body = serde_json::json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"action\":\"FAIL_GIVE_UP\"}"}
                ]}
            ]
        });
        assert_eq!(
            extract_output_text(&body).unwrap(),
            "{\"action\":\"FAIL_GIVE_UP\"}"
        );
    }

    #[test]
    fn missing_output_text_is_none() {
        let body = serde_json::json!({"output": []});
        assert!(extract_output_text(&body).is_none());
    }

    #[tokio::test]
    async fn both_channels_unreachable_fails_the_attempt() {
        // Nothing listens on this port; both channels fail at transport
        // level, which must surface as an error, not a coerced plan.
        let oracle =
            PlannerOracle::with_base_url("test-key".into(), "http://127.0.0.1:9".into());
        let err = oracle
            .plan(&PageObservation::default(), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("planner unreachable"));
    }
}
