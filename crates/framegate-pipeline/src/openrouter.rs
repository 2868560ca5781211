//! OpenRouter chat-completions vision analyzer.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use serde::Deserialize;
use tracing::debug;

use framegate_core::config::AnalyzerConfig;
use framegate_core::types::{AnalysisOutput, CameraId};

use crate::analyzer::{extract_issues, AnalysisError, VisionAnalyzer};

const SYSTEM_PROMPT: &str = "You are a vision AI analyzing technician work. Identify safety issues, \
errors, equipment problems, and maintenance needs. Be concise and actionable.";

const USER_PROMPT: &str = "Analyze this frame from the maintenance camera. Look for: \
1) Safety violations 2) Equipment issues 3) Technician errors 4) Parts that need replacement";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenRouterAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    keywords: Vec<String>,
}

impl OpenRouterAnalyzer {
    pub fn new(config: &AnalyzerConfig, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            keywords: config.issue_keywords.clone(),
        })
    }

    fn api_key(&self) -> Result<String, AnalysisError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(AnalysisError::Config(format!(
                "{} is not set",
                self.api_key_env
            ))),
        }
    }
}

/// Chat-completions body carrying the frame as a JPEG data URL.
fn build_request_body(model: &str, payload: &[u8]) -> serde_json::Value {
    let image = general_purpose::STANDARD.encode(payload);
    serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": USER_PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", image) }
                    }
                ]
            }
        ]
    })
}

fn parse_reply(body: &str) -> Result<String, AnalysisError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::Transient(format!("Malformed completion: {}", e)))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AnalysisError::Transient("Completion had no content".to_string()))
}

#[async_trait]
impl VisionAnalyzer for OpenRouterAnalyzer {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn ensure_ready(&self) -> Result<(), AnalysisError> {
        self.api_key().map(|_| ())
    }

    async fn analyze(
        &self,
        camera_id: &CameraId,
        payload: &[u8],
    ) -> Result<AnalysisOutput, AnalysisError> {
        let api_key = self.api_key()?;
        let body = build_request_body(&self.model, payload);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transient(format!("Request failed: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AnalysisError::Transient(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(AnalysisError::Transient(format!(
                "Completion request failed: {} - {}",
                status, text
            )));
        }

        let analysis_text = parse_reply(&text)?;
        let detected_issues = extract_issues(&analysis_text, &self.keywords);
        debug!(
            camera_id = %camera_id,
            issues = detected_issues.len(),
            "Frame analyzed"
        );

        Ok(AnalysisOutput {
            analysis_text,
            detected_issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = build_request_body("some/model", &[0xff, 0xd8, 0xff]);
        assert_eq!(body["model"], "some/model");
        assert_eq!(body["messages"][0]["role"], "system");

        let parts = &body["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_parse_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Broken ladder rung."}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "Broken ladder rung.");
    }

    #[test]
    fn test_parse_reply_without_choices() {
        assert!(matches!(
            parse_reply(r#"{"choices":[]}"#),
            Err(AnalysisError::Transient(_))
        ));
        assert!(matches!(
            parse_reply("not json"),
            Err(AnalysisError::Transient(_))
        ));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = AnalyzerConfig {
            api_key_env: "FRAMEGATE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..AnalyzerConfig::default()
        };
        let analyzer = OpenRouterAnalyzer::new(&config, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            analyzer.ensure_ready(),
            Err(AnalysisError::Config(_))
        ));
    }
}
