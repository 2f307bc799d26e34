use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{CompletionRequest, LlmClient, Provider, status_error};
use crate::error::{Result, StoryError};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 600;

pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(http: Client, api_key: &str, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Joins every `text` block of a messages response.
fn extract_text(root: &serde_json::Value) -> Option<String> {
    let blocks = root.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut prompt = request.prompt.clone();
        if request.json {
            prompt.push_str("\n\nOutput ONLY valid JSON.");
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| StoryError::Api(format!("anthropic request failed: {e}")))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error(Provider::Anthropic, status, &raw));
        }

        let root: serde_json::Value = serde_json::from_str(&raw)?;
        extract_text(&root)
            .ok_or_else(|| StoryError::Api("anthropic returned no text content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    #[tokio::test]
    async fn concatenates_text_blocks() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/messages")
                    .header("x-api-key", "ak")
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .body_includes("\"system\":\"judge\"");
                then.status(200).json_body(json!({
                    "content": [
                        {"type": "text", "text": "NO_"},
                        {"type": "text", "text": "INCONSISTENCIES"}
                    ]
                }));
            })
            .await;

        let client = AnthropicClient::new(Client::new(), "ak", &server.base_url());
        let request = CompletionRequest {
            model: "claude-3-5-sonnet-latest".into(),
            system: Some("judge".into()),
            prompt: "compare".into(),
            ..Default::default()
        };
        assert_eq!(client.complete(&request).await.unwrap(), "NO_INCONSISTENCIES");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_typed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/messages");
                then.status(401)
                    .json_body(json!({"error": {"message": "invalid x-api-key"}}));
            })
            .await;

        let client = AnthropicClient::new(Client::new(), "bad", &server.base_url());
        let request = CompletionRequest {
            model: "m".into(),
            prompt: "p".into(),
            ..Default::default()
        };
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, StoryError::Unauthorized(_)));
    }
}
