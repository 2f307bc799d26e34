use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{CompletionRequest, LlmClient, Provider, status_error};
use crate::error::{Result, StoryError};
use crate::logw;

const MAX_PROMPT_CHARS: usize = 320_000;
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// OpenAI chat-completions client. OpenRouter speaks the same protocol, so
/// it is the same client with a different base URL and attribution headers.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    provider: Provider,
    extra_headers: Vec<(&'static str, String)>,
}

impl OpenAiClient {
    pub fn openai(http: Client, api_key: &str, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            provider: Provider::OpenAi,
            extra_headers: Vec::new(),
        }
    }

    pub fn openrouter(http: Client, api_key: &str, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            provider: Provider::OpenRouter,
            extra_headers: vec![("X-Title", "story-forge".to_string())],
        }
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let prompt = super::trim_copy_utf8_safe(&request.prompt, MAX_PROMPT_CHARS);

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if request.json {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

fn extract_message_content(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error message: {}", msg));
        }
        return None;
    }

    let choices = root.get("choices")?.as_array()?;
    let first = choices.first()?;
    first
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| StoryError::Api(format!("{} request failed: {e}", self.provider.as_str())))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(status_error(self.provider, status, &raw));
        }

        extract_message_content(&raw).ok_or_else(|| {
            logw(format!("{} response parse failed.", self.provider.as_str()));
            StoryError::Api(format!(
                "{} returned no message content",
                self.provider.as_str()
            ))
        })
    }
}
