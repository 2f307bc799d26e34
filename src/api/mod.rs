//! Chat-completion clients for the hosted model providers, plus the
//! initializer that turns resolved user settings into per-role handles.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, StoryError};
use crate::logw;
use crate::settings::GenerationSettings;

pub mod anthropic;
pub mod openai;
pub mod scripted;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use scripted::ScriptedClient;

const ERROR_SNIPPET_CHARS: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    OpenRouter,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Anthropic => "anthropic",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response where supported.
    pub json: bool,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// A client bound to one model name.
#[derive(Clone)]
pub struct ModelHandle {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
}

impl ModelHandle {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub async fn ask(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: system.map(str::to_string),
            prompt: prompt.to_string(),
            ..Default::default()
        };
        self.client.complete(&request).await
    }

    pub async fn ask_json(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: system.map(str::to_string),
            prompt: prompt.to_string(),
            json: true,
            ..Default::default()
        };
        self.client.complete(&request).await
    }
}

/// The three model roles the story pipeline talks to.
#[derive(Clone)]
pub struct ModelRoles {
    pub writer: ModelHandle,
    pub judge: ModelHandle,
    pub style: ModelHandle,
}

impl ModelRoles {
    /// All roles share one client, distinguished only by model name.
    pub fn shared(client: Arc<dyn LlmClient>, writer: &str, judge: &str, style: &str) -> Self {
        Self {
            writer: ModelHandle::new(client.clone(), writer),
            judge: ModelHandle::new(client.clone(), judge),
            style: ModelHandle::new(client, style),
        }
    }
}

pub trait ClientFactory: Send + Sync {
    fn roles(&self, settings: &GenerationSettings) -> Result<ModelRoles>;
}

/// Builds reqwest-backed provider clients from the resolved API keys.
pub struct HttpClientFactory {
    http: reqwest::Client,
    openai_base_url: String,
    openrouter_base_url: String,
    anthropic_base_url: String,
}

impl HttpClientFactory {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StoryError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            openai_base_url: cfg.openai_base_url.clone(),
            openrouter_base_url: cfg.openrouter_base_url.clone(),
            anthropic_base_url: cfg.anthropic_base_url.clone(),
        })
    }

    fn client_for(&self, settings: &GenerationSettings) -> Result<Arc<dyn LlmClient>> {
        let key = settings.keys.for_provider(settings.provider);
        if key.is_empty() {
            return Err(StoryError::Config(format!(
                "no API key configured for provider {}",
                settings.provider.as_str()
            )));
        }

        let client: Arc<dyn LlmClient> = match settings.provider {
            Provider::OpenAi => Arc::new(OpenAiClient::openai(
                self.http.clone(),
                key,
                &self.openai_base_url,
            )),
            Provider::OpenRouter => Arc::new(OpenAiClient::openrouter(
                self.http.clone(),
                key,
                &self.openrouter_base_url,
            )),
            Provider::Anthropic => Arc::new(AnthropicClient::new(
                self.http.clone(),
                key,
                &self.anthropic_base_url,
            )),
        };
        Ok(client)
    }
}

impl ClientFactory for HttpClientFactory {
    fn roles(&self, settings: &GenerationSettings) -> Result<ModelRoles> {
        let client = self.client_for(settings)?;
        Ok(ModelRoles::shared(
            client,
            &settings.writer_model,
            &settings.judge_model,
            &settings.style_model,
        ))
    }
}

pub(crate) fn trim_copy_utf8_safe(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }

    let mut cut = max_bytes.min(input.len());
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input[..cut].to_string()
}

/// Maps a non-success HTTP status to the error taxonomy, logging the body.
pub(crate) fn status_error(provider: Provider, status: StatusCode, body: &str) -> StoryError {
    logw(format!("{} HTTP {}", provider.as_str(), status.as_u16()));
    let snippet = trim_copy_utf8_safe(body, ERROR_SNIPPET_CHARS);
    if !snippet.is_empty() {
        logw(format!("{} raw body: {}", provider.as_str(), snippet));
    }

    let message = extract_error_message(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    match status {
        StatusCode::TOO_MANY_REQUESTS => StoryError::RateLimited(message),
        StatusCode::UNAUTHORIZED => StoryError::Unauthorized(message),
        StatusCode::FORBIDDEN => StoryError::Forbidden(message),
        _ => StoryError::Api(format!("{} {}: {}", provider.as_str(), status.as_u16(), message)),
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = root.get("error")?;
    if let Some(msg) = err.as_str() {
        return Some(msg.to_string());
    }
    err.get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
