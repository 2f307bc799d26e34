//! Per-user and per-channel generation settings, read from a JSON document
//! keyed by username.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::api::Provider;
use crate::config::Config;
use crate::error::{Result, StoryError};
use crate::profile::DEFAULT_PROFILE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub openai: String,
    #[serde(default)]
    pub openrouter: String,
    #[serde(default)]
    pub anthropic: String,
}

impl ApiKeys {
    pub fn for_provider(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::OpenRouter => &self.openrouter,
            Provider::Anthropic => &self.anthropic,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            openai: cfg.openai_api_key.clone(),
            openrouter: cfg.openrouter_api_key.clone(),
            anthropic: cfg.anthropic_api_key.clone(),
        }
    }
}

/// Optional overrides; unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOverrides {
    pub provider: Option<Provider>,
    pub writer_model: Option<String>,
    pub judge_model: Option<String>,
    pub style_model: Option<String>,
    pub profile: Option<String>,
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub theme: Option<String>,
    #[serde(default)]
    pub notifications: bool,
    #[serde(default)]
    pub generation: GenerationOverrides,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(default)]
    pub settings: UserSettings,
    #[serde(default)]
    pub channels: HashMap<String, GenerationOverrides>,
}

/// Fully resolved settings for one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub provider: Provider,
    pub writer_model: String,
    pub judge_model: String,
    pub style_model: String,
    pub profile: String,
    pub keys: ApiKeys,
}

fn default_models(provider: Provider) -> (&'static str, &'static str) {
    match provider {
        Provider::OpenAi => ("gpt-4o", "gpt-4o-mini"),
        Provider::OpenRouter => ("openai/gpt-4o", "openai/gpt-4o-mini"),
        Provider::Anthropic => ("claude-3-5-sonnet-latest", "claude-3-5-haiku-latest"),
    }
}

impl GenerationSettings {
    /// Picks the first provider that has a key, preferring OpenAI.
    pub fn defaults(keys: ApiKeys) -> Self {
        let provider = [Provider::OpenAi, Provider::OpenRouter, Provider::Anthropic]
            .into_iter()
            .find(|p| !keys.for_provider(*p).is_empty())
            .unwrap_or(Provider::OpenAi);
        let (writer, judge) = default_models(provider);
        Self {
            provider,
            writer_model: writer.to_string(),
            judge_model: judge.to_string(),
            style_model: writer.to_string(),
            profile: DEFAULT_PROFILE.to_string(),
            keys,
        }
    }

    fn apply(&mut self, layer: &GenerationOverrides) {
        if let Some(provider) = layer.provider {
            if provider != self.provider {
                let (writer, judge) = default_models(provider);
                self.writer_model = writer.to_string();
                self.judge_model = judge.to_string();
                self.style_model = writer.to_string();
            }
            self.provider = provider;
        }
        if let Some(model) = &layer.writer_model {
            self.writer_model = model.clone();
        }
        if let Some(model) = &layer.judge_model {
            self.judge_model = model.clone();
        }
        if let Some(model) = &layer.style_model {
            self.style_model = model.clone();
        }
        if let Some(profile) = &layer.profile {
            self.profile = profile.clone();
        }
        if let Some(key) = &layer.openai_api_key {
            self.keys.openai = key.clone();
        }
        if let Some(key) = &layer.openrouter_api_key {
            self.keys.openrouter = key.clone();
        }
        if let Some(key) = &layer.anthropic_api_key {
            self.keys.anthropic = key.clone();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    users: HashMap<String, UserDocument>,
    keys: ApiKeys,
}

impl SettingsStore {
    pub fn new(users: HashMap<String, UserDocument>, keys: ApiKeys) -> Self {
        Self { users, keys }
    }

    /// A missing file yields an empty store; every user then gets defaults.
    pub async fn load<P: AsRef<Path>>(path: P, keys: ApiKeys) -> Result<Self> {
        let path = path.as_ref();
        let users = match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings document missing; using defaults");
                HashMap::new()
            }
            Err(e) => {
                return Err(StoryError::Storage(format!(
                    "read settings {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self { users, keys })
    }

    pub fn user(&self, username: &str) -> Option<&UserDocument> {
        self.users.get(username)
    }

    pub fn channel_ids(&self, username: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .users
            .get(username)
            .map(|doc| doc.channels.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Defaults, then the user's generation block, then the channel block.
    pub fn resolve(&self, username: &str, channel_id: Option<&str>) -> GenerationSettings {
        let mut resolved = GenerationSettings::defaults(self.keys.clone());
        let Some(doc) = self.users.get(username) else {
            debug!(user = username, "no settings document; using defaults");
            return resolved;
        };

        let user_layer = &doc.settings.generation;
        if user_layer.provider.is_none() {
            // A user key may enable a provider the global config lacks.
            let mut keys = resolved.keys.clone();
            if let Some(k) = &user_layer.openai_api_key {
                keys.openai = k.clone();
            }
            if let Some(k) = &user_layer.openrouter_api_key {
                keys.openrouter = k.clone();
            }
            if let Some(k) = &user_layer.anthropic_api_key {
                keys.anthropic = k.clone();
            }
            resolved = GenerationSettings::defaults(keys);
        }
        resolved.apply(user_layer);

        if let Some(layer) = channel_id.and_then(|id| doc.channels.get(id)) {
            resolved.apply(layer);
        }
        resolved
    }
}
