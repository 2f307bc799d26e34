use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::logw;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub openrouter_api_key: String,
    #[serde(default)]
    pub anthropic_api_key: String,
    #[serde(default)]
    pub youtube_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_youtube_base_url")]
    pub youtube_base_url: String,
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    #[serde(default = "default_profiles_path")]
    pub profiles_path: PathBuf,
    #[serde(default = "default_stories_dir")]
    pub stories_dir: PathBuf,
    #[serde(default = "default_channels_path")]
    pub channels_path: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_youtube_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("settings.json")
}

fn default_profiles_path() -> PathBuf {
    PathBuf::from("profiles.json")
}

fn default_stories_dir() -> PathBuf {
    PathBuf::from("stories")
}

fn default_channels_path() -> PathBuf {
    PathBuf::from("channels.json")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openrouter_api_key: String::new(),
            anthropic_api_key: String::new(),
            youtube_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            openrouter_base_url: default_openrouter_base_url(),
            anthropic_base_url: default_anthropic_base_url(),
            youtube_base_url: default_youtube_base_url(),
            settings_path: default_settings_path(),
            profiles_path: default_profiles_path(),
            stories_dir: default_stories_dir(),
            channels_path: default_channels_path(),
            bind_addr: default_bind_addr(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        config.pipeline.validate()?;

        if config.openai_api_key.is_empty()
            && config.openrouter_api_key.is_empty()
            && config.anthropic_api_key.is_empty()
        {
            logw("config.json: no model API key set; per-user settings must provide one");
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Knobs of the story pipeline. Defaults match the production behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scene_count_min: u32,
    pub scene_count_max: u32,
    pub min_scene_chars: usize,
    pub idea_attempts: u32,
    pub outline_attempts: u32,
    pub character_attempts: u32,
    pub scene_attempts: u32,
    pub max_rewrites: u32,
    pub context_capacity: usize,
    pub context_window: usize,
    pub style_attempts: u32,
    pub style_max_ratio: f64,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scene_count_min: 6,
            scene_count_max: 9,
            min_scene_chars: 500,
            idea_attempts: 3,
            outline_attempts: 5,
            character_attempts: 3,
            scene_attempts: 5,
            max_rewrites: 3,
            context_capacity: 4,
            context_window: 2,
            style_attempts: 3,
            style_max_ratio: 1.5,
            retry_delay_ms: 1000,
            backoff: Backoff::Exponential,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scene_count_min == 0 || self.scene_count_min > self.scene_count_max {
            anyhow::bail!(
                "pipeline: scene_count_min..scene_count_max must be a non-empty range starting at 1 or more"
            );
        }
        if self.style_max_ratio < 1.0 {
            anyhow::bail!("pipeline: style_max_ratio must be at least 1.0");
        }
        Ok(())
    }
}
