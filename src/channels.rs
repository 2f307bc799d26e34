//! Creator channels and their public statistics.
//!
//! The registry holds at most one row per `(user, channel_id)`. Statistics
//! are refreshed for every channel at once; one channel failing leaves the
//! others untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::api::trim_copy_utf8_safe;
use crate::error::{Result, StoryError};
use crate::{logi, logw};

const STATS_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    YouTube,
    TikTok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub subscribers: u64,
    pub views: u64,
    pub videos: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub user: String,
    pub channel_id: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub stats: Option<ChannelStats>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn youtube(user: impl Into<String>, channel_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            channel_id: channel_id.into(),
            platform: Platform::YouTube,
            title: title.into(),
            stats: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing file is an empty registry. Duplicate rows collapse to the
    /// last one seen.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let rows: Vec<Channel> = match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no channels file; starting empty");
                Vec::new()
            }
            Err(e) => {
                return Err(StoryError::Storage(format!(
                    "read channels {}: {e}",
                    path.display()
                )));
            }
        };
        let mut registry = Self::new();
        for row in rows {
            registry.upsert(row);
        }
        Ok(registry)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(&self.channels)?;
        fs::write(path, data).await?;
        Ok(())
    }

    /// Inserts or replaces the row for `(user, channel_id)`.
    pub fn upsert(&mut self, channel: Channel) {
        match self
            .channels
            .iter_mut()
            .find(|c| c.user == channel.user && c.channel_id == channel.channel_id)
        {
            Some(existing) => *existing = channel,
            None => self.channels.push(channel),
        }
    }

    pub fn get(&self, user: &str, channel_id: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| c.user == user && c.channel_id == channel_id)
    }

    pub fn for_user(&self, user: &str) -> Vec<Channel> {
        self.channels.iter().filter(|c| c.user == user).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Stores fetched stats; failed outcomes leave the row as it was.
    pub fn apply(&mut self, user: &str, outcomes: &[RefreshOutcome]) -> usize {
        let now = Utc::now();
        let mut updated = 0;
        for outcome in outcomes {
            let Ok(stats) = &outcome.result else { continue };
            if let Some(channel) = self
                .channels
                .iter_mut()
                .find(|c| c.user == user && c.channel_id == outcome.channel_id)
            {
                channel.stats = Some(*stats);
                channel.updated_at = Some(now);
                updated += 1;
            }
        }
        updated
    }
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self, channel: &Channel) -> Result<ChannelStats>;
}

/// YouTube Data API v3 `channels?part=statistics` with an API key.
pub struct YouTubeStatsClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl YouTubeStatsClient {
    pub fn new(http: Client, api_key: &str, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    statistics: RawStatistics,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatistics {
    #[serde(default)]
    subscriber_count: Option<String>,
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    video_count: Option<String>,
}

fn count(raw: &Option<String>) -> u64 {
    raw.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
}

#[async_trait]
impl StatsSource for YouTubeStatsClient {
    async fn fetch(&self, channel: &Channel) -> Result<ChannelStats> {
        if channel.platform != Platform::YouTube {
            return Err(StoryError::Validation(format!(
                "channel {} is not a YouTube channel",
                channel.channel_id
            )));
        }
        if self.api_key.is_empty() {
            return Err(StoryError::Config("youtube_api_key is not set".to_string()));
        }

        let url = format!("{}/channels", self.base_url);
        let resp = self
            .http
            .get(url)
            .query(&[
                ("part", "statistics"),
                ("id", channel.channel_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .timeout(Duration::from_secs(STATS_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| StoryError::Api(format!("youtube request failed: {e}")))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            logw(format!(
                "youtube HTTP {} for {}: {}",
                status.as_u16(),
                channel.channel_id,
                trim_copy_utf8_safe(&raw, 800)
            ));
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => StoryError::RateLimited("youtube quota".to_string()),
                StatusCode::UNAUTHORIZED => StoryError::Unauthorized("youtube".to_string()),
                StatusCode::FORBIDDEN => StoryError::Forbidden("youtube".to_string()),
                _ => StoryError::Api(format!("youtube HTTP {}", status.as_u16())),
            });
        }

        let parsed: ChannelListResponse = serde_json::from_str(&raw)?;
        let item = parsed
            .items
            .into_iter()
            .next()
            .ok_or_else(|| StoryError::NotFound(format!("youtube channel {}", channel.channel_id)))?;
        Ok(ChannelStats {
            subscribers: count(&item.statistics.subscriber_count),
            views: count(&item.statistics.view_count),
            videos: count(&item.statistics.video_count),
        })
    }
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub channel_id: String,
    pub result: Result<ChannelStats>,
}

/// Fetches every channel concurrently, one outcome per channel, in input order.
pub async fn refresh_all(source: &dyn StatsSource, channels: &[Channel]) -> Vec<RefreshOutcome> {
    logi(format!("Refreshing stats for {} channel(s)", channels.len()));
    let fetches = channels.iter().map(|channel| async move {
        let result = source.fetch(channel).await;
        if let Err(err) = &result {
            logw(format!("Stats refresh failed for {}: {err}", channel.channel_id));
        }
        RefreshOutcome {
            channel_id: channel.channel_id.clone(),
            result,
        }
    });
    join_all(fetches).await
}
