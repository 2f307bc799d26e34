//! HTTP surface: story generation over SSE, story CRUD and channel stats.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::{ClientFactory, HttpClientFactory};
use crate::channels::{Channel, ChannelRegistry, ChannelStats, StatsSource, YouTubeStatsClient, refresh_all};
use crate::config::{Config, PipelineConfig};
use crate::error::{Result, StoryError};
use crate::logw;
use crate::profile::{ProfileStore, StoryProfile};
use crate::settings::{ApiKeys, SettingsStore};
use crate::store::StoryStore;
use crate::story::{Progress, Story, StoryPipeline, StoryRequest};

const SSE_BUFFER: usize = 64;
const KEEP_ALIVE_SECS: u64 = 15;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PipelineConfig>,
    pub settings: Arc<SettingsStore>,
    pub profiles: Arc<ProfileStore>,
    pub stories: StoryStore,
    pub channels: Arc<RwLock<ChannelRegistry>>,
    /// Where refreshed channel stats are written back; `None` keeps them in memory.
    pub channels_path: Option<PathBuf>,
    pub factory: Arc<dyn ClientFactory>,
    pub stats: Arc<dyn StatsSource>,
}

impl AppState {
    pub async fn from_config(cfg: &Config) -> Result<Self> {
        let keys = ApiKeys::from_config(cfg);
        let settings = SettingsStore::load(&cfg.settings_path, keys).await?;
        let profiles = ProfileStore::load(&cfg.profiles_path).await?;
        let channels = ChannelRegistry::load(&cfg.channels_path).await?;
        let factory = HttpClientFactory::new(cfg)?;
        let stats = YouTubeStatsClient::new(reqwest::Client::new(), &cfg.youtube_api_key, &cfg.youtube_base_url);

        info!(
            profiles = profiles.names().len(),
            channels = channels.len(),
            stories_dir = %cfg.stories_dir.display(),
            "application state loaded"
        );
        Ok(Self {
            pipeline: Arc::new(cfg.pipeline.clone()),
            settings: Arc::new(settings),
            profiles: Arc::new(profiles),
            stories: StoryStore::new(&cfg.stories_dir),
            channels: Arc::new(RwLock::new(channels)),
            channels_path: Some(cfg.channels_path.clone()),
            factory: Arc::new(factory),
            stats: Arc::new(stats),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/story/generate", post(generate_story))
        .route("/api/stories", get(list_stories))
        .route("/api/stories/{id}", get(get_story).delete(delete_story))
        .route("/api/stories/{id}/scenes/{number}", patch(update_scene))
        .route("/api/youtube/channels", get(list_channels))
        .route("/api/youtube/refresh", post(refresh_channels))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub username: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub premise: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub scene_count: Option<u32>,
}

fn progress_event(progress: &Progress) -> Option<Event> {
    Event::default().json_data(progress).ok()
}

fn final_event(result: &Result<()>, story: &Story) -> Event {
    let payload = match result {
        Ok(()) => json!({"progress": 100, "step": "done", "data": story}),
        Err(err) => json!({"error": err.to_string()}),
    };
    Event::default().data(payload.to_string())
}

/// Streams progress frames while the story is generated in a spawned task.
/// The story is persisted whether or not the client is still listening.
async fn generate_story(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let username = payload.username.trim().to_string();
    if username.is_empty() {
        return Err(StoryError::Validation("username is required".to_string()));
    }

    let settings = state.settings.resolve(&username, payload.channel_id.as_deref());
    let profile = state.profiles.get(&settings.profile).cloned().unwrap_or_else(|err| {
        logw(format!("{err}; using the built-in profile"));
        StoryProfile::builtin()
    });
    let roles = state.factory.roles(&settings)?;
    let pipeline = StoryPipeline::new(roles, profile, (*state.pipeline).clone());
    let request = StoryRequest {
        owner: username,
        channel_id: payload.channel_id,
        premise: payload.premise,
        genre: payload.genre,
        scene_count: payload.scene_count,
    };
    info!(
        user = %request.owner,
        provider = settings.provider.as_str(),
        profile = %settings.profile,
        "story generation requested"
    );

    let (tx, rx) = mpsc::channel::<std::result::Result<Event, Infallible>>(SSE_BUFFER);
    let stories = state.stories.clone();

    tokio::spawn(async move {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Progress>();
        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                // The final frame carries the story and is sent separately.
                if progress.step == "done" {
                    continue;
                }
                if let Some(event) = progress_event(&progress) {
                    let _ = forward_tx.send(Ok(event)).await;
                }
            }
        });

        let (story, result) = pipeline.run_tracked(request, &progress_tx).await;
        drop(progress_tx);
        if let Err(err) = forwarder.await {
            error!(error = %err, "progress forwarder panicked");
        }

        if let Err(err) = stories.save(&story).await {
            error!(story = %story.id, error = %err, "failed to persist story");
        }
        let _ = tx.send(Ok(final_event(&result, &story))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS))))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| StoryError::Validation(format!("invalid story id '{raw}'")))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub owner: Option<String>,
}

async fn list_stories(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<Vec<Story>>> {
    Ok(Json(state.stories.list(query.owner.as_deref()).await?))
}

async fn get_story(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Story>> {
    Ok(Json(state.stories.load(parse_id(&id)?).await?))
}

async fn delete_story(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.stories.delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct SceneUpdate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub finalize: bool,
}

async fn update_scene(
    State(state): State<AppState>,
    Path((id, number)): Path<(String, u32)>,
    Json(update): Json<SceneUpdate>,
) -> Result<Json<Story>> {
    if update.content.is_none() && update.feedback.is_none() && !update.finalize {
        return Err(StoryError::Validation(
            "nothing to update: send content, feedback or finalize".to_string(),
        ));
    }

    let mut story = state.stories.load(parse_id(&id)?).await?;
    if let Some(content) = update.content {
        if content.trim().is_empty() {
            return Err(StoryError::Validation("scene content cannot be empty".to_string()));
        }
        story.edit_scene(number, content)?;
    }
    if let Some(feedback) = update.feedback {
        story.set_feedback(number, feedback)?;
    }
    if update.finalize {
        story.finalize_scene(number)?;
    }
    state.stories.save(&story).await?;
    Ok(Json(story))
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    pub user: Option<String>,
}

fn require_user(user: Option<&str>) -> Result<&str> {
    user.map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| StoryError::Validation("user is required".to_string()))
}

async fn list_channels(State(state): State<AppState>, Query(query): Query<ChannelQuery>) -> Result<Json<Vec<Channel>>> {
    let user = require_user(query.user.as_deref())?;
    Ok(Json(state.channels.read().await.for_user(user)))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshReport {
    pub channel_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ChannelStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn refresh_channels(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse> {
    let user = require_user(payload.user.as_deref())?;
    let channels = state.channels.read().await.for_user(user);
    let outcomes = refresh_all(state.stats.as_ref(), &channels).await;

    {
        let mut registry = state.channels.write().await;
        let updated = registry.apply(user, &outcomes);
        info!(user, updated, total = outcomes.len(), "channel stats refreshed");
        if let Some(path) = &state.channels_path {
            if let Err(err) = registry.save(path).await {
                logw(format!("Could not save channels to {}: {err}", path.display()));
            }
        }
    }

    let reports: Vec<RefreshReport> = outcomes
        .into_iter()
        .map(|o| match o.result {
            Ok(stats) => RefreshReport {
                channel_id: o.channel_id,
                ok: true,
                stats: Some(stats),
                error: None,
            },
            Err(err) => RefreshReport {
                channel_id: o.channel_id,
                ok: false,
                stats: None,
                error: Some(err.to_string()),
            },
        })
        .collect();
    Ok(Json(reports))
}
