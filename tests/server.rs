use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::tempdir;
use tokio::sync::RwLock;
use tower::ServiceExt;

use story_forge::api::{ClientFactory, CompletionRequest, ModelRoles, ScriptedClient};
use story_forge::channels::{Channel, ChannelRegistry, ChannelStats, StatsSource};
use story_forge::config::PipelineConfig;
use story_forge::profile::ProfileStore;
use story_forge::server::{AppState, build_router};
use story_forge::settings::{GenerationSettings, SettingsStore};
use story_forge::store::StoryStore;
use story_forge::{Result, StoryError};

struct ScriptedFactory(Arc<ScriptedClient>);

impl ClientFactory for ScriptedFactory {
    fn roles(&self, _settings: &GenerationSettings) -> Result<ModelRoles> {
        Ok(ModelRoles::shared(self.0.clone(), "writer", "judge", "style"))
    }
}

struct FixedStats;

#[async_trait]
impl StatsSource for FixedStats {
    async fn fetch(&self, channel: &Channel) -> Result<ChannelStats> {
        if channel.channel_id == "UCbroken" {
            return Err(StoryError::RateLimited("quota".to_string()));
        }
        Ok(ChannelStats {
            subscribers: 1000,
            views: 50_000,
            videos: 12,
        })
    }
}

fn respond(req: &CompletionRequest) -> Result<String> {
    let p = req.prompt.as_str();
    let reply = if p.starts_with("Give this story") {
        "Night Shift".to_string()
    } else if p.starts_with("Plan a story") {
        r#"[{"scene_number":1,"scene_beat":"Mara finds the ledger."},{"scene_number":2,"scene_beat":"Mara runs."}]"#
            .to_string()
    } else if p.starts_with("List the main characters") {
        "[[Mara]] A night nurse.".to_string()
    } else if p.starts_with("You are writing scene") {
        "Mara walked the empty ward and counted every bed twice before dawn.".to_string()
    } else if p.starts_with("Write a detailed description") {
        "summary".to_string()
    } else if p.contains("Does the new scene contradict") {
        "NO_INCONSISTENCIES".to_string()
    } else if p.starts_with("Rewrite the following narration") {
        "Mara counted the beds twice before dawn.".to_string()
    } else {
        return Err(StoryError::Api("unexpected prompt".to_string()));
    };
    Ok(reply)
}

fn app_with(dir: &Path, client: ScriptedClient) -> Router {
    let mut registry = ChannelRegistry::new();
    registry.upsert(Channel::youtube("alice", "UC1", "Alice Tells"));
    registry.upsert(Channel::youtube("alice", "UCbroken", "Old Channel"));
    registry.upsert(Channel::youtube("bob", "UC9", "Bob"));

    let state = AppState {
        pipeline: Arc::new(PipelineConfig {
            min_scene_chars: 40,
            retry_delay_ms: 0,
            ..PipelineConfig::default()
        }),
        settings: Arc::new(SettingsStore::default()),
        profiles: Arc::new(ProfileStore::default()),
        stories: StoryStore::new(dir.join("stories")),
        channels: Arc::new(RwLock::new(registry)),
        channels_path: None,
        factory: Arc::new(ScriptedFactory(Arc::new(client))),
        stats: Arc::new(FixedStats),
    };
    build_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

fn sse_frames(raw: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), ScriptedClient::from_fn(respond));
    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn generate_streams_progress_then_story_and_persists_it() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), ScriptedClient::from_fn(respond));

    let (status, body) = send(
        &app,
        "POST",
        "/api/story/generate",
        Some(json!({
            "username": "alice",
            "channel_id": "UC1",
            "premise": "A night nurse notices patients vanishing.",
            "scene_count": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = sse_frames(&body);
    assert_eq!(frames[0], json!({"progress": 5, "step": "idea"}));
    let progress: Vec<u64> = frames.iter().filter_map(|f| f["progress"].as_u64()).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    let last = frames.last().unwrap();
    assert_eq!(last["progress"], 100);
    assert_eq!(last["step"], "done");
    assert_eq!(last["data"]["title"], "Night Shift");
    assert_eq!(last["data"]["status"], "completed");
    assert_eq!(last["data"]["scenes"].as_array().unwrap().len(), 2);
    assert_eq!(frames.iter().filter(|f| f["step"] == "done").count(), 1);

    let (status, body) = send(&app, "GET", "/api/stories?owner=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    let stories: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stories.as_array().unwrap().len(), 1);
    assert_eq!(stories[0]["id"], last["data"]["id"]);
    assert_eq!(stories[0]["channel_id"], "UC1");
}

#[tokio::test]
async fn failed_generation_ends_with_error_frame_and_failed_story() {
    let dir = tempdir().unwrap();
    let client = ScriptedClient::from_fn(|req| {
        if req.prompt.starts_with("Plan a story") {
            Ok("I'd rather not.".to_string())
        } else {
            respond(req)
        }
    });
    let app = app_with(dir.path(), client);

    let (status, body) = send(
        &app,
        "POST",
        "/api/story/generate",
        Some(json!({"username": "alice", "premise": "Anything.", "scene_count": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let frames = sse_frames(&body);
    let last = frames.last().unwrap();
    assert!(last["error"].as_str().unwrap().contains("outline"));

    let (_, body) = send(&app, "GET", "/api/stories?owner=alice", None).await;
    let stories: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stories[0]["status"], "failed");
}

#[tokio::test]
async fn generate_requires_username() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), ScriptedClient::from_fn(respond));
    let (status, body) = send(&app, "POST", "/api/story/generate", Some(json!({"username": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "validation error");
}

#[tokio::test]
async fn story_routes_report_not_found_and_bad_ids() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), ScriptedClient::from_fn(respond));

    let missing = format!("/api/stories/{}", uuid::Uuid::new_v4());
    let (status, body) = send(&app, "GET", &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "not found");

    let (status, _) = send(&app, "DELETE", &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/stories/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scene_edits_feedback_and_finalize() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), ScriptedClient::from_fn(respond));
    let (_, body) = send(
        &app,
        "POST",
        "/api/story/generate",
        Some(json!({"username": "bob", "premise": "A quiet ward.", "scene_count": 2})),
    )
    .await;
    let id = sse_frames(&body).last().unwrap()["data"]["id"].as_str().unwrap().to_string();
    let scene_uri = format!("/api/stories/{id}/scenes/2");

    let (status, body) = send(
        &app,
        "PATCH",
        &scene_uri,
        Some(json!({"content": "Mara left by the fire stairs.", "feedback": "Too abrupt"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let story: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(story["status"], "in_progress");
    assert_eq!(story["scenes"][1]["content"], "Mara left by the fire stairs.");
    assert_eq!(story["scenes"][1]["status"], "draft");
    assert_eq!(story["scenes"][1]["feedback"], "Too abrupt");

    let (status, body) = send(&app, "PATCH", &scene_uri, Some(json!({"finalize": true}))).await;
    assert_eq!(status, StatusCode::OK);
    let story: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(story["status"], "completed");

    let (status, _) = send(&app, "PATCH", &scene_uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/api/stories/{id}/scenes/9"),
        Some(json!({"finalize": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", &format!("/api/stories/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn refresh_updates_healthy_channels_only() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), ScriptedClient::from_fn(respond));

    let (status, body) = send(&app, "POST", "/api/youtube/refresh", Some(json!({"user": "alice"}))).await;
    assert_eq!(status, StatusCode::OK);
    let reports: Value = serde_json::from_slice(&body).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    let broken = reports.iter().find(|r| r["channel_id"] == "UCbroken").unwrap();
    assert_eq!(broken["ok"], false);
    assert!(broken["error"].as_str().unwrap().contains("rate limited"));

    let (status, body) = send(&app, "GET", "/api/youtube/channels?user=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    let channels: Value = serde_json::from_slice(&body).unwrap();
    let uc1 = channels.as_array().unwrap().iter().find(|c| c["channel_id"] == "UC1").unwrap();
    assert_eq!(uc1["stats"]["subscribers"], 1000);
    let old = channels.as_array().unwrap().iter().find(|c| c["channel_id"] == "UCbroken").unwrap();
    assert!(old["stats"].is_null());

    let (status, _) = send(&app, "GET", "/api/youtube/channels", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
