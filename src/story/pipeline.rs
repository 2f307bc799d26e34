use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use super::characters::{format_roster, generate_characters};
use super::consistency::ConsistencyChecker;
use super::context::RecentContext;
use super::idea::{generate_idea, generate_title};
use super::model::{Scene, Story};
use super::outline::{generate_outline, target_scene_count};
use super::retry::RetryPolicy;
use super::scene::{SceneRequest, write_scene};
use super::style::StylePass;
use crate::api::ModelRoles;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::profile::StoryProfile;
use crate::{logi, logok, logw};

const SCENES_START: u32 = 20;
const SCENES_END: u32 = 85;
const STYLE_END: u32 = 95;

fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub progress: u8,
    pub step: String,
}

impl Progress {
    pub fn new(progress: u32, step: impl Into<String>) -> Self {
        Self {
            progress: progress.min(100) as u8,
            step: step.into(),
        }
    }
}

/// Receives progress frames as the pipeline advances.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl ProgressSink for UnboundedSender<Progress> {
    fn report(&self, progress: Progress) {
        // A dropped receiver only means nobody is listening any more.
        if self.send(progress).is_err() {
            debug!("progress receiver gone");
        }
    }
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _progress: Progress) {}
}

#[derive(Debug, Clone, Default)]
pub struct StoryRequest {
    pub owner: String,
    pub channel_id: Option<String>,
    /// Skips idea generation when present.
    pub premise: Option<String>,
    /// Overrides the profile genre.
    pub genre: Option<String>,
    pub scene_count: Option<u32>,
}

pub struct StoryPipeline {
    roles: ModelRoles,
    profile: StoryProfile,
    cfg: PipelineConfig,
    seed: Option<u64>,
}

impl StoryPipeline {
    pub fn new(roles: ModelRoles, profile: StoryProfile, cfg: PipelineConfig) -> Self {
        Self {
            roles,
            profile,
            cfg,
            seed: None,
        }
    }

    /// Fixes the seed used for template and scene-count picks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn retry(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy::from_config(&self.cfg, attempts)
    }

    /// Generates a complete story, or returns the error that stopped it.
    pub async fn run(&self, request: StoryRequest, sink: &dyn ProgressSink) -> Result<Story> {
        let (story, result) = self.run_tracked(request, sink).await;
        result.map(|_| story)
    }

    /// Like [`run`](Self::run) but always hands back the story; a fatal
    /// error leaves it marked failed with the reason recorded.
    pub async fn run_tracked(&self, request: StoryRequest, sink: &dyn ProgressSink) -> (Story, Result<()>) {
        let mut profile = self.profile.clone();
        if let Some(genre) = request.genre.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            profile.genre = genre.to_string();
        }

        let mut story = Story::new(request.owner.clone(), request.channel_id.clone(), profile.genre.clone());
        story.start();
        info!(story = %story.id, owner = %story.owner, genre = %story.genre, "story generation started");

        let result = self.generate(&mut story, &profile, &request, sink).await;
        match &result {
            Ok(()) => {
                story.complete();
                sink.report(Progress::new(100, "done"));
                logok(format!("Story '{}' completed with {} scenes", story.title, story.scenes.len()));
            }
            Err(err) => {
                story.fail(err.to_string());
                logw(format!("Story {} failed: {err}", story.id));
            }
        }
        (story, result)
    }

    async fn generate(
        &self,
        story: &mut Story,
        profile: &StoryProfile,
        request: &StoryRequest,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        let seed = self.seed.unwrap_or_else(now_seed);
        let writer = &self.roles.writer;

        let premise = match request.premise.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => p.to_string(),
            None => generate_idea(writer, profile, &self.retry(self.cfg.idea_attempts), seed).await?,
        };
        story.premise = premise;
        sink.report(Progress::new(5, "idea"));

        story.title = generate_title(writer, profile, &story.premise).await;
        sink.report(Progress::new(8, "title"));

        let scene_count = target_scene_count(request.scene_count, &self.cfg, seed)?;
        story.outline = generate_outline(
            writer,
            profile,
            &story.premise,
            scene_count,
            &self.retry(self.cfg.outline_attempts),
        )
        .await?;
        sink.report(Progress::new(15, "outline"));

        story.characters = generate_characters(
            writer,
            profile,
            &story.premise,
            &story.outline,
            &self.retry(self.cfg.character_attempts),
        )
        .await;
        sink.report(Progress::new(SCENES_START, "characters"));

        self.write_scenes(story, profile, sink).await?;
        self.restyle(story, profile, sink).await
    }

    async fn write_scenes(&self, story: &mut Story, profile: &StoryProfile, sink: &dyn ProgressSink) -> Result<()> {
        let roster = format_roster(&story.characters);
        let total = story.outline.len() as u32;
        let retry = self.retry(self.cfg.scene_attempts);
        let checker = ConsistencyChecker::new(&self.roles.judge, &self.roles.writer, self.cfg.max_rewrites);
        let mut context = RecentContext::new(self.cfg.context_capacity);

        let beats = story.outline.clone();
        for (index, beat) in beats.iter().enumerate() {
            let number = index as u32 + 1;
            logi(format!("Writing scene {number}/{total}..."));
            let previous = context.window(self.cfg.context_window);
            let text = write_scene(
                &self.roles.writer,
                &SceneRequest {
                    profile,
                    premise: &story.premise,
                    beat,
                    roster: &roster,
                    position: number,
                    total,
                    previous: &previous,
                },
                self.cfg.min_scene_chars,
                &retry,
            )
            .await?;

            let reconciled = checker.reconcile(number, beat, text, &mut context).await;
            context.push(number, reconciled.text.clone(), reconciled.summary);

            let mut scene = Scene::draft(number, beat.clone(), reconciled.text);
            scene.continuity = Some(reconciled.note);
            story.push_scene(scene);

            let pct = SCENES_START + (SCENES_END - SCENES_START) * number / total.max(1);
            sink.report(Progress::new(pct, format!("scene {number}/{total}")));
        }
        Ok(())
    }

    async fn restyle(&self, story: &mut Story, profile: &StoryProfile, sink: &dyn ProgressSink) -> Result<()> {
        let pass = StylePass::new(
            &self.roles.style,
            &profile.style_prompt,
            self.retry(self.cfg.style_attempts),
            self.cfg.style_max_ratio,
        );
        let total = story.scenes.len() as u32;
        for (index, scene) in story.scenes.iter_mut().enumerate() {
            scene.content = pass.apply(&scene.content).await?;
            let done = index as u32 + 1;
            let pct = SCENES_END + (STYLE_END - SCENES_END) * done / total.max(1);
            sink.report(Progress::new(pct, "style"));
        }
        Ok(())
    }
}
