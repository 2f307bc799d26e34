use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoryError};

use super::characters::Character;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Draft,
    Final,
}

/// How the continuity check ended for a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContinuityNote {
    Consistent { attempts: u32 },
    BestEffort { attempts: u32, residual: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub number: u32,
    pub beat: String,
    pub content: String,
    pub status: SceneStatus,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub continuity: Option<ContinuityNote>,
}

impl Scene {
    pub fn draft(number: u32, beat: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            number,
            beat: beat.into(),
            content: content.into(),
            status: SceneStatus::Draft,
            feedback: None,
            continuity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub owner: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub title: String,
    pub genre: String,
    pub premise: String,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub outline: Vec<String>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    pub status: StoryStatus,
    #[serde(default)]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    pub fn new(owner: impl Into<String>, channel_id: Option<String>, genre: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            channel_id,
            title: String::new(),
            genre: genre.into(),
            premise: String::new(),
            characters: Vec::new(),
            outline: Vec::new(),
            scenes: Vec::new(),
            status: StoryStatus::Draft,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn start(&mut self) {
        self.status = StoryStatus::InProgress;
        self.touch();
    }

    pub fn push_scene(&mut self, scene: Scene) {
        self.scenes.push(scene);
        self.touch();
    }

    /// Marks every scene final and the story completed.
    pub fn complete(&mut self) {
        for scene in &mut self.scenes {
            scene.status = SceneStatus::Final;
        }
        self.status = StoryStatus::Completed;
        self.failure = None;
        self.touch();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = StoryStatus::Failed;
        self.failure = Some(reason.into());
        self.touch();
    }

    pub fn scene_mut(&mut self, number: u32) -> Result<&mut Scene> {
        let id = self.id;
        self.scenes
            .iter_mut()
            .find(|s| s.number == number)
            .ok_or_else(|| StoryError::NotFound(format!("scene {number} of story {id}")))
    }

    /// Replaces a scene's text; an edited scene goes back to draft.
    pub fn edit_scene(&mut self, number: u32, content: impl Into<String>) -> Result<()> {
        let scene = self.scene_mut(number)?;
        scene.content = content.into();
        scene.status = SceneStatus::Draft;
        if self.status == StoryStatus::Completed {
            self.status = StoryStatus::InProgress;
        }
        self.touch();
        Ok(())
    }

    pub fn set_feedback(&mut self, number: u32, feedback: impl Into<String>) -> Result<()> {
        self.scene_mut(number)?.feedback = Some(feedback.into());
        self.touch();
        Ok(())
    }

    pub fn finalize_scene(&mut self, number: u32) -> Result<()> {
        self.scene_mut(number)?.status = SceneStatus::Final;
        if !self.scenes.is_empty() && self.scenes.iter().all(|s| s.status == SceneStatus::Final) {
            self.status = StoryStatus::Completed;
        }
        self.touch();
        Ok(())
    }

    /// Plain text of the whole story, scenes separated by blank lines.
    pub fn full_text(&self) -> String {
        self.scenes
            .iter()
            .map(|s| s.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
