use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::error::{Result, StoryError};

pub const DEFAULT_PROFILE: &str = "Default";

/// Named prompt bundle for one genre. Read-only during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryProfile {
    pub name: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Premise templates; `{genre}` is substituted before sending.
    #[serde(default)]
    pub idea_prompts: Vec<String>,
    #[serde(default)]
    pub scene_guidance: String,
    #[serde(default = "default_style_prompt")]
    pub style_prompt: String,
}

fn default_genre() -> String {
    "Drama".to_string()
}

fn default_system_prompt() -> String {
    "You are a professional fiction writer who writes gripping, long-form stories meant to be narrated aloud. \
     You write in plain prose without markdown."
        .to_string()
}

fn default_style_prompt() -> String {
    "Rewrite the following narration so it reads naturally when spoken aloud. Keep every event, name and detail. \
     Use plain, concrete language and vary sentence length. Do not add dialogue, headings or commentary. \
     Return only the rewritten text."
        .to_string()
}

impl StoryProfile {
    pub fn builtin() -> Self {
        Self {
            name: DEFAULT_PROFILE.to_string(),
            genre: default_genre(),
            system_prompt: default_system_prompt(),
            idea_prompts: vec![
                "Come up with an original premise for a {genre} story told in the first person. \
                 Describe the protagonist, the central conflict and the twist in one paragraph."
                    .to_string(),
            ],
            scene_guidance: String::new(),
            style_prompt: default_style_prompt(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    profiles: Vec<StoryProfile>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self {
            profiles: vec![StoryProfile::builtin()],
        }
    }
}

impl ProfileStore {
    pub fn new(mut profiles: Vec<StoryProfile>) -> Self {
        if !profiles.iter().any(|p| p.name == DEFAULT_PROFILE) {
            profiles.push(StoryProfile::builtin());
        }
        Self { profiles }
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(content) => {
                let profiles: Vec<StoryProfile> = serde_json::from_str(&content)?;
                Ok(Self::new(profiles))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no profiles file; using built-in profile");
                Ok(Self::default())
            }
            Err(e) => Err(StoryError::Storage(format!(
                "read profiles {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Result<&StoryProfile> {
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| StoryError::NotFound(format!("story profile '{name}'")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_profiles_and_keeps_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"[{"name":"Horror","genre":"Horror","idea_prompts":["A {genre} idea"]}]"#,
        )
        .await
        .unwrap();

        let store = ProfileStore::load(&path).await.unwrap();
        let horror = store.get("horror").unwrap();
        assert_eq!(horror.genre, "Horror");
        assert_eq!(horror.idea_prompts.len(), 1);
        assert!(!horror.style_prompt.is_empty());
        assert!(store.get(DEFAULT_PROFILE).is_ok());
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let store = ProfileStore::default();
        assert!(matches!(store.get("Western"), Err(StoryError::NotFound(_))));
        assert_eq!(store.names(), vec![DEFAULT_PROFILE]);
    }
}
