//! Story persistence: one pretty-printed JSON document per story.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StoryError};
use crate::story::Story;

#[derive(Debug, Clone)]
pub struct StoryStore {
    dir: PathBuf,
}

async fn dir_exists(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

impl StoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !dir_exists(&self.dir).await {
            fs::create_dir_all(&self.dir).await?;
        }
        Ok(())
    }

    /// Writes to a sibling temp file first so readers never see half a story.
    pub async fn save(&self, story: &Story) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.path_for(story.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", story.id));
        let data = serde_json::to_vec_pretty(story)?;
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;
        debug!(story = %story.id, path = %path.display(), "story saved");
        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> Result<Story> {
        let path = self.path_for(id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoryError::NotFound(format!("story {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Newest first; unreadable files are skipped.
    pub async fn list(&self, owner: Option<&str>) -> Result<Vec<Story>> {
        if !dir_exists(&self.dir).await {
            return Ok(Vec::new());
        }

        let mut stories = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_story = path.extension().is_some_and(|e| e == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_story {
                continue;
            }
            let content = match fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable story file");
                    continue;
                }
            };
            match serde_json::from_str::<Story>(&content) {
                Ok(story) if owner.is_none_or(|o| story.owner == o) => stories.push(story),
                Ok(_) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "skipping malformed story file"),
            }
        }
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stories)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoryError::NotFound(format!("story {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
