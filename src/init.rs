use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use crate::config::Config;
use crate::logi;

async fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() || fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    logi(format!("Created directory: {}", dir.display()));
    Ok(())
}

/// Creates the stories directory and the parents of every data file.
pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    ensure_dir(&cfg.stories_dir).await?;
    for file in [&cfg.settings_path, &cfg.profiles_path, &cfg.channels_path] {
        if let Some(parent) = file.parent() {
            ensure_dir(parent).await?;
        }
    }
    Ok(())
}
