use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use story_forge::config::Config;
use story_forge::init;
use story_forge::logging::init_tracing;
use story_forge::server::{AppState, build_router};

#[derive(Debug, Parser)]
#[command(name = "story-forge", about = "Story generation server")]
struct Args {
    #[arg(long, env = "STORY_FORGE_CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Overrides `bind_addr` from the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("story_forge");
    let args = Args::parse();

    let cfg = Config::load(&args.config).await?;
    init::ensure_directories(&cfg).await?;

    let state = AppState::from_config(&cfg)
        .await
        .context("Failed to load application state")?;
    let app = build_router(state);

    let addr = args.bind.unwrap_or_else(|| cfg.bind_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "story-forge listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
