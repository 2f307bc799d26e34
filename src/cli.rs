use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;

use story_forge::api::{ClientFactory, HttpClientFactory};
use story_forge::config::Config;
use story_forge::init;
use story_forge::logging::init_tracing;
use story_forge::profile::ProfileStore;
use story_forge::settings::{ApiKeys, SettingsStore};
use story_forge::store::StoryStore;
use story_forge::story::{Progress, StoryPipeline, StoryRequest};

#[derive(Debug, Parser)]
#[command(name = "story-forge-cli", about = "Generate one story from the command line")]
struct Args {
    #[arg(long, env = "STORY_FORGE_CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Whose settings to resolve and who owns the saved story.
    #[arg(long, default_value = "local")]
    user: String,
    #[arg(long)]
    channel: Option<String>,
    /// Skip idea generation and use this premise.
    #[arg(long)]
    premise: Option<String>,
    #[arg(long)]
    genre: Option<String>,
    #[arg(long)]
    scenes: Option<u32>,
    /// Also write the plain story text here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("story_forge_cli");
    let args = Args::parse();

    let cfg = Config::load(&args.config).await?;
    init::ensure_directories(&cfg).await?;

    let settings = SettingsStore::load(&cfg.settings_path, ApiKeys::from_config(&cfg)).await?;
    let profiles = ProfileStore::load(&cfg.profiles_path).await?;
    let resolved = settings.resolve(&args.user, args.channel.as_deref());
    let profile = profiles.get(&resolved.profile)?.clone();
    let roles = HttpClientFactory::new(&cfg)?.roles(&resolved)?;

    println!(
        "Generating with {} ({} / {}), profile '{}'",
        resolved.provider.as_str(),
        resolved.writer_model,
        resolved.judge_model,
        profile.name
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();
    let printer = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            println!("[{:>3}%] {}", p.progress, p.step);
        }
    });

    let pipeline = StoryPipeline::new(roles, profile, cfg.pipeline.clone());
    let request = StoryRequest {
        owner: args.user.clone(),
        channel_id: args.channel.clone(),
        premise: args.premise,
        genre: args.genre,
        scene_count: args.scenes,
    };
    let (story, result) = pipeline.run_tracked(request, &tx).await;
    drop(tx);
    let _ = printer.await;

    let store = StoryStore::new(cfg.stories_dir.clone());
    store.save(&story).await?;
    println!("Saved story {} to {}", story.id, store.dir().display());
    result?;

    if let Some(out) = &args.out {
        tokio::fs::write(out, format!("{}\n\n{}\n", story.title, story.full_text()))
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
        println!("Wrote {}", out.display());
    }
    println!("'{}': {} scenes", story.title, story.scenes.len());
    Ok(())
}
