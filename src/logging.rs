use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Filter comes from `STORY_FORGE_LOG`,
/// then `RUST_LOG`, then a default that is verbose for this crate only.
pub fn init_tracing(component: &str) {
    let default_filter = format!("info,story_forge=debug,{component}=debug");

    let filter = std::env::var("STORY_FORGE_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}
