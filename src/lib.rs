use tracing::{info, warn};

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod init;
pub mod logging;
pub mod profile;
pub mod server;
pub mod settings;
pub mod store;
pub mod story;

pub use error::{Result, StoryError};

pub(crate) fn logi(message: impl AsRef<str>) {
    info!(target: "story_forge", "[INFO] {}", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    info!(target: "story_forge", "[OK] {}", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    warn!(target: "story_forge", "[WARN] {}", message.as_ref());
}
