//! Story generation: premise, outline, cast, scenes, continuity and style.

pub mod characters;
pub mod consistency;
pub mod context;
pub mod idea;
pub mod model;
pub mod outline;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod scene;
pub mod style;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{Result, StoryError};

pub use characters::Character;
pub use consistency::{ConsistencyChecker, Reconciled, Verdict};
pub use context::RecentContext;
pub use model::{ContinuityNote, Scene, SceneStatus, Story, StoryStatus};
pub use pipeline::{NoopProgress, Progress, ProgressSink, StoryPipeline, StoryRequest};
pub use retry::RetryPolicy;

pub(crate) fn static_regex(cell: &'static OnceCell<Regex>, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_try_init(|| {
        Regex::new(pattern).map_err(|e| StoryError::Config(format!("bad regex {pattern:?}: {e}")))
    })
}
