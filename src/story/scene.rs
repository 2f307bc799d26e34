use once_cell::sync::OnceCell;
use regex::Regex;

use super::prompts::{self, ScenePrompt};
use super::retry::RetryPolicy;
use super::static_regex;
use crate::api::ModelHandle;
use crate::error::{Result, StoryError};
use crate::profile::StoryProfile;
use crate::logw;

static RULE_LINE: OnceCell<Regex> = OnceCell::new();
static HEADING_MARK: OnceCell<Regex> = OnceCell::new();
static BLANK_RUN: OnceCell<Regex> = OnceCell::new();

/// Removes markdown artifacts: emphasis stars, heading marks and
/// horizontal rules. Excess blank lines are collapsed.
pub fn strip_markdown(text: &str) -> Result<String> {
    let rule = static_regex(&RULE_LINE, r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$")?;
    let heading = static_regex(&HEADING_MARK, r"(?m)^[ \t]*#{1,6}[ \t]*")?;
    let blanks = static_regex(&BLANK_RUN, r"\n[ \t]*\n(?:[ \t]*\n)+")?;

    let text = text.replace("\r\n", "\n");
    let text = rule.replace_all(&text, "");
    let text = heading.replace_all(&text, "");
    let text = text.replace('*', "");
    let text = blanks.replace_all(&text, "\n\n");
    Ok(text.trim().to_string())
}

pub struct SceneRequest<'a> {
    pub profile: &'a StoryProfile,
    pub premise: &'a str,
    pub beat: &'a str,
    pub roster: &'a str,
    pub position: u32,
    pub total: u32,
    pub previous: &'a str,
}

/// Writes one scene. Output shorter than `min_chars` after cleanup is
/// discarded and the call retried.
pub async fn write_scene(
    writer: &ModelHandle,
    request: &SceneRequest<'_>,
    min_chars: usize,
    retry: &RetryPolicy,
) -> Result<String> {
    let prompt = prompts::scene(&ScenePrompt {
        profile: request.profile,
        premise: request.premise,
        beat: request.beat,
        roster: request.roster,
        position: request.position,
        total: request.total,
        previous: request.previous,
        min_chars,
    });
    let prompt = prompt.as_str();
    let system = request.profile.system_prompt.as_str();
    let position = request.position;

    retry
        .run("scene", |attempt| async move {
            let raw = writer.ask(Some(system), prompt).await?;
            let text = strip_markdown(&raw)?;
            let len = text.chars().count();
            if len < min_chars {
                logw(format!(
                    "Scene {position} attempt {attempt}: {len} chars < {min_chars}; discarding"
                ));
                return Err(StoryError::Api(format!("scene too short ({len} chars)")));
            }
            Ok(text)
        })
        .await
}
