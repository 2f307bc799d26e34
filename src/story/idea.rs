use rand::SeedableRng;
use rand::seq::SliceRandom;

use super::prompts;
use super::retry::RetryPolicy;
use crate::api::ModelHandle;
use crate::error::{Result, StoryError};
use crate::profile::StoryProfile;
use crate::{logi, logw};

const TITLE_FALLBACK_WORDS: usize = 6;

fn pick_template(profile: &StoryProfile, seed: u64) -> String {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    profile
        .idea_prompts
        .choose(&mut rng)
        .cloned()
        .unwrap_or_else(|| {
            StoryProfile::builtin()
                .idea_prompts
                .into_iter()
                .next()
                .unwrap_or_default()
        })
}

/// Asks the writer model for a premise using one of the profile templates.
pub async fn generate_idea(
    writer: &ModelHandle,
    profile: &StoryProfile,
    retry: &RetryPolicy,
    seed: u64,
) -> Result<String> {
    let template = pick_template(profile, seed);
    let prompt = prompts::idea(&template, &profile.genre);
    let prompt = prompt.as_str();
    let premise = retry
        .run("idea", |_| async move {
            let text = writer.ask(Some(&profile.system_prompt), prompt).await?;
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(StoryError::Api("empty premise".to_string()));
            }
            Ok(text)
        })
        .await?;
    logi(format!("Premise: {:.120}", premise));
    Ok(premise)
}

/// Never fails: falls back to the premise's opening words.
pub async fn generate_title(writer: &ModelHandle, profile: &StoryProfile, premise: &str) -> String {
    match writer.ask(Some(&profile.system_prompt), &prompts::title(premise)).await {
        Ok(text) => {
            let title = clean_title(&text);
            if !title.is_empty() {
                return title;
            }
            logw("Title came back empty; deriving from premise.");
        }
        Err(err) => logw(format!("Title generation failed ({err}); deriving from premise.")),
    }
    fallback_title(premise)
}

fn clean_title(raw: &str) -> String {
    let line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.trim()
        .trim_start_matches("Title:")
        .trim()
        .trim_matches(|c| c == '"' || c == '*' || c == '“' || c == '”')
        .trim()
        .to_string()
}

fn fallback_title(premise: &str) -> String {
    let words: Vec<&str> = premise.split_whitespace().take(TITLE_FALLBACK_WORDS).collect();
    if words.is_empty() {
        return "Untitled".to_string();
    }
    words
        .join(" ")
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}
