use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use super::{prompts, static_regex};
use crate::api::ModelHandle;
use crate::error::{Result, StoryError};
use crate::profile::StoryProfile;
use crate::{logi, logw};

static TAGGED_LINE: OnceCell<Regex> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub description: String,
}

/// Reads `[[Name]] description` lines; anything else is ignored.
pub fn parse_characters(raw: &str) -> Result<Vec<Character>> {
    let re = static_regex(&TAGGED_LINE, r"^\s*(?:[-*\d.)]+\s*)?\[\[([^\]]+)\]\]\s*[:\-–—]?\s*(.+?)\s*$")?;
    let mut out: Vec<Character> = Vec::new();
    for line in raw.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let name = caps[1].trim().to_string();
        let description = caps[2].trim().to_string();
        if name.is_empty() || description.is_empty() {
            continue;
        }
        if out.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            continue;
        }
        out.push(Character { name, description });
    }
    Ok(out)
}

pub fn format_roster(characters: &[Character]) -> String {
    characters
        .iter()
        .map(|c| format!("{}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Degrades to an empty roster when no tagged lines come back.
pub async fn generate_characters(
    writer: &ModelHandle,
    profile: &StoryProfile,
    premise: &str,
    outline: &[String],
    retry: &RetryPolicy,
) -> Vec<Character> {
    let prompt = prompts::characters(premise, outline);
    let prompt = prompt.as_str();
    let result = retry
        .run("characters", |_| async move {
            let raw = writer.ask(Some(&profile.system_prompt), prompt).await?;
            let characters = parse_characters(&raw)?;
            if characters.is_empty() {
                return Err(StoryError::Api("no tagged character lines".to_string()));
            }
            Ok(characters)
        })
        .await;

    match result {
        Ok(characters) => {
            logi(format!("Characters: {}", characters.len()));
            characters
        }
        Err(err) => {
            logw(format!("Character generation gave up ({err}); continuing without a roster."));
            Vec::new()
        }
    }
}
