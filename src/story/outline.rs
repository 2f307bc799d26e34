use once_cell::sync::OnceCell;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::retry::RetryPolicy;
use super::{prompts, static_regex};
use crate::api::ModelHandle;
use crate::config::PipelineConfig;
use crate::error::{Result, StoryError};
use crate::profile::StoryProfile;
use crate::{logi, logw};

static TRAILING_COMMA: OnceCell<Regex> = OnceCell::new();
static WHITESPACE_RUN: OnceCell<Regex> = OnceCell::new();

#[derive(Debug, Deserialize)]
struct RawBeat {
    scene_number: Option<Value>,
    scene_beat: Option<Value>,
}

/// Caller count wins; otherwise a random count inside the configured band.
pub fn target_scene_count(requested: Option<u32>, cfg: &PipelineConfig, seed: u64) -> Result<u32> {
    match requested {
        Some(0) => Err(StoryError::Validation(
            "scene_count must be at least 1".to_string(),
        )),
        Some(n) => Ok(n),
        None => {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            Ok(rng.gen_range(cfg.scene_count_min..=cfg.scene_count_max))
        }
    }
}

/// Best-effort cleanup of a model's almost-JSON reply.
pub fn repair_json(raw: &str) -> Result<String> {
    let mut text = raw.trim().to_string();

    if text.starts_with("```") {
        text = text
            .lines()
            .filter(|l| !l.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
    }

    let open = text.find(['[', '{']);
    let close = text.rfind([']', '}']);
    if let (Some(start), Some(end)) = (open, close) {
        if start < end {
            text = text[start..=end].to_string();
        }
    }

    let whitespace = static_regex(&WHITESPACE_RUN, r"\s+")?;
    let trailing_comma = static_regex(&TRAILING_COMMA, r",\s*([\]}])")?;
    let text = whitespace.replace_all(&text, " ");
    Ok(trailing_comma.replace_all(&text, "$1").trim().to_string())
}

fn parse_value(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v) => Some(v),
        Err(_) => serde_json::from_str::<Value>(&repair_json(raw).ok()?).ok(),
    }
}

fn scene_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JSON mode forces an object, so the beats arrive under `scenes` or, when
/// the model picks its own key, under the object's only array field.
fn unwrap_beats(value: Value) -> Option<Value> {
    match value {
        Value::Array(_) => Some(value),
        Value::Object(mut map) => {
            if let Some(scenes) = map.remove("scenes") {
                return scenes.is_array().then_some(scenes);
            }
            let mut arrays = map.into_iter().map(|(_, v)| v).filter(Value::is_array);
            match (arrays.next(), arrays.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Parses an outline reply into ordered beats. Entries without a scene
/// number or with a missing, null or blank beat are dropped. `None` means
/// the reply was not usable JSON.
pub fn parse_outline(raw: &str) -> Option<Vec<String>> {
    let value = unwrap_beats(parse_value(raw)?)?;
    let beats: Vec<RawBeat> = serde_json::from_value(value).ok()?;

    let mut numbered: Vec<(u64, String)> = beats
        .into_iter()
        .filter_map(|b| {
            let number = b.scene_number.as_ref().and_then(scene_number)?;
            let beat = match b.scene_beat? {
                Value::String(s) => s.trim().to_string(),
                _ => return None,
            };
            if beat.is_empty() { None } else { Some((number, beat)) }
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    Some(numbered.into_iter().map(|(_, beat)| beat).collect())
}

/// Requests the outline, retrying whole model calls on unusable output.
pub async fn generate_outline(
    writer: &ModelHandle,
    profile: &StoryProfile,
    premise: &str,
    scene_count: u32,
    retry: &RetryPolicy,
) -> Result<Vec<String>> {
    let prompt = prompts::outline(premise, scene_count);
    let prompt = prompt.as_str();
    logi(format!("Requesting outline ({} scenes target)...", scene_count));

    let outline = retry
        .run("outline", |attempt| async move {
            let raw = writer.ask_json(Some(&profile.system_prompt), prompt).await?;
            match parse_outline(&raw) {
                Some(beats) if !beats.is_empty() => Ok(beats),
                Some(_) => {
                    logw(format!("Outline attempt {attempt}: no usable scenes"));
                    Err(StoryError::Api("outline contained no usable scenes".to_string()))
                }
                None => {
                    logw(format!("Outline attempt {attempt}: unparsable JSON"));
                    Err(StoryError::Serialization("outline was not valid JSON".to_string()))
                }
            }
        })
        .await?;

    if outline.len() as u32 != scene_count {
        logw(format!(
            "Outline has {} scenes (asked for {}); using what came back",
            outline.len(),
            scene_count
        ));
    }
    Ok(outline)
}
