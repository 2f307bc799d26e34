//! Narrative style pass: model-assisted rewriting of non-dialogue prose
//! followed by a deterministic cliché substitution pass.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

use super::retry::RetryPolicy;
use super::{prompts, static_regex};
use crate::api::ModelHandle;
use crate::error::{Result, StoryError};
use crate::logw;

/// Multi-word clichés, matched before single words.
pub const PHRASE_TABLE: &[(&str, &str)] = &[
    ("a testament to", "proof of"),
    ("sent shivers down my spine", "chilled me"),
    ("sent a shiver down my spine", "chilled me"),
    ("a chill ran down my spine", "I went cold"),
    ("in the blink of an eye", "in an instant"),
    ("couldn't help but", "had to"),
    ("it was as if", "it seemed"),
    ("the air was thick with", "the air held"),
    ("time seemed to stand still", "everything stopped"),
    ("in the dead of night", "late at night"),
    ("with bated breath", "waiting"),
    ("a wave of relief washed over me", "relief hit me"),
    ("my heart pounded in my chest", "my heart pounded"),
];

/// Single words; an empty replacement removes the word.
pub const WORD_TABLE: &[(&str, &str)] = &[
    ("suddenly", ""),
    ("very", ""),
    ("palpable", "heavy"),
    ("tapestry", "mix"),
    ("delve", "dig"),
    ("delved", "dug"),
    ("myriad", "many"),
    ("visceral", "raw"),
    ("amidst", "amid"),
    ("whilst", "while"),
    ("unbeknownst", "unknown"),
];

static PHRASES: OnceCell<Regex> = OnceCell::new();
static WORDS: OnceCell<Regex> = OnceCell::new();
static PARAGRAPH_BREAK: OnceCell<Regex> = OnceCell::new();
static SPACE_RUN: OnceCell<Regex> = OnceCell::new();
static SPACE_BEFORE_PUNCT: OnceCell<Regex> = OnceCell::new();
static SENTENCE_START: OnceCell<Regex> = OnceCell::new();

fn alternation(table: &[(&str, &str)]) -> String {
    let mut keys: Vec<&str> = table.iter().map(|(k, _)| *k).collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    keys.iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|")
}

fn table_regex(cell: &'static OnceCell<Regex>, table: &[(&str, &str)]) -> Result<&'static Regex> {
    cell.get_or_try_init(|| {
        let pattern = format!(r"(?i)\b(?:{})\b(,?[ \t]*)", alternation(table));
        Regex::new(&pattern).map_err(|e| StoryError::Config(format!("substitution table regex: {e}")))
    })
}

fn lookup<'t>(table: &'t [(&str, &str)], matched: &str) -> Option<&'t str> {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(matched))
        .map(|(_, v)| *v)
}

fn match_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    match (original.chars().next(), replacement.chars().next()) {
        (Some(o), Some(r)) if o.is_uppercase() && r.is_lowercase() => {
            let mut out: String = r.to_uppercase().collect();
            out.push_str(&replacement[r.len_utf8()..]);
            out
        }
        _ => replacement.to_string(),
    }
}

fn substitute(
    text: &str,
    re: &Regex,
    table: &[(&str, &str)],
    removed: &mut bool,
) -> String {
    re.replace_all(text, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let trailing = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let key = &whole[..whole.len() - trailing.len()];
        match lookup(table, key) {
            Some("") => {
                *removed = true;
                String::new()
            }
            Some(replacement) => format!("{}{}", match_case(key, replacement), trailing),
            None => whole.to_string(),
        }
    })
    .into_owned()
}

/// Applies the phrase table then the word table. Removals swallow a
/// following comma; spacing and sentence capitals are repaired afterwards.
pub fn apply_substitutions(text: &str) -> Result<String> {
    let phrases = table_regex(&PHRASES, PHRASE_TABLE)?;
    let words = table_regex(&WORDS, WORD_TABLE)?;

    let mut removed = false;
    let out = substitute(text, phrases, PHRASE_TABLE, &mut removed);
    let out = substitute(&out, words, WORD_TABLE, &mut removed);
    if !removed {
        return Ok(out);
    }

    let spaces = static_regex(&SPACE_RUN, r"[ \t]{2,}")?;
    let before_punct = static_regex(&SPACE_BEFORE_PUNCT, r"[ \t]+([,.;:!?])")?;
    let sentence = static_regex(&SENTENCE_START, r"(^|[.!?][ \t]+|\n)([a-z])")?;

    let out = spaces.replace_all(&out, " ");
    let out = before_punct.replace_all(&out, "$1");
    let out = sentence.replace_all(&out, |caps: &Captures<'_>| {
        format!("{}{}", &caps[1], caps[2].to_uppercase())
    });
    Ok(out.trim().to_string())
}

/// Dialogue paragraphs stand alone; consecutive narration is grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Dialogue(String),
    Narrative(Vec<String>),
}

pub fn is_dialogue(paragraph: &str) -> bool {
    paragraph.contains(['"', '“', '”'])
}

const BLANK_LINE: &str = r"\n[ \t]*\n";

/// Blank lines separate paragraphs; text without any falls back to one
/// paragraph per line.
fn paragraph_separator(text: &str) -> Result<&'static str> {
    let breaks = static_regex(&PARAGRAPH_BREAK, BLANK_LINE)?;
    Ok(if breaks.is_match(text) { "\n\n" } else { "\n" })
}

fn paragraphs(text: &str) -> Result<Vec<&str>> {
    let breaks = static_regex(&PARAGRAPH_BREAK, BLANK_LINE)?;
    let parts: Vec<&str> = if breaks.is_match(text) {
        breaks.split(text).collect()
    } else {
        text.lines().collect()
    };
    Ok(parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect())
}

pub fn split_blocks(text: &str) -> Result<Vec<Block>> {
    let mut blocks: Vec<Block> = Vec::new();
    for paragraph in paragraphs(text)? {
        if is_dialogue(paragraph) {
            blocks.push(Block::Dialogue(paragraph.to_string()));
            continue;
        }
        match blocks.last_mut() {
            Some(Block::Narrative(group)) => group.push(paragraph.to_string()),
            _ => blocks.push(Block::Narrative(vec![paragraph.to_string()])),
        }
    }
    Ok(blocks)
}

pub struct StylePass<'a> {
    model: &'a ModelHandle,
    style_prompt: &'a str,
    retry: RetryPolicy,
    max_ratio: f64,
}

impl<'a> StylePass<'a> {
    pub fn new(model: &'a ModelHandle, style_prompt: &'a str, retry: RetryPolicy, max_ratio: f64) -> Self {
        Self {
            model,
            style_prompt,
            retry,
            max_ratio,
        }
    }

    /// Rewrites one narrative group. `None` when every attempt was empty or
    /// too long.
    async fn restyle_group(&self, original: &str) -> Option<String> {
        let prompt = prompts::style(self.style_prompt, original);
        let prompt = prompt.as_str();
        let limit = (original.chars().count() as f64 * self.max_ratio).ceil() as usize;
        let model = self.model;

        let result = self
            .retry
            .run("style", |_| async move {
                let reply = model.ask(None, prompt).await?;
                let reply = reply.trim();
                let len = reply.chars().count();
                if len == 0 {
                    return Err(StoryError::Api("empty style rewrite".to_string()));
                }
                if len > limit {
                    return Err(StoryError::Api(format!(
                        "style rewrite too long ({len} > {limit} chars)"
                    )));
                }
                Ok(reply.to_string())
            })
            .await;

        match result {
            Ok(text) => Some(text),
            Err(err) => {
                logw(format!("Style pass kept original text ({err})"));
                None
            }
        }
    }

    /// Restyles narration and substitutes in the result. Dialogue, and any
    /// narration the model could not restyle, is kept verbatim.
    pub async fn apply(&self, text: &str) -> Result<String> {
        let separator = paragraph_separator(text)?;
        let mut out: Vec<String> = Vec::new();
        for block in split_blocks(text)? {
            match block {
                Block::Dialogue(p) => out.push(p),
                Block::Narrative(group) => {
                    let original = group.join(separator);
                    match self.restyle_group(&original).await {
                        Some(styled) => out.push(apply_substitutions(&styled)?),
                        None => out.push(original),
                    }
                }
            }
        }
        Ok(out.join(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedClient;
    use std::sync::Arc;

    #[test]
    fn groups_narration_between_dialogue() {
        let text = "The hall was dark.\n\nRain hit the glass.\n\n\"Who's there?\" I called.\n\nNothing answered.";
        let blocks = split_blocks(text).unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::Narrative(vec![
                    "The hall was dark.".to_string(),
                    "Rain hit the glass.".to_string()
                ]),
                Block::Dialogue("\"Who's there?\" I called.".to_string()),
                Block::Narrative(vec!["Nothing answered.".to_string()]),
            ]
        );
        assert!(is_dialogue("“Run,” she said."));
    }

    #[test]
    fn single_newlines_split_when_no_blank_lines() {
        let text = "The hall was dark.\nRain hit the glass.\n\"Who's there?\" I called.\nNothing answered.\n";
        assert_eq!(
            split_blocks(text).unwrap(),
            vec![
                Block::Narrative(vec![
                    "The hall was dark.".to_string(),
                    "Rain hit the glass.".to_string()
                ]),
                Block::Dialogue("\"Who's there?\" I called.".to_string()),
                Block::Narrative(vec!["Nothing answered.".to_string()]),
            ]
        );

        // A blank line anywhere keeps single newlines inside a paragraph.
        let mixed = "Line one\nline two.\n\nNext.";
        assert_eq!(
            split_blocks(mixed).unwrap(),
            vec![Block::Narrative(vec![
                "Line one\nline two.".to_string(),
                "Next.".to_string()
            ])]
        );
    }

    #[test]
    fn substitutes_phrases_and_words_preserving_case() {
        let out = apply_substitutions(
            "It was a testament to her nerve. The silence was Palpable. Whilst we waited, it was as if time slowed.",
        )
        .unwrap();
        assert_eq!(
            out,
            "It was proof of her nerve. The silence was Heavy. While we waited, it seemed time slowed."
        );
    }

    #[test]
    fn removals_tidy_spacing_and_capitals() {
        let out = apply_substitutions("Suddenly, the door opened. It was very cold and I ran suddenly .").unwrap();
        assert_eq!(out, "The door opened. It was cold and I ran.");
    }

    #[test]
    fn leaves_unrelated_words_alone() {
        let text = "Everyone knew the delivery van.";
        assert_eq!(apply_substitutions(text).unwrap(), text);
    }

    #[tokio::test]
    async fn dialogue_passes_through_and_narration_is_restyled() {
        let client = Arc::new(ScriptedClient::from_fn(|_| Ok("The hallway sat in darkness.".to_string())));
        let model = ModelHandle::new(client.clone(), "style");
        let pass = StylePass::new(&model, "Rewrite.", RetryPolicy::immediate(3), 1.5);

        let text = "The hall was very dark and cold.\n\n\"Suddenly,\" he said, \"it moved.\"";
        let out = pass.apply(text).await.unwrap();
        assert_eq!(
            out,
            "The hallway sat in darkness.\n\n\"Suddenly,\" he said, \"it moved.\""
        );
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn overlong_output_falls_back_to_input() {
        let client = Arc::new(ScriptedClient::from_fn(|_| Ok("x".repeat(1000))));
        let model = ModelHandle::new(client.clone(), "style");
        let pass = StylePass::new(&model, "Rewrite.", RetryPolicy::immediate(3), 1.5);

        let text = "Rain hit the glass and the lights flickered.";
        let out = pass.apply(text).await.unwrap();
        assert_eq!(out, text);
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn fallback_skips_substitutions() {
        let client = Arc::new(ScriptedClient::from_fn(|_| Ok("x".repeat(1000))));
        let model = ModelHandle::new(client.clone(), "style");
        let pass = StylePass::new(&model, "Rewrite.", RetryPolicy::immediate(2), 1.5);

        let text = "Suddenly, it was very cold in the hall.";
        assert_eq!(pass.apply(text).await.unwrap(), text);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn single_line_paragraphs_keep_their_separator() {
        let client = Arc::new(ScriptedClient::from_fn(|_| Ok(String::new())));
        let model = ModelHandle::new(client.clone(), "style");
        let pass = StylePass::new(&model, "Rewrite.", RetryPolicy::immediate(1), 1.5);

        let text = "The door creaked.\n\"Hello?\" she asked.\nThe wind was very loud.";
        assert_eq!(pass.apply(text).await.unwrap(), text);
        assert_eq!(client.call_count(), 2);
    }
}
