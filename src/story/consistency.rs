//! Continuity checking for freshly written scenes.
//!
//! A new scene is summarised and compared against summaries of the scenes
//! still held in the recent-context window. When the judge reports
//! contradictions the writer rewrites the scene and a verifier checks that
//! the listed issues are gone. The loop is bounded; when the budget runs
//! out the latest text is accepted as best effort. Model errors consume an
//! attempt but never abort the story.

use tracing::{debug, warn};

use super::context::RecentContext;
use super::model::ContinuityNote;
use super::prompts::{self, ALL_RESOLVED, JUDGE_SYSTEM, NO_INCONSISTENCIES};
use super::scene::strip_markdown;
use crate::api::ModelHandle;
use crate::error::{Result, StoryError};
use crate::{logi, logok, logw};

/// Result of one judge or verifier call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Consistent,
    NeedsRewrite(String),
    Failed(String),
}

impl Verdict {
    /// Maps a model reply to a verdict: the sentinel means consistent,
    /// anything else non-empty is the issue list.
    pub fn from_reply(reply: &str, sentinel: &str) -> Verdict {
        let trimmed = reply.trim();
        if trimmed.is_empty() {
            return Verdict::Failed("empty reply".to_string());
        }
        let reply_words = sentinel_words(trimmed);
        let sentinel = sentinel_words(sentinel);
        if reply_words == sentinel || reply_words.starts_with(&format!("{sentinel} ")) {
            Verdict::Consistent
        } else {
            Verdict::NeedsRewrite(trimmed.to_string())
        }
    }
}

/// Uppercased words joined by single spaces, so `NO_INCONSISTENCIES` and
/// "No inconsistencies." compare equal.
fn sentinel_words(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

enum Stage {
    Written,
    Checked(Verdict),
    Rewritten { issues: String },
    Done(ContinuityNote),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub text: String,
    /// Summary of `text` when one was produced along the way.
    pub summary: Option<String>,
    pub note: ContinuityNote,
}

pub struct ConsistencyChecker<'a> {
    judge: &'a ModelHandle,
    writer: &'a ModelHandle,
    max_rewrites: u32,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(judge: &'a ModelHandle, writer: &'a ModelHandle, max_rewrites: u32) -> Self {
        Self {
            judge,
            writer,
            max_rewrites,
        }
    }

    pub async fn summarize(&self, text: &str) -> Result<String> {
        let reply = self
            .judge
            .ask(Some(JUDGE_SYSTEM), &prompts::summarize(text))
            .await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(StoryError::Api("empty scene summary".to_string()));
        }
        Ok(reply.to_string())
    }

    /// Summaries of every scene in the window, filling the cache as needed.
    async fn prior_summaries(&self, context: &mut RecentContext) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(context.len());
        for entry in context.entries_mut() {
            let summary = match &entry.summary {
                Some(s) => s.clone(),
                None => {
                    debug!(scene = entry.number, "summarising prior scene");
                    let s = self.summarize(&entry.text).await?;
                    entry.summary = Some(s.clone());
                    s
                }
            };
            out.push(summary);
        }
        Ok(out)
    }

    async fn check(&self, text: &str, context: &mut RecentContext) -> (Verdict, Option<String>) {
        let priors = match self.prior_summaries(context).await {
            Ok(p) => p,
            Err(err) => return (Verdict::Failed(err.to_string()), None),
        };
        let summary = match self.summarize(text).await {
            Ok(s) => s,
            Err(err) => return (Verdict::Failed(err.to_string()), None),
        };
        let verdict = match self
            .judge
            .ask(Some(JUDGE_SYSTEM), &prompts::judge(&summary, &priors))
            .await
        {
            Ok(reply) => Verdict::from_reply(&reply, NO_INCONSISTENCIES),
            Err(err) => Verdict::Failed(err.to_string()),
        };
        (verdict, Some(summary))
    }

    async fn rewrite(&self, beat: &str, text: &str, issues: &str) -> Result<String> {
        let reply = self
            .writer
            .ask(None, &prompts::rewrite(text, beat, issues))
            .await?;
        let cleaned = strip_markdown(&reply)?;
        if cleaned.is_empty() {
            return Err(StoryError::Api("empty rewrite".to_string()));
        }
        Ok(cleaned)
    }

    async fn verify(&self, text: &str, issues: &str) -> Verdict {
        match self
            .judge
            .ask(Some(JUDGE_SYSTEM), &prompts::verify(text, issues))
            .await
        {
            Ok(reply) => Verdict::from_reply(&reply, ALL_RESOLVED),
            Err(err) => Verdict::Failed(err.to_string()),
        }
    }

    /// Checks `text` (scene `number`) against the window and rewrites it
    /// until consistent or out of attempts. Never fails.
    pub async fn reconcile(
        &self,
        number: u32,
        beat: &str,
        text: String,
        context: &mut RecentContext,
    ) -> Reconciled {
        let mut text = text;
        if context.is_empty() {
            return Reconciled {
                text,
                summary: None,
                note: ContinuityNote::Consistent { attempts: 0 },
            };
        }

        let mut summary = None;
        let mut attempts = 0u32;
        let mut stage = Stage::Written;
        loop {
            stage = match stage {
                Stage::Written => {
                    let (verdict, s) = self.check(&text, context).await;
                    summary = s;
                    Stage::Checked(verdict)
                }
                Stage::Checked(Verdict::Consistent) => {
                    Stage::Done(ContinuityNote::Consistent { attempts })
                }
                Stage::Checked(Verdict::NeedsRewrite(issues)) if attempts >= self.max_rewrites => {
                    Stage::Done(ContinuityNote::BestEffort {
                        attempts,
                        residual: issues,
                    })
                }
                Stage::Checked(Verdict::Failed(reason)) if attempts >= self.max_rewrites => {
                    Stage::Done(ContinuityNote::BestEffort {
                        attempts,
                        residual: reason,
                    })
                }
                Stage::Checked(Verdict::NeedsRewrite(issues)) => {
                    attempts += 1;
                    logi(format!(
                        "Scene {number}: continuity issues found, rewrite {attempts}/{}",
                        self.max_rewrites
                    ));
                    match self.rewrite(beat, &text, &issues).await {
                        Ok(rewritten) => {
                            text = rewritten;
                            summary = None;
                            Stage::Rewritten { issues }
                        }
                        Err(err) => {
                            warn!(scene = number, attempt = attempts, error = %err, "rewrite call failed");
                            Stage::Checked(Verdict::NeedsRewrite(issues))
                        }
                    }
                }
                Stage::Checked(Verdict::Failed(reason)) => {
                    attempts += 1;
                    warn!(scene = number, attempt = attempts, reason = %reason, "continuity check failed; re-checking");
                    Stage::Written
                }
                Stage::Rewritten { issues } => Stage::Checked(self.verify(&text, &issues).await),
                Stage::Done(note) => {
                    match &note {
                        ContinuityNote::Consistent { attempts } => {
                            logok(format!("Scene {number}: consistent after {attempts} attempt(s)"))
                        }
                        ContinuityNote::BestEffort { attempts, .. } => logw(format!(
                            "Scene {number}: accepting best-effort text after {attempts} attempt(s)"
                        )),
                    }
                    return Reconciled { text, summary, note };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompletionRequest, ScriptedClient};
    use std::sync::Arc;

    fn kind(req: &CompletionRequest) -> &'static str {
        if req.prompt.starts_with("Write a detailed description") {
            "summary"
        } else if req.prompt.contains("Does the new scene contradict") {
            "judge"
        } else if req.prompt.starts_with("These continuity issues") {
            "verify"
        } else {
            "other"
        }
    }

    fn context_with_prior() -> RecentContext {
        let mut ctx = RecentContext::new(4);
        ctx.push(1, "Ann broke her left arm falling down the stairs.", None);
        ctx
    }

    fn handles(judge: ScriptedClient, writer: ScriptedClient) -> (Arc<ScriptedClient>, ModelHandle, Arc<ScriptedClient>, ModelHandle) {
        let judge = Arc::new(judge);
        let writer = Arc::new(writer);
        (
            judge.clone(),
            ModelHandle::new(judge, "judge"),
            writer.clone(),
            ModelHandle::new(writer, "writer"),
        )
    }

    #[test]
    fn verdict_parsing() {
        assert_eq!(
            Verdict::from_reply("  NO_INCONSISTENCIES.\n", NO_INCONSISTENCIES),
            Verdict::Consistent
        );
        assert_eq!(
            Verdict::from_reply("\"all_resolved\"", ALL_RESOLVED),
            Verdict::Consistent
        );
        assert_eq!(
            Verdict::from_reply("No inconsistencies found.", NO_INCONSISTENCIES),
            Verdict::Consistent
        );
        assert_eq!(
            Verdict::from_reply("All resolved.", ALL_RESOLVED),
            Verdict::Consistent
        );
        assert_eq!(
            Verdict::from_reply("No inconsistencies", NO_INCONSISTENCIES),
            Verdict::Consistent
        );
        assert_eq!(
            Verdict::from_reply("Not all resolved: Ann still limps.", ALL_RESOLVED),
            Verdict::NeedsRewrite("Not all resolved: Ann still limps.".to_string())
        );
        assert_eq!(
            Verdict::from_reply("1. Ann's arm is fine here.", NO_INCONSISTENCIES),
            Verdict::NeedsRewrite("1. Ann's arm is fine here.".to_string())
        );
        assert!(matches!(Verdict::from_reply("   ", ALL_RESOLVED), Verdict::Failed(_)));
    }

    #[tokio::test]
    async fn first_scene_needs_no_calls() {
        let (judge_c, judge, writer_c, writer) =
            handles(ScriptedClient::from_texts(Vec::<String>::new()), ScriptedClient::from_texts(Vec::<String>::new()));
        let mut ctx = RecentContext::new(4);
        let out = ConsistencyChecker::new(&judge, &writer, 3)
            .reconcile(1, "beat", "text".to_string(), &mut ctx)
            .await;
        assert_eq!(out.note, ContinuityNote::Consistent { attempts: 0 });
        assert_eq!(judge_c.call_count() + writer_c.call_count(), 0);
    }

    #[tokio::test]
    async fn consistent_scene_keeps_text_and_caches_summaries() {
        let (_, judge, writer_c, writer) = handles(
            ScriptedClient::from_fn(|req| match kind(req) {
                "summary" => Ok("summary".to_string()),
                "judge" => Ok(NO_INCONSISTENCIES.to_string()),
                _ => Ok("?".to_string()),
            }),
            ScriptedClient::from_texts(Vec::<String>::new()),
        );
        let mut ctx = context_with_prior();
        let out = ConsistencyChecker::new(&judge, &writer, 3)
            .reconcile(2, "beat", "Ann used her cast as a club.".to_string(), &mut ctx)
            .await;
        assert_eq!(out.text, "Ann used her cast as a club.");
        assert_eq!(out.summary.as_deref(), Some("summary"));
        assert_eq!(out.note, ContinuityNote::Consistent { attempts: 0 });
        assert_eq!(writer_c.call_count(), 0);
        assert_eq!(ctx.entries().next().unwrap().summary.as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn rewrite_then_verified() {
        let (_, judge, writer_c, writer) = handles(
            ScriptedClient::from_fn(|req| match kind(req) {
                "summary" => Ok("summary".to_string()),
                "judge" => Ok("1. Ann climbs a rope with both arms.".to_string()),
                "verify" => Ok(ALL_RESOLVED.to_string()),
                _ => Ok("?".to_string()),
            }),
            ScriptedClient::from_texts(["**Ann** climbed one-handed, cast thumping the rope."]),
        );
        let mut ctx = context_with_prior();
        let out = ConsistencyChecker::new(&judge, &writer, 3)
            .reconcile(2, "Ann escapes", "Ann climbed the rope with both arms.".to_string(), &mut ctx)
            .await;
        assert_eq!(out.text, "Ann climbed one-handed, cast thumping the rope.");
        assert_eq!(out.note, ContinuityNote::Consistent { attempts: 1 });
        assert_eq!(out.summary, None);
        let rewrite_prompt = &writer_c.calls()[0].prompt;
        assert!(rewrite_prompt.contains("Ann escapes"));
        assert!(rewrite_prompt.contains("both arms."));
    }

    #[tokio::test]
    async fn never_more_than_three_rewrites() {
        let (_, judge, writer_c, writer) = handles(
            ScriptedClient::from_fn(|req| match kind(req) {
                "summary" => Ok("summary".to_string()),
                "judge" => Ok("1. wrong arm".to_string()),
                "verify" => Ok("1. still the wrong arm".to_string()),
                _ => Ok("?".to_string()),
            }),
            ScriptedClient::from_fn(|_| Ok("another attempt".to_string())),
        );
        let mut ctx = context_with_prior();
        let out = ConsistencyChecker::new(&judge, &writer, 3)
            .reconcile(2, "beat", "original".to_string(), &mut ctx)
            .await;
        assert_eq!(writer_c.call_count(), 3);
        assert_eq!(out.text, "another attempt");
        assert_eq!(
            out.note,
            ContinuityNote::BestEffort {
                attempts: 3,
                residual: "1. still the wrong arm".to_string()
            }
        );
    }

    #[tokio::test]
    async fn api_failures_degrade_to_best_effort() {
        let (judge_c, judge, writer_c, writer) = handles(
            ScriptedClient::from_fn(|_| Err(StoryError::Api("503".to_string()))),
            ScriptedClient::from_texts(Vec::<String>::new()),
        );
        let mut ctx = context_with_prior();
        let out = ConsistencyChecker::new(&judge, &writer, 3)
            .reconcile(2, "beat", "original".to_string(), &mut ctx)
            .await;
        assert_eq!(out.text, "original");
        assert!(matches!(out.note, ContinuityNote::BestEffort { attempts: 3, .. }));
        assert_eq!(writer_c.call_count(), 0);
        // One failing summary call per check: the initial one plus three re-checks.
        assert_eq!(judge_c.call_count(), 4);
    }

    #[tokio::test]
    async fn failed_rewrite_keeps_issues_and_counts() {
        let (_, judge, writer_c, writer) = handles(
            ScriptedClient::from_fn(|req| match kind(req) {
                "summary" => Ok("summary".to_string()),
                "judge" => Ok("1. wrong arm".to_string()),
                _ => Ok("?".to_string()),
            }),
            ScriptedClient::from_fn(|_| Err(StoryError::RateLimited("slow".to_string()))),
        );
        let mut ctx = context_with_prior();
        let out = ConsistencyChecker::new(&judge, &writer, 2)
            .reconcile(2, "beat", "original".to_string(), &mut ctx)
            .await;
        assert_eq!(writer_c.call_count(), 2);
        assert_eq!(out.text, "original");
        assert_eq!(
            out.note,
            ContinuityNote::BestEffort {
                attempts: 2,
                residual: "1. wrong arm".to_string()
            }
        );
    }
}
