use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{CompletionRequest, LlmClient};
use crate::error::{Result, StoryError};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

enum Source {
    Queue(Mutex<VecDeque<Result<String>>>),
    Responder(Responder),
}

/// Deterministic stand-in for a hosted model: either replays a fixed queue
/// of replies in order or answers through a closure. Every request is
/// recorded so callers can inspect the prompts that were sent.
pub struct ScriptedClient {
    source: Source,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn from_replies<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String>>,
    {
        Self {
            source: Source::Queue(Mutex::new(replies.into_iter().collect())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_replies(texts.into_iter().map(|t| Ok(t.into())))
    }

    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            source: Source::Responder(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        match &self.source {
            Source::Queue(queue) => queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| Err(StoryError::Api("scripted replies exhausted".to_string()))),
            Source::Responder(responder) => responder(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_errors() {
        let client = ScriptedClient::from_texts(["one", "two"]);
        let req = CompletionRequest::default();
        assert_eq!(client.complete(&req).await.unwrap(), "one");
        assert_eq!(client.complete(&req).await.unwrap(), "two");
        assert!(client.complete(&req).await.is_err());
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn responder_sees_request() {
        let client = ScriptedClient::from_fn(|req| Ok(format!("echo {}", req.prompt)));
        let req = CompletionRequest {
            prompt: "hi".into(),
            ..Default::default()
        };
        assert_eq!(client.complete(&req).await.unwrap(), "echo hi");
        assert_eq!(client.calls()[0].prompt, "hi");
    }
}
