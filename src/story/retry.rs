use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::{Backoff, PipelineConfig};
use crate::error::{Result, StoryError};

const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff,
        }
    }

    pub fn from_config(cfg: &PipelineConfig, max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            Duration::from_millis(cfg.retry_delay_ms),
            cfg.backoff,
        )
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Backoff::Fixed)
    }

    /// Pause after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor).min(MAX_DELAY)
            }
        }
    }

    /// Runs `op` until it succeeds or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(step, attempt, max = self.max_attempts, error = %err, "attempt failed");
                    last = err.to_string();
                }
            }
            if attempt < self.max_attempts {
                let delay = self.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(StoryError::RetriesExhausted {
            step: step.to_string(),
            attempts: self.max_attempts,
            last,
        })
    }
}
