//! Classification-driven retries for remote calls.
//!
//! Every attempt first passes the [`RateGovernor`] gate. Failures are routed
//! by their [`RemoteError`] kind:
//!
//! - `NotFound` is returned at once; absence is a meaningful answer.
//! - `RateLimitExceeded` counts a rate-limit event and closes the gate until
//!   the budget window resets.
//! - `Forbidden` closes the gate for a long exponential backoff.
//! - `Transient` sleeps only the calling worker for a short backoff.

use crate::engine::governor::RateGovernor;
use crate::engine::progress::ProgressStore;
use crate::github::types::RemoteError;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RemoteError },
}

impl RetryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetryError::NotFound(_))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub forbidden_base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            forbidden_base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

/// `base * 2^attempt + jitter` with jitter in `[0, 1)` seconds, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2f64.powi(attempt.min(31) as i32);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let secs = base.as_secs_f64() * factor + jitter;
    Duration::from_secs_f64(secs.min(max.as_secs_f64()))
}

pub struct RetryExecutor {
    governor: Arc<RateGovernor>,
    progress: Arc<ProgressStore>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(
        governor: Arc<RateGovernor>,
        progress: Arc<ProgressStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            governor,
            progress,
            policy,
        }
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub async fn execute<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = None;

        for attempt in 0..max_attempts {
            self.governor.wait_open().await;

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(what, attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            let final_attempt = attempt + 1 == max_attempts;

            match &err {
                RemoteError::NotFound(msg) => return Err(RetryError::NotFound(msg.clone())),
                RemoteError::RateLimitExceeded(_) => {
                    let events = self.progress.note_rate_limit();
                    warn!(what, attempt = attempt + 1, events, "rate limit hit");
                    if !final_attempt {
                        self.governor.force_wait().await;
                    }
                }
                RemoteError::Forbidden(_) => {
                    let delay = backoff_delay(
                        attempt,
                        self.policy.forbidden_base_delay,
                        self.policy.max_delay,
                    );
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "request forbidden, pausing all workers"
                    );
                    if !final_attempt {
                        self.governor.pause_for(delay, "request forbidden").await;
                    }
                }
                RemoteError::Transient(_) => {
                    let delay =
                        backoff_delay(attempt, self.policy.base_delay, self.policy.max_delay);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "request failed, retrying"
                    );
                    if !final_attempt {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            last = Some(err);
        }

        Err(RetryError::Exhausted {
            attempts: max_attempts,
            last: last.unwrap_or_else(|| RemoteError::Transient("no attempt made".to_string())),
        })
    }
}
