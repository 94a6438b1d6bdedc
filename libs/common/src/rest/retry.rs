//! Bounded exponential backoff
//!
//! The random source and the retry predicate are injected values, so tests
//! can pin both.

use rand::Rng;
use reqwest::StatusCode;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::RestError;
use crate::context::Ctx;

/// Decides whether an attempt should be retried, from its status or transport error
pub type RetryRule = Arc<dyn Fn(Option<StatusCode>, Option<&RestError>) -> bool + Send + Sync>;

/// Source of the random part of a backoff delay
pub trait JitterSource: Send + Sync {
    fn jitter(&self) -> Duration;
}

/// Uniform jitter in `[0, 1000)` ms
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(0..1000))
    }
}

/// Constant jitter
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self) -> Duration {
        self.0
    }
}

/// Retries transport errors, 423, 425, 429 and every status above 500
pub fn default_retry_rule() -> RetryRule {
    Arc::new(|status: Option<StatusCode>, err: Option<&RestError>| {
        if err.is_some() {
            return true;
        }
        match status {
            Some(status) => {
                matches!(status.as_u16(), 423 | 425 | 429) || status.as_u16() > 500
            }
            None => false,
        }
    })
}

/// Retry policy of a single call
#[derive(Clone)]
pub struct RetryConfig {
    /// Total number of attempts; 0 is treated as 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rule: RetryRule,
    pub jitter: Arc<dyn JitterSource>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(32),
            rule: default_retry_rule(),
            jitter: Arc::new(RandomJitter),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_rule(mut self, rule: RetryRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter.clone(),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// Delay schedule between attempts
#[derive(Clone)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Arc<dyn JitterSource>,
}

impl Backoff {
    /// Wait after the 0-indexed `attempt`: `min(max, base * 2^attempt + jitter)`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .saturating_add(self.jitter.jitter())
            .min(self.max_delay)
    }
}

/// Run `op` up to `max_attempts` times while `should_retry` accepts its outcome
///
/// No wait follows the final attempt. Cancellation of `ctx` during a wait
/// stops the loop and returns the last outcome.
pub async fn retry<T, F, Fut, P>(
    ctx: &Ctx,
    backoff: &Backoff,
    max_attempts: u32,
    mut op: F,
    should_retry: P,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = op().await;
        attempt += 1;

        if attempt >= max_attempts || !should_retry(&outcome) {
            return outcome;
        }

        let delay = backoff.delay(attempt - 1);
        debug!("Attempt {} of {} failed, retrying in {:?}", attempt, max_attempts, delay);

        tokio::select! {
            _ = ctx.cancelled() => return outcome,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
