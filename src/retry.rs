//! Rate-limit aware retry around any `LanguageModel`.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::providers::{CompletionRequest, LanguageModel, ProviderError};

/// Added on top of a server-provided hint.
pub const HINT_BUFFER: Duration = Duration::from_millis(500);
pub const MIN_HINT_DELAY: Duration = Duration::from_millis(500);
pub const MAX_HINT_DELAY: Duration = Duration::from_secs(60);

static RATE_LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)rate[\s_-]?limit|too many requests|quota exceeded|exceeded (your|the) (current )?quota|(tokens|requests) per (min|minute|day)|\b[rt]pm\b",
    )
    .expect("rate limit regex")
});

static TRY_AGAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:try again|retry) in\s*([0-9]+(?:\.[0-9]+)?)\s*(ms|milliseconds?|s|secs?|seconds?)\b")
        .expect("try again regex")
});

static RETRY_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)retry[-_ ]after["'\s:=]*([0-9]+(?:\.[0-9]+)?)"#).expect("retry after regex")
});

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.3,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for a zero-based attempt, jittered and capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let delay = delay * (1.0 + rand_unit() * self.jitter_ratio.clamp(0.0, 1.0));
        let delay = delay.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay as u64)
    }
}

/// Simple jitter source using system time, in `[0, 1)`.
fn rand_unit() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos as f64 / 1_000_000_000.0
}

pub trait Sleeper: Send {
    fn sleep(&self, delay: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

impl<S: Sleeper + Sync + ?Sized> Sleeper for Arc<S> {
    fn sleep(&self, delay: Duration) {
        (**self).sleep(delay);
    }
}

/// Whether any error in the cause chain is a rate limit.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(pe) = cause.downcast_ref::<ProviderError>() {
            if pe.status() == Some(429) {
                return true;
            }
        }
        RATE_LIMIT_RE.is_match(&cause.to_string())
    })
}

/// Server-provided wait, from a `Retry-After` header or the message text.
pub fn retry_hint(err: &anyhow::Error) -> Option<Duration> {
    for cause in err.chain() {
        if let Some(d) = cause.downcast_ref::<ProviderError>().and_then(|pe| pe.retry_after()) {
            return Some(d);
        }
        if let Some(d) = parse_hint(&cause.to_string()) {
            return Some(d);
        }
    }
    None
}

fn parse_hint(msg: &str) -> Option<Duration> {
    if let Some(caps) = TRY_AGAIN_RE.captures(msg) {
        let value: f64 = caps[1].parse().ok()?;
        let unit = caps[2].to_ascii_lowercase();
        let secs = if unit.starts_with("ms") || unit.starts_with("milli") {
            value / 1000.0
        } else {
            value
        };
        return Some(Duration::from_secs_f64(secs));
    }
    let caps = RETRY_AFTER_RE.captures(msg)?;
    let value: f64 = caps[1].parse().ok()?;
    Some(Duration::from_secs_f64(value))
}

/// Delay to wait before retry number `attempt` (zero-based).
pub fn delay_for_error(err: &anyhow::Error, config: &RetryConfig, attempt: u32) -> Duration {
    match retry_hint(err) {
        Some(hint) => (hint + HINT_BUFFER).clamp(MIN_HINT_DELAY, MAX_HINT_DELAY),
        None => config.delay_for_attempt(attempt),
    }
}

/// Wraps a model so rate-limited calls are retried; every other error passes
/// straight through.
pub struct RateLimitRetry<M, S = ThreadSleeper> {
    inner: M,
    config: RetryConfig,
    sleeper: S,
}

impl<M: LanguageModel> RateLimitRetry<M, ThreadSleeper> {
    pub fn new(inner: M, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            sleeper: ThreadSleeper,
        }
    }
}

impl<M: LanguageModel, S: Sleeper> RateLimitRetry<M, S> {
    pub fn with_sleeper(inner: M, config: RetryConfig, sleeper: S) -> Self {
        Self {
            inner,
            config,
            sleeper,
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: LanguageModel, S: Sleeper> LanguageModel for RateLimitRetry<M, S> {
    fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.inner.complete(request) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !is_rate_limited(&e) {
                        return Err(e);
                    }
                    if attempt >= self.config.max_retries {
                        debug!(attempts = attempt + 1, "rate limit retries exhausted");
                        return Err(e);
                    }
                    let delay = delay_for_error(&e, &self.config, attempt);
                    warn!(
                        "Rate limited (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        e,
                        delay
                    );
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
