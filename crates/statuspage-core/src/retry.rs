//! Retry policy: attempt budget, backoff schedule and retry predicates.
//!
//! A [`RetryPolicy`] is plain configuration. It decides whether a response
//! status or a transport error deserves another attempt and how long to wait
//! before that attempt; the loop itself lives in [`crate::transport`].

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default maximum number of retry attempts (five exchanges in total)
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default initial retry delay in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default maximum retry delay in milliseconds (for exponential backoff)
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Default backoff multiplier
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Status codes retried by default: rate limiting and transient gateway failures.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry policy with exponential backoff.
///
/// Configures how HTTP requests should be retried on failure, using exponential
/// backoff to avoid overwhelming failing services.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first exchange
    pub max_retries: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,

    /// Backoff multiplier (typically 2 for exponential backoff)
    pub backoff_multiplier: u32,

    /// Fraction of each delay that may be randomly shaved off, in `[0, 1]`
    pub jitter: f64,

    /// Response status codes that trigger a retry
    pub retryable_statuses: BTreeSet<u16>,

    /// Retry any 5xx response except 501 Not Implemented
    pub retry_server_errors: bool,

    /// Retry when the connection could not be established (refused, DNS)
    pub retry_on_connect: bool,

    /// Retry when a single exchange timed out
    pub retry_on_timeout: bool,

    /// Retry when the connection failed while the request was in flight
    pub retry_on_request_error: bool,

    /// Honour `Retry-After` (in seconds) on 429 and 503 responses
    pub respect_retry_after: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: 0.0,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            retry_server_errors: true,
            retry_on_connect: true,
            retry_on_timeout: true,
            retry_on_request_error: true,
            respect_retry_after: true,
        }
    }

    /// Create a retry policy with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            backoff_multiplier: 1,
            ..Self::new()
        }
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the total attempt budget (first exchange included).
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_retries = attempts.saturating_sub(1);
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the set of retryable status codes.
    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Enable or disable the blanket 5xx rule.
    #[must_use]
    pub const fn with_retry_server_errors(mut self, enabled: bool) -> Self {
        self.retry_server_errors = enabled;
        self
    }

    /// Enable or disable `Retry-After` handling.
    #[must_use]
    pub const fn with_respect_retry_after(mut self, enabled: bool) -> Self {
        self.respect_retry_after = enabled;
        self
    }

    /// Total number of physical exchanges one logical call may issue.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Check if retries are enabled.
    #[must_use]
    pub const fn has_retries(&self) -> bool {
        self.max_retries > 0
    }

    /// Check that the policy is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when the multiplier is zero, the jitter
    /// fraction is outside `[0, 1]`, or the initial delay exceeds the cap.
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier == 0 {
            return Err(Error::ConfigError(
                "backoff multiplier must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::ConfigError(format!(
                "jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::ConfigError(format!(
                "initial delay {:?} exceeds maximum delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = min(initial_delay * multiplier^(attempt - 1), max_delay)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let multiplier = u64::from(self.backoff_multiplier).saturating_pow(attempt - 1);
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(initial_ms.saturating_mul(multiplier));

        std::cmp::min(delay, self.max_delay)
    }

    /// Delay to wait after `attempt` failed, jitter applied.
    ///
    /// Jitter only ever shortens the computed delay, so the result stays
    /// within `[delay * (1 - jitter), delay]` and never exceeds `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let jitter = self.jitter.min(1.0);
        let upper = delay.as_secs_f64();
        let lower = upper * (1.0 - jitter);
        let picked = rand::thread_rng().gen_range(lower..=upper);
        std::cmp::min(Duration::from_secs_f64(picked), delay)
    }

    /// Delay requested by the server through `Retry-After`, capped at `max_delay`.
    ///
    /// Only delta-seconds values on 429 and 503 responses are recognised.
    #[must_use]
    pub fn retry_after(&self, status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
        if !self.respect_retry_after {
            return None;
        }
        if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
            return None;
        }

        let seconds = headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;

        Some(std::cmp::min(Duration::from_secs(seconds), self.max_delay))
    }

    /// Whether a response with this status should be retried.
    #[must_use]
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        if self.retryable_statuses.contains(&status.as_u16()) {
            return true;
        }
        self.retry_server_errors
            && status.is_server_error()
            && status != StatusCode::NOT_IMPLEMENTED
    }

    /// Whether a low-level transport error should be retried.
    ///
    /// Redirect-policy violations, malformed requests and rejected TLS
    /// certificates never succeed on a second try and are always terminal.
    #[must_use]
    pub fn is_retryable_error(&self, error: &reqwest::Error) -> bool {
        if error.is_redirect() || error.is_builder() || error.is_status() {
            return false;
        }
        if error.source().is_some_and(is_certificate_failure) {
            return false;
        }
        if error.is_timeout() {
            return self.retry_on_timeout;
        }
        if error.is_connect() {
            return self.retry_on_connect;
        }
        if error.is_request() {
            return self.retry_on_request_error;
        }
        false
    }
}

/// Whether any error in the chain reports a rejected certificate.
///
/// The top-level `reqwest` error is skipped by callers since its message
/// embeds the request URL.
fn is_certificate_failure(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        current = err.source();
    }
    false
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
