//! Provider configuration.
//!
//! [`ProviderConfig`] is what the host hands to the provider before any
//! resource is touched: credentials, endpoint, host identification and the
//! retry knobs for the transport.

use crate::Result;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use statuspage_core::client::ClientConfig;
use statuspage_core::retry::RetryPolicy;
use statuspage_core::Error;
use std::time::Duration;
use validator::Validate;

/// Default Statuspage API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.statuspage.io/v1/";

/// Environment variables consulted for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["STATUSPAGE_API_KEY", "SP_API_KEY"];

/// Identification of the host tool that loaded the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostInfo {
    /// Host tool name (e.g. "terraform")
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Host tool version
    #[serde(default = "default_unknown")]
    pub version: String,

    /// Host build identifier
    #[serde(default = "default_unknown")]
    pub build: String,
}

fn default_host_name() -> String {
    "host".to_string()
}

fn default_unknown() -> String {
    "unknown".to_string()
}

impl HostInfo {
    /// Describe a host tool.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        build: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build: build.into(),
        }
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        Self::new(default_host_name(), default_unknown(), default_unknown())
    }
}

/// Configuration consumed by [`crate::provider::configure`].
#[derive(Debug, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Explicit API key; falls back to [`API_KEY_ENV_VARS`] when absent
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,

    /// Statuspage API base URL
    #[validate(url)]
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a single exchange, in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional bound on a whole logical call, in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,

    /// Maximum number of retries after the first attempt
    #[validate(range(max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay, in milliseconds
    #[validate(range(min = 1, max = 60_000))]
    #[serde(default = "default_retry_wait_min_ms")]
    pub retry_wait_min_ms: u64,

    /// Backoff cap, in milliseconds
    #[validate(range(min = 1, max = 300_000))]
    #[serde(default = "default_retry_wait_max_ms")]
    pub retry_wait_max_ms: u64,

    /// Host identification embedded in the user agent
    #[serde(default)]
    pub host: HostInfo,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    4
}

const fn default_retry_wait_min_ms() -> u64 {
    1_000
}

const fn default_retry_wait_max_ms() -> u64 {
    30_000
}

impl ProviderConfig {
    /// Create a configuration with defaults and no explicit API key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            call_timeout_secs: None,
            max_retries: default_max_retries(),
            retry_wait_min_ms: default_retry_wait_min_ms(),
            retry_wait_max_ms: default_retry_wait_max_ms(),
            host: HostInfo::default(),
        }
    }

    /// Set the API key explicitly.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    /// Point the provider at another endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the host identification.
    #[must_use]
    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    /// Set the number of retries after the first attempt.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff bounds in milliseconds.
    #[must_use]
    pub const fn with_retry_wait(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.retry_wait_min_ms = min_ms;
        self.retry_wait_max_ms = max_ms;
        self
    }

    /// Set the per-exchange timeout in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    /// Bound every logical call, in seconds.
    #[must_use]
    pub const fn with_call_timeout(mut self, seconds: u64) -> Self {
        self.call_timeout_secs = Some(seconds);
        self
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy derived from the configured knobs.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_wait_min_ms))
            .with_max_delay(Duration::from_millis(self.retry_wait_max_ms))
    }

    /// HTTP client configuration derived from the configured knobs.
    #[must_use]
    pub fn http_config(&self) -> ClientConfig {
        let config = ClientConfig::new()
            .with_timeout(self.timeout())
            .with_retry_policy(self.retry_policy());

        match self.call_timeout_secs {
            Some(seconds) => config.with_call_timeout(Duration::from_secs(seconds)),
            None => config,
        }
    }

    /// Resolve the API key from configuration or the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] when no non-blank key is found.
    pub fn resolve_api_key(&self) -> Result<SecretString> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    /// Resolve the API key, reading variables through `lookup`.
    ///
    /// An explicit key wins; otherwise [`API_KEY_ENV_VARS`] are consulted in
    /// order. Blank values count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] when no non-blank key is found.
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Result<SecretString>
    where
        F: Fn(&str) -> Option<String>,
    {
        use secrecy::ExposeSecret;

        if let Some(key) = &self.api_key {
            if !key.expose_secret().trim().is_empty() {
                return Ok(SecretString::from(key.expose_secret().to_string()));
            }
        }

        API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| {
                Error::MissingCredentials(format!(
                    "api_key must be set in the provider configuration or through {}",
                    API_KEY_ENV_VARS.join(" / ")
                ))
            })
    }

    /// Validate ranges and the endpoint URL.
    ///
    /// # Errors
    ///
    /// - [`Error::ValidationError`] naming every field outside its range
    /// - [`Error::ConfigError`] when the backoff bounds are inverted
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        if self.retry_wait_min_ms > self.retry_wait_max_ms {
            return Err(Error::ConfigError(format!(
                "retry_wait_min_ms ({}) exceeds retry_wait_max_ms ({})",
                self.retry_wait_min_ms, self.retry_wait_max_ms
            )));
        }
        Ok(())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}
