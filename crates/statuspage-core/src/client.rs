//! HTTP client configuration and the retrying service client.
//!
//! [`ServiceClient`] owns a base URL, default headers and a
//! [`RetryingTransport`]; API clients build requests relative to the base URL
//! and hand them to [`ServiceClient::execute_with_retry`].

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transport::{BufferedResponse, HttpSend, RetryingTransport};

/// Default timeout for a single exchange with the Statuspage API
pub const STATUSPAGE_DEFAULT_TIMEOUT: u64 = 30;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

// Connection pool settings

/// Default idle timeout for connection pools
pub const DEFAULT_POOL_IDLE_TIMEOUT: u64 = 90;

/// Default maximum idle connections per host
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 10;

/// User agent of the transport layer itself.
pub const CORE_USER_AGENT: &str = concat!("statuspage-core/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration.
///
/// Configures HTTP client behavior including timeouts, retries, and connection pooling.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for a single exchange
    pub timeout: Duration,

    /// Timeout for establishing a connection
    pub connect_timeout: Duration,

    /// Timeout for a whole logical call, retries and backoff included
    pub call_timeout: Option<Duration>,

    /// Retry policy
    pub retry_policy: RetryPolicy,

    /// Connection pool idle timeout
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Enable response compression
    pub enable_compression: bool,
}

impl ClientConfig {
    /// Create a new client configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(STATUSPAGE_DEFAULT_TIMEOUT),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            call_timeout: None,
            retry_policy: RetryPolicy::new(),
            pool_idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            enable_compression: true,
        }
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound every logical call, backoff included.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Disable retries.
    #[must_use]
    pub fn without_retries(mut self) -> Self {
        self.retry_policy = RetryPolicy::no_retry();
        self
    }

    /// Set connection pool idle timeout.
    #[must_use]
    pub const fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Set maximum idle connections per host.
    #[must_use]
    pub const fn with_pool_max_idle(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Enable or disable compression.
    #[must_use]
    pub const fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    fn build_http(&self) -> Result<Client> {
        ClientBuilder::new()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .gzip(self.enable_compression)
            .build()
            .map_err(|err| Error::ConfigError(format!("Failed to build HTTP client: {err}")))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ServiceClient`].
#[derive(Clone)]
pub struct ServiceClientBuilder {
    base_url: Url,
    http_config: ClientConfig,
    user_agent: String,
    headers: HeaderMap,
    sender: Option<Arc<dyn HttpSend>>,
}

impl std::fmt::Debug for ServiceClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClientBuilder")
            .field("base_url", &self.base_url.as_str())
            .field("http_config", &self.http_config)
            .field("user_agent", &self.user_agent)
            .field("custom_sender", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

impl ServiceClientBuilder {
    /// Create a builder for the specified base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL cannot be parsed or is
    /// not HTTP(S).
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.as_ref())?;

        Ok(Self {
            base_url,
            http_config: ClientConfig::new(),
            user_agent: CORE_USER_AGENT.to_string(),
            headers: HeaderMap::new(),
            sender: None,
        })
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.http_config.retry_policy = retry;
        self
    }

    /// Set the `User-Agent` header sent with every request.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Attach an `Authorization: <scheme> <credential>` header to every request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the credential contains characters
    /// that are not valid in a header value.
    pub fn with_authorization(mut self, scheme: &str, credential: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(&format!("{scheme} {credential}"))
            .map_err(|_| Error::ConfigError("credential is not a valid header value".into()))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Attach an arbitrary header to every request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the name or value is invalid.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::ConfigError(format!("Invalid header name `{name}`: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::ConfigError(format!("Invalid header value: {err}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Route exchanges through a custom sender instead of a fresh `reqwest` client.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn HttpSend>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the retry policy is inconsistent, the
    /// user agent is not a valid header value, or the HTTP client cannot be built.
    pub fn build(self) -> Result<ServiceClient> {
        self.http_config.retry_policy.validate()?;

        let mut headers = self.headers;
        let user_agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|err| Error::ConfigError(format!("Invalid user agent: {err}")))?;
        headers.insert(USER_AGENT, user_agent);

        let http = self.http_config.build_http()?;
        let sender: Arc<dyn HttpSend> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(http.clone()),
        };

        let transport = RetryingTransport::new(sender, self.http_config.retry_policy.clone())
            .with_call_timeout(self.http_config.call_timeout);

        debug!(
            base_url = %self.base_url,
            max_attempts = transport.policy().max_attempts(),
            "Built service client"
        );

        Ok(ServiceClient {
            http,
            transport,
            base_url: self.base_url,
            headers: Arc::new(headers),
            user_agent: self.user_agent,
            cancel: CancellationToken::new(),
        })
    }
}

/// HTTP client bound to one API base URL, with retries on every call.
#[derive(Clone)]
pub struct ServiceClient {
    http: Client,
    transport: RetryingTransport,
    base_url: Url,
    headers: Arc<HeaderMap>,
    user_agent: String,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url.as_str())
            .field("user_agent", &self.user_agent)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    /// Return the base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Return the user agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Return the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &RetryingTransport {
        &self.transport
    }

    /// A handle whose calls abort when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    /// Resolve `path` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the path cannot be joined.
    pub fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| Error::InvalidEndpoint(format!("Invalid path `{path}`: {err}")))
    }

    /// Execute one logical call through the retrying transport.
    ///
    /// `customize` decorates the request (body, extra headers); `map_error`
    /// turns a terminal non-success response into an [`Error`]. The body is
    /// read before returning, under the same cancellation and call timeout as
    /// the exchanges.
    ///
    /// # Errors
    ///
    /// Returns transport errors unchanged and the result of `map_error` for
    /// non-success responses.
    pub async fn execute_with_retry<F, M>(
        &self,
        method: Method,
        path: &str,
        params: &[(&'static str, String)],
        customize: F,
        map_error: M,
    ) -> Result<BufferedResponse>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
        M: FnOnce(StatusCode, String) -> Error,
    {
        let url = self.build_url(path)?;
        let mut builder = self
            .http
            .request(method, url)
            .headers((*self.headers).clone());
        if !params.is_empty() {
            builder = builder.query(params);
        }
        let request = customize(builder).build()?;

        let response = self
            .transport
            .execute_buffered(request, &self.cancel)
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(map_error(status, response.text()))
    }
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::InvalidEndpoint(format!(
            "Unsupported scheme `{}` in `{raw}`",
            url.scheme()
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
