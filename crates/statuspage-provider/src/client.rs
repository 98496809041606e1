//! Asynchronous Statuspage API client.

use crate::config::DEFAULT_BASE_URL;
use crate::Result;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use statuspage_core::client::{ClientConfig, ServiceClient, ServiceClientBuilder, CORE_USER_AGENT};
use statuspage_core::retry::RetryPolicy;
use statuspage_core::transport::HttpSend;
use statuspage_core::{CancellationToken, Error};
use std::sync::Arc;
use url::Url;

/// Authorization scheme expected by the Statuspage API.
pub const AUTH_SCHEME: &str = "OAuth";

/// Builder for [`StatuspageClient`].
#[derive(Debug, Clone)]
pub struct StatuspageClientBuilder {
    inner: ServiceClientBuilder,
}

impl StatuspageClientBuilder {
    /// Create a builder for the specified base URL.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let inner = ServiceClientBuilder::new(base_url)?.with_user_agent(CORE_USER_AGENT);
        Ok(Self { inner })
    }

    /// Authenticate every request with `key`.
    pub fn with_api_key(mut self, key: &SecretString) -> Result<Self> {
        self.inner = self
            .inner
            .with_authorization(AUTH_SCHEME, key.expose_secret())?;
        Ok(self)
    }

    /// Override the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.inner = self.inner.with_user_agent(user_agent);
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry_policy(retry);
        self
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.inner = self.inner.with_http_config(config);
        self
    }

    /// Route exchanges through a custom sender.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn HttpSend>) -> Self {
        self.inner = self.inner.with_sender(sender);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<StatuspageClient> {
        let inner = self.inner.build()?;
        Ok(StatuspageClient { inner })
    }
}

/// Asynchronous Statuspage client.
#[derive(Debug, Clone)]
pub struct StatuspageClient {
    inner: ServiceClient,
}

impl StatuspageClient {
    /// Construct a client for the public API.
    pub fn new(key: &SecretString) -> Result<Self> {
        StatuspageClientBuilder::new(DEFAULT_BASE_URL)?
            .with_api_key(key)?
            .build()
    }

    /// Return the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// Return the user agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.inner.user_agent()
    }

    /// A handle whose calls abort when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            inner: self.inner.with_cancellation(token),
        }
    }

    /// `GET` a JSON document.
    pub async fn get_json<T>(&self, path: &str, params: &[(&'static str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.send_json::<(), T>(Method::GET, path, None, params)
            .await
    }

    /// `POST` a JSON body and decode the JSON answer.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_json(Method::POST, path, Some(body), &[]).await
    }

    /// `PATCH` a JSON body and decode the JSON answer.
    pub async fn patch_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, Some(body), &[]).await
    }

    /// `DELETE` a resource, discarding whatever the API echoes back.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.inner
            .execute_with_retry(
                Method::DELETE,
                path,
                &[],
                |request| request.header("Accept", "application/json"),
                map_status_to_error,
            )
            .await?;
        Ok(())
    }

    async fn send_json<B, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        params: &[(&'static str, String)],
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .inner
            .execute_with_retry(
                method,
                path,
                params,
                |mut request| {
                    request = request.header("Accept", "application/json");
                    if let Some(payload) = body {
                        request = request.json(payload);
                    }
                    request
                },
                map_status_to_error,
            )
            .await?;

        serde_json::from_slice(response.body()).map_err(|err| {
            Error::ParseError(format!(
                "Failed to parse Statuspage response for `{path}`: {err}"
            ))
        })
    }
}

/// Map a terminal non-success response to an error, keeping the body verbatim.
fn map_status_to_error(status: StatusCode, text: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(text),
        _ => Error::Api {
            status: status.as_u16(),
            body: text,
        },
    }
}
