//! Retrying HTTP transport.
//!
//! [`RetryingTransport`] turns one logical call into a bounded, strictly
//! sequential series of physical exchanges. The request is captured once so
//! its body can be replayed unchanged, every discarded response is drained
//! before the next attempt, and the caller observes exactly one outcome:
//! a terminal response, a terminal error, [`Error::RetriesExhausted`] or
//! [`Error::Cancelled`]. [`RetryingTransport::execute_buffered`] also reads
//! the terminal body under the same cancellation and call timeout.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Body, Client, Method, Request, Response, StatusCode, Version};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Upper bound on bytes read from a discarded response body.
pub const RESPONSE_DRAIN_LIMIT: usize = 4096;

/// Something that can perform a single HTTP exchange.
///
/// Implemented for [`reqwest::Client`]; tests and embedders can provide their
/// own senders to intercept or reroute exchanges.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpSend: Send + Sync {
    /// Perform exactly one exchange.
    async fn send(&self, request: Request) -> std::result::Result<Response, reqwest::Error>;
}

#[async_trait]
impl HttpSend for Client {
    async fn send(&self, request: Request) -> std::result::Result<Response, reqwest::Error> {
        self.execute(request).await
    }
}

/// Why a single attempt did not produce a terminal result.
#[derive(Debug)]
pub enum RetryableFailure {
    /// The server answered with a retryable status.
    Response(Response),
    /// The exchange failed below HTTP.
    Transport(reqwest::Error),
}

/// Classification of one physical attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A response the caller should receive as-is.
    Success(Response),
    /// A failure that may succeed on another attempt.
    Retryable(RetryableFailure),
    /// A failure that ends the logical call immediately.
    Terminal(Error),
}

impl AttemptOutcome {
    /// Classify the result of one exchange under `policy`.
    #[must_use]
    pub fn classify(
        policy: &RetryPolicy,
        result: std::result::Result<Response, reqwest::Error>,
    ) -> Self {
        match result {
            Ok(response) if policy.is_retryable_status(response.status()) => {
                Self::Retryable(RetryableFailure::Response(response))
            }
            Ok(response) => Self::Success(response),
            Err(err) if policy.is_retryable_error(&err) => {
                Self::Retryable(RetryableFailure::Transport(err))
            }
            Err(err) => Self::Terminal(Error::from(err)),
        }
    }
}

/// A request captured in a form that can be rebuilt for every attempt.
#[derive(Debug, Clone)]
struct ReplayableRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    version: Version,
    timeout: Option<Duration>,
    body: Option<Vec<u8>>,
}

impl ReplayableRequest {
    fn capture(request: &Request) -> Result<Self> {
        let body = match request.body() {
            None => None,
            Some(body) => match body.as_bytes() {
                Some(bytes) => Some(bytes.to_vec()),
                None => {
                    return Err(Error::NonReplayableRequest(format!(
                        "{} {} has a streaming body",
                        request.method(),
                        request.url()
                    )))
                }
            },
        };

        Ok(Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            version: request.version(),
            timeout: request.timeout().copied(),
            body,
        })
    }

    fn build(&self) -> Request {
        let mut request = Request::new(self.method.clone(), self.url.clone());
        *request.headers_mut() = self.headers.clone();
        *request.version_mut() = self.version;
        *request.timeout_mut() = self.timeout;
        if let Some(bytes) = &self.body {
            *request.body_mut() = Some(Body::from(bytes.clone()));
        }
        request
    }

    fn cancelled(&self, attempt: u32) -> Error {
        cancelled(&self.method, &self.url, format!("during attempt {attempt}"))
    }

    fn timed_out(&self, timeout: Option<Duration>) -> Error {
        timed_out(&self.method, &self.url, timeout)
    }
}

/// A terminal response whose body has been read completely.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl BufferedResponse {
    /// Status code of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseError`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// What is left of a retryable failure once its response has been drained.
struct Settled {
    status: Option<u16>,
    message: String,
    delay_hint: Option<Duration>,
}

/// HTTP transport that retries transient failures with exponential backoff.
#[derive(Clone)]
pub struct RetryingTransport {
    sender: Arc<dyn HttpSend>,
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl RetryingTransport {
    /// Wrap an arbitrary sender.
    #[must_use]
    pub fn new(sender: Arc<dyn HttpSend>, policy: RetryPolicy) -> Self {
        Self {
            sender,
            policy,
            call_timeout: None,
        }
    }

    /// Wrap a shared `reqwest` client.
    #[must_use]
    pub fn from_client(client: Client, policy: RetryPolicy) -> Self {
        Self::new(Arc::new(client), policy)
    }

    /// Bound the whole logical call, backoff waits included.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Return the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Return the logical call timeout, if any.
    #[must_use]
    pub const fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Execute a logical call that can only end through the call timeout.
    ///
    /// # Errors
    ///
    /// See [`RetryingTransport::execute_with_cancel`].
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute a logical call, aborting as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`Error::NonReplayableRequest`] if the body is a stream (no exchange is issued)
    /// - [`Error::Cancelled`] if `cancel` fires or the call timeout elapses
    /// - [`Error::RetriesExhausted`] once every attempt failed retryably
    /// - any terminal transport error converted from `reqwest`
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.run(request, cancel, self.deadline()).await
    }

    /// Execute a logical call and read the terminal body before returning.
    ///
    /// The body read races `cancel` and the call timeout like every exchange,
    /// so a server that stalls after the headers cannot hold the call.
    ///
    /// # Errors
    ///
    /// See [`RetryingTransport::execute_with_cancel`]; a failed body read is
    /// converted from `reqwest`.
    pub async fn execute_buffered(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<BufferedResponse> {
        let deadline = self.deadline();
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self.run(request, cancel, deadline).await?;
        let status = response.status();
        let headers = response.headers().clone();

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(cancelled(&method, &url, "while reading the response body"))
            }
            () = until(deadline) => return Err(timed_out(&method, &url, self.call_timeout)),
            body = response.bytes() => body?,
        };

        Ok(BufferedResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    fn deadline(&self) -> Option<Instant> {
        self.call_timeout.map(|timeout| Instant::now() + timeout)
    }

    async fn run(
        &self,
        request: Request,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Response> {
        let prepared = ReplayableRequest::capture(&request)?;
        drop(request);

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                method = %prepared.method,
                url = %prepared.url,
                attempt,
                max_attempts,
                "Sending request"
            );

            let step = async {
                let result = self.sender.send(prepared.build()).await;
                match AttemptOutcome::classify(&self.policy, result) {
                    AttemptOutcome::Success(response) => Ok(Ok(response)),
                    AttemptOutcome::Terminal(err) => Err(err),
                    AttemptOutcome::Retryable(failure) => Ok(Err(self.settle(failure).await)),
                }
            };

            let settled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(prepared.cancelled(attempt)),
                () = until(deadline) => return Err(prepared.timed_out(self.call_timeout)),
                outcome = step => match outcome? {
                    Ok(response) => {
                        debug!(status = %response.status(), attempt, "Request completed");
                        return Ok(response);
                    }
                    Err(settled) => settled,
                },
            };

            if attempt >= max_attempts {
                warn!(
                    method = %prepared.method,
                    url = %prepared.url,
                    attempts = attempt,
                    status = ?settled.status,
                    "Retry budget exhausted"
                );
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    status: settled.status,
                    message: settled.message,
                });
            }

            let delay = settled
                .delay_hint
                .unwrap_or_else(|| self.policy.backoff(attempt));
            debug!(
                attempt,
                status = ?settled.status,
                error = %settled.message,
                ?delay,
                "Retrying request after backoff"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(prepared.cancelled(attempt)),
                () = until(deadline) => return Err(prepared.timed_out(self.call_timeout)),
                () = sleep(delay) => {}
            }
        }
    }

    async fn settle(&self, failure: RetryableFailure) -> Settled {
        match failure {
            RetryableFailure::Transport(err) => Settled {
                status: None,
                message: err.to_string(),
                delay_hint: None,
            },
            RetryableFailure::Response(response) => {
                let status = response.status();
                let delay_hint = self.policy.retry_after(status, response.headers());
                let snippet = drain(response).await;
                Settled {
                    status: Some(status.as_u16()),
                    message: describe_response(status, &snippet),
                    delay_hint,
                }
            }
        }
    }
}

/// Read at most [`RESPONSE_DRAIN_LIMIT`] bytes of the body, then release it.
async fn drain(mut response: Response) -> String {
    let mut buffer = Vec::new();
    while buffer.len() < RESPONSE_DRAIN_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(RESPONSE_DRAIN_LIMIT - buffer.len());
                buffer.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "Failed to drain response body");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn describe_response(status: StatusCode, snippet: &str) -> String {
    let snippet = snippet.trim();
    if snippet.is_empty() {
        format!("last response status {status}")
    } else {
        format!("last response status {status}: {snippet}")
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn cancelled(method: &Method, url: &Url, stage: impl Display) -> Error {
    Error::Cancelled(format!("{method} {url} cancelled {stage}"))
}

fn timed_out(method: &Method, url: &Url, timeout: Option<Duration>) -> Error {
    Error::Cancelled(format!(
        "{method} {url} exceeded call timeout of {:?}",
        timeout.unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    fn transport(policy: RetryPolicy) -> RetryingTransport {
        RetryingTransport::from_client(Client::new(), policy)
    }

    /// Sends the first `failures` requests to a closed port, then passes through.
    struct RefusingFirst {
        client: Client,
        failures: AtomicU32,
        sends: AtomicU32,
    }

    #[async_trait]
    impl HttpSend for RefusingFirst {
        async fn send(
            &self,
            mut request: Request,
        ) -> std::result::Result<Response, reqwest::Error> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                *request.url_mut() = Url::parse("http://127.0.0.1:1/unreachable").unwrap();
            }
            self.client.execute(request).await
        }
    }

    #[tokio::test]
    async fn replays_identical_body_on_every_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages/p1/components"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pages/p1/components"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "c1"})))
            .mount(&server)
            .await;

        let payload = json!({"component": {"name": "API", "status": "operational"}});
        let request = Client::new()
            .post(format!("{}/pages/p1/components", server.uri()))
            .json(&payload)
            .build()
            .unwrap();

        let response = transport(fast_policy(5)).execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 3);
        let expected = serde_json::to_vec(&payload).unwrap();
        for request in &received {
            assert_eq!(request.body, expected);
        }
    }

    #[tokio::test]
    async fn retryable_status_exhausts_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance window"))
            .expect(4)
            .mount(&server)
            .await;

        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();
        let err = transport(fast_policy(4)).execute(request).await.unwrap_err();

        match err {
            Error::RetriesExhausted {
                attempts,
                status,
                message,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(status, Some(503));
                assert!(message.contains("maintenance window"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_retryable_body_is_truncated_and_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages"))
            .respond_with(
                ResponseTemplate::new(503).set_body_string("x".repeat(3 * RESPONSE_DRAIN_LIMIT)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();
        let err = transport(fast_policy(2)).execute(request).await.unwrap_err();

        match err {
            Error::RetriesExhausted {
                attempts, message, ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(
                    message,
                    format!(
                        "last response status 503 Service Unavailable: {}",
                        "x".repeat(RESPONSE_DRAIN_LIMIT)
                    )
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_status_is_returned_after_one_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .expect(1)
            .mount(&server)
            .await;

        let request = Client::new()
            .get(format!("{}/pages/missing", server.uri()))
            .build()
            .unwrap();
        let response = transport(fast_policy(5)).execute(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "not found");
    }

    #[tokio::test]
    async fn connection_failure_then_success_takes_two_exchanges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let sender = Arc::new(RefusingFirst {
            client: Client::new(),
            failures: AtomicU32::new(1),
            sends: AtomicU32::new(0),
        });
        let transport = RetryingTransport::new(sender.clone(), fast_policy(3));

        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();
        let response = transport.execute(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sender.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connection_failures_exhaust_budget_without_status() {
        let sender = Arc::new(RefusingFirst {
            client: Client::new(),
            failures: AtomicU32::new(u32::MAX),
            sends: AtomicU32::new(0),
        });
        let transport = RetryingTransport::new(sender.clone(), fast_policy(3));

        let request = Client::new()
            .get("http://127.0.0.1:1/pages")
            .build()
            .unwrap();
        let err = transport.execute(request).await.unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted {
                attempts: 3,
                status: None,
                ..
            }
        ));
        assert_eq!(sender.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_further_exchanges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_secs(30))
            .with_max_delay(Duration::from_secs(30));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        let err = transport(policy)
            .execute_with_cancel(request, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn already_cancelled_token_issues_no_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();
        let err = transport(fast_policy(3))
            .execute_with_cancel(request, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn call_timeout_aborts_in_flight_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let transport =
            transport(fast_policy(3)).with_call_timeout(Some(Duration::from_millis(100)));
        let request = Client::new()
            .get(format!("{}/slow", server.uri()))
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        let err = transport.execute(request).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retry_after_overrides_long_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pages"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(20))
            .with_max_delay(Duration::from_secs(20));
        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            transport(policy).execute(request),
        )
        .await
        .expect("Retry-After should shorten the wait")
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn streaming_body_is_rejected_before_sending() {
        let mut sender = MockHttpSend::new();
        sender.expect_send().never();
        let transport = RetryingTransport::new(Arc::new(sender), fast_policy(3));

        let mut request = Request::new(
            Method::POST,
            Url::parse("http://127.0.0.1:1/pages").unwrap(),
        );
        let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>("chunk")]);
        *request.body_mut() = Some(Body::wrap_stream(chunks));

        let err = transport.execute(request).await.unwrap_err();
        assert!(matches!(err, Error::NonReplayableRequest(_)));
    }

    #[tokio::test]
    async fn no_retry_policy_surfaces_single_failure_as_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let request = Client::new()
            .get(format!("{}/pages", server.uri()))
            .build()
            .unwrap();
        let err = transport(RetryPolicy::no_retry())
            .execute(request)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert!(matches!(err, Error::RetriesExhausted { attempts: 1, .. }));
    }

    #[test]
    fn describe_response_handles_empty_bodies() {
        assert_eq!(
            describe_response(StatusCode::BAD_GATEWAY, "  "),
            "last response status 502 Bad Gateway"
        );
        assert_eq!(
            describe_response(StatusCode::TOO_MANY_REQUESTS, "slow down\n"),
            "last response status 429 Too Many Requests: slow down"
        );
    }
}
