// HTTP transport
// Verb-based request execution with the environment's timeout and retry policy

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::config::Environment;
use crate::error::TransportError;

/// Base delay for exponential backoff (milliseconds)
const BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff delay before jitter (milliseconds)
const MAX_DELAY_MS: u64 = 30_000;

/// Outbound request handed to a transport
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response returned by a transport, fully buffered
#[derive(Debug, Clone)]
pub struct TransportResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    elapsed: Duration,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Build a JSON response (used by in-memory transports)
    pub fn json_body(status: StatusCode, body: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, body.to_string())
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded lossily as UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Wall-clock time the transport spent on this request
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Performs the actual network call
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport with timeout and retry
pub struct ReqwestTransport {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Maximum number of retries
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl ReqwestTransport {
    /// Create a transport from explicit settings
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::from_reqwest("<client builder>", e))?;

        Ok(Self {
            client,
            max_retries,
            base_delay_ms: BASE_DELAY_MS,
        })
    }

    /// Create a transport using the environment's timeout and retry count
    pub fn from_environment(environment: &Environment) -> Result<Self, TransportError> {
        Self::new(environment.timeout, environment.retry_count)
    }

    /// Override the backoff base delay
    #[must_use]
    pub fn with_base_delay(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn build(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        builder
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        // base_delay * 2^attempt, capped, plus up to 10% jitter
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(MAX_DELAY_MS);
        let jitter = (delay as f64 * rand::thread_rng().gen_range(0.0..0.1)) as u64;
        delay + jitter
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut attempt = 0;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            "Sending HTTP request"
        );

        loop {
            let started = Instant::now();
            let result = self.build(&request).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    // 429 or 5xx: exponential backoff
                    if is_retryable_status(status) && attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            "Received {}, retrying after {}ms (attempt {}/{})",
                            status,
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    let headers = response.headers().clone();
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| TransportError::from_reqwest(request.url.clone(), e))?;
                    let elapsed = started.elapsed();

                    tracing::debug!(
                        status = %status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Received HTTP response"
                    );

                    return Ok(TransportResponse::new(status, headers, body).with_elapsed(elapsed));
                }

                Err(e) => {
                    let error = TransportError::from_reqwest(request.url.clone(), e);

                    tracing::warn!(
                        error = %error,
                        attempt = attempt + 1,
                        "HTTP request error"
                    );

                    // Network error - retry with backoff
                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error = %error,
                        total_attempts = attempt + 1,
                        "HTTP request failed after all retries"
                    );

                    return Err(error);
                }
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
