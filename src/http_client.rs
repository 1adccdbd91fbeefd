use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{bearer_value, TokenManager};
use crate::config::Environment;
use crate::error::{Error, Result};
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

/// Per-request options supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Header overrides, applied after every computed default
    pub headers: Vec<(String, String)>,
    /// Query parameters
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header override
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Override the Authorization header with a bearer token
    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// HTTP client that resolves authentication headers for every request
pub struct ApiClient {
    /// Target environment (read-only)
    environment: Arc<Environment>,

    /// Token manager owned by this client
    token_manager: TokenManager,

    /// Transport performing the network calls
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    /// Create a client over any transport
    pub fn new(environment: Arc<Environment>, transport: Arc<dyn Transport>) -> Self {
        let token_manager = TokenManager::new(environment.clone(), transport.clone());

        Self {
            environment,
            token_manager,
            transport,
        }
    }

    /// Create a client over a reqwest transport using the environment's timeout and retries
    pub fn from_environment(environment: Arc<Environment>) -> Result<Self> {
        let transport = ReqwestTransport::from_environment(&environment)?;
        Ok(Self::new(environment, Arc::new(transport)))
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    pub async fn get(&self, endpoint: &str, options: RequestOptions) -> Result<TransportResponse> {
        self.request(Method::GET, endpoint, None, options).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<TransportResponse> {
        self.request(Method::POST, endpoint, data, options).await
    }

    pub async fn put(
        &self,
        endpoint: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<TransportResponse> {
        self.request(Method::PUT, endpoint, data, options).await
    }

    pub async fn patch(
        &self,
        endpoint: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<TransportResponse> {
        self.request(Method::PATCH, endpoint, data, options).await
    }

    pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> Result<TransportResponse> {
        self.request(Method::DELETE, endpoint, None, options).await
    }

    /// Send a request with freshly resolved headers
    /// The body is only attached for POST, PUT and PATCH.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<TransportResponse> {
        let headers = self.resolve_headers(&options).await?;
        let url = format!("{}{}", self.environment.base_url, endpoint);

        let mut request = TransportRequest::new(method.clone(), url)
            .headers(headers)
            .query(options.query);

        if carries_body(&method) {
            if let Some(body) = data {
                request = request.json(body);
            }
        }

        let response = self.transport.execute(request).await?;
        Ok(response)
    }

    /// Compute the outbound header set for one request
    pub async fn resolve_headers(&self, options: &RequestOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(ref api_key) = self.environment.api_key {
            headers.insert(
                HeaderName::from_static("x-api-key"),
                header_value("X-API-Key", api_key)?,
            );
        }

        if self.environment.has_credentials() {
            // Non-fatal: tests may probe unauthenticated behaviour
            match self.token_manager.get_auth_headers().await {
                Ok(auth) => headers.extend(auth),
                Err(e) => {
                    tracing::debug!("Could not fetch auth headers, continuing without: {}", e)
                }
            }
        } else if let Some(ref token) = self.environment.static_token {
            headers.insert(AUTHORIZATION, bearer_value(token)?);
        }

        for (name, value) in &options.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            headers.insert(header_name, header_value(name, value)?);
        }

        Ok(headers)
    }

    /// Log in (see [`TokenManager::login`])
    pub async fn login(&self, username: Option<&str>, password: Option<&str>) -> Result<String> {
        self.token_manager.login(username, password).await
    }

    /// Log out (see [`TokenManager::logout`])
    pub async fn logout(&self) {
        self.token_manager.logout().await
    }

    /// Whether the cached token is valid
    pub async fn is_authenticated(&self) -> bool {
        self.token_manager.is_token_valid().await
    }

    /// Get a valid token (see [`TokenManager::get_valid_token`])
    pub async fn get_token(&self) -> Result<String> {
        self.token_manager.get_valid_token().await
    }
}

fn carries_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })
}
