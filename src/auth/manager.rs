use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::login;
use super::types::{expiry_from, TokenState, TokenStatus};
use crate::config::Environment;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Token manager
/// Owns login, token caching, expiry tracking and logout for one client
pub struct TokenManager {
    /// Cached token and expiry, swapped as a unit
    state: RwLock<TokenState>,

    /// Serializes refreshes triggered by `get_valid_token`
    refresh_lock: Mutex<()>,

    /// Target environment (read-only)
    environment: Arc<Environment>,

    /// Transport used for signin/signout calls
    transport: Arc<dyn Transport>,
}

impl TokenManager {
    /// Create a token manager with an empty token cache
    pub fn new(environment: Arc<Environment>, transport: Arc<dyn Transport>) -> Self {
        Self {
            state: RwLock::new(TokenState::default()),
            refresh_lock: Mutex::new(()),
            environment,
            transport,
        }
    }

    /// Environment this manager authenticates against
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Log in and cache the issued token
    /// Missing credentials fall back to the environment, field by field.
    /// On any failure the cached state is left untouched.
    pub async fn login(&self, username: Option<&str>, password: Option<&str>) -> Result<String> {
        let username = non_empty(username).or(self.environment.username.as_deref());
        let password = non_empty(password).or(self.environment.password.as_deref());

        let (username, password) = match (username, password) {
            (Some(u), Some(p)) => (u, p),
            _ => return Err(Error::MissingCredentials),
        };

        tracing::debug!("Attempting login for: {}", username);

        let token_data = login::sign_in(
            self.transport.as_ref(),
            &self.environment.base_url,
            username,
            password,
        )
        .await
        .inspect_err(|e| tracing::debug!("Login error: {}", e))?;

        let expires_at = expiry_from(Utc::now(), token_data.expires_in);

        {
            let mut state = self.state.write().await;
            *state = TokenState::new(token_data.token.clone(), expires_at);
        }

        tracing::info!(
            "Login successful, token expires: {}",
            expires_at.to_rfc3339()
        );

        Ok(token_data.token)
    }

    /// Whether the cached token is usable right now
    pub async fn is_token_valid(&self) -> bool {
        self.is_token_valid_at(Utc::now()).await
    }

    /// Whether the cached token is usable at the given instant
    pub async fn is_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now).await == TokenStatus::Valid
    }

    /// Token validity at the given instant
    pub async fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        self.state.read().await.status_at(now)
    }

    /// Expiry of the cached token, if any
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.expires_at()
    }

    /// Get a token to authenticate with
    /// A configured static token always wins; otherwise the cached token is
    /// reused until it enters the expiry buffer, then a fresh login runs.
    pub async fn get_valid_token(&self) -> Result<String> {
        if let Some(ref token) = self.environment.static_token {
            tracing::debug!("Using static token from environment configuration");
            return Ok(token.clone());
        }

        if let Some(token) = self.cached_valid_token().await {
            return Ok(token);
        }

        // One refresh at a time; whoever waited may find a fresh token
        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.cached_valid_token().await {
            return Ok(token);
        }

        tracing::debug!("Token missing or expiring, logging in again...");

        let stale_expiry = self.state.read().await.expires_at();

        match self.login(None, None).await {
            Ok(token) if !token.is_empty() => Ok(token),
            Ok(_) => Err(Error::NoTokenAvailable),
            Err(e) => {
                // Only drop the token this refresh was meant to replace
                let mut state = self.state.write().await;
                if state.expires_at() == stale_expiry {
                    *state = TokenState::default();
                }
                Err(e)
            }
        }
    }

    /// Log out: best-effort server signout, then always clear local state
    pub async fn logout(&self) {
        let token = self.state.read().await.token().map(str::to_string);

        if let Some(token) = token {
            tracing::debug!("Logging out...");

            if let Err(e) =
                login::sign_out(self.transport.as_ref(), &self.environment.base_url, &token).await
            {
                tracing::warn!("Error during logout (ignored): {}", e);
            }
        }

        self.clear().await;
        tracing::info!("Logged out");
    }

    /// `Authorization: Bearer <token>` for the current valid token
    pub async fn get_auth_headers(&self) -> Result<HeaderMap> {
        let token = self.get_valid_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, login::bearer_value(&token)?);
        Ok(headers)
    }

    /// Drop the cached token without contacting the server
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = TokenState::default();
    }

    /// Seed the cache directly (tests and tooling only)
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn set_token_for_testing(&self, token: &str, expires_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        *state = TokenState::new(token.to_string(), expires_at);
    }

    async fn cached_valid_token(&self) -> Option<String> {
        let state = self.state.read().await;
        match state.status_at(Utc::now()) {
            TokenStatus::Valid => state.token().map(str::to_string),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MAX_TOKEN_LIFETIME_SECS;
    use crate::config::EnvironmentName;
    use crate::error::TransportError;
    use crate::transport::{TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use chrono::Duration;
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// In-memory transport replaying canned responses and recording requests
    struct ScriptedTransport {
        responses: StdMutex<Vec<std::result::Result<TransportResponse, String>>>,
        requests: StdMutex<Vec<TransportRequest>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<std::result::Result<TransportResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses),
                requests: StdMutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn request(&self, index: usize) -> TransportRequest {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            request: TransportRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            assert!(!responses.is_empty(), "unexpected transport call");
            responses
                .remove(0)
                .map_err(|e| TransportError::Internal(anyhow::anyhow!(e)))
        }
    }

    fn ok(body: Value) -> std::result::Result<TransportResponse, String> {
        Ok(TransportResponse::json_body(StatusCode::OK, &body))
    }

    fn environment(vars: &[(&str, &str)]) -> Arc<Environment> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(Environment::from_lookup(EnvironmentName::Dev, move |key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        }))
    }

    fn credentials() -> Arc<Environment> {
        environment(&[
            ("DEV_BASE_URL", "http://api.test"),
            ("DEV_USERNAME", "foo"),
            ("DEV_PASSWORD", "bar"),
        ])
    }

    #[tokio::test]
    async fn test_login_caches_token() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc", "expires_in": 60}))]);
        let manager = TokenManager::new(credentials(), transport.clone());

        let token = manager.login(None, None).await.unwrap();
        assert_eq!(token, "abc");

        let request = transport.request(0);
        assert_eq!(request.method, reqwest::Method::POST);
        assert_eq!(request.url, "http://api.test/users/signin");
        assert_eq!(request.body, Some(json!({"username": "foo", "password": "bar"})));
        assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_validity_lapses_when_buffer_is_reached() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc", "expires_in": 360}))]);
        let manager = TokenManager::new(credentials(), transport);

        manager.login(None, None).await.unwrap();
        let now = Utc::now();
        assert!(manager.is_token_valid_at(now).await);
        assert!(!manager.is_token_valid_at(now + Duration::seconds(61)).await);
        assert_eq!(
            manager.status_at(now + Duration::seconds(61)).await,
            TokenStatus::Expiring
        );
    }

    #[tokio::test]
    async fn test_short_lived_token_is_never_valid() {
        // 60s lifetime is already inside the 5 minute buffer
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc", "expires_in": 60}))]);
        let manager = TokenManager::new(credentials(), transport);

        manager.login(None, None).await.unwrap();
        assert!(!manager.is_token_valid().await);
        assert_eq!(manager.status_at(Utc::now()).await, TokenStatus::Expiring);
    }

    #[tokio::test]
    async fn test_huge_expires_in_is_clamped() {
        let transport = ScriptedTransport::new(vec![ok(
            json!({"token": "abc", "expires_in": 10_000_000_000_000_i64}),
        )]);
        let manager = TokenManager::new(credentials(), transport);

        assert_eq!(manager.login(None, None).await.unwrap(), "abc");
        assert!(manager.is_token_valid().await);

        let expires_at = manager.expires_at().await.unwrap();
        assert!(expires_at <= Utc::now() + Duration::seconds(MAX_TOKEN_LIFETIME_SECS));
    }

    #[tokio::test]
    async fn test_huge_negative_expires_in_is_already_expiring() {
        let transport = ScriptedTransport::new(vec![ok(
            json!({"token": "abc", "expires_in": -10_000_000_000_000_i64}),
        )]);
        let manager = TokenManager::new(credentials(), transport);

        assert_eq!(manager.login(None, None).await.unwrap(), "abc");
        assert_eq!(manager.status_at(Utc::now()).await, TokenStatus::Expiring);
    }

    #[tokio::test]
    async fn test_login_prefers_explicit_credentials_per_field() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc"}))]);
        let manager = TokenManager::new(credentials(), transport.clone());

        manager.login(Some("alice"), None).await.unwrap();
        assert_eq!(
            transport.request(0).body,
            Some(json!({"username": "alice", "password": "bar"}))
        );
    }

    #[tokio::test]
    async fn test_login_without_credentials() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = TokenManager::new(environment(&[]), transport.clone());

        let err = manager.login(None, None).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));

        let err = manager.login(Some("alice"), Some("")).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_previous_token() {
        let transport = ScriptedTransport::new(vec![
            ok(json!({"token": "first", "expires_in": 3600})),
            Ok(TransportResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"error": "bad credentials"}),
            )),
            ok(json!({"unexpected": true})),
        ]);
        let manager = TokenManager::new(credentials(), transport);

        manager.login(None, None).await.unwrap();
        assert!(manager.is_token_valid().await);

        let err = manager.login(None, None).await.unwrap_err();
        match err {
            Error::Authentication { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, r#"{"error":"bad credentials"}"#);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(manager.is_token_valid().await);

        let err = manager.login(None, None).await.unwrap_err();
        assert!(matches!(err, Error::TokenExtraction));
        assert!(manager.is_token_valid().await);
        assert_eq!(manager.get_valid_token().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_get_valid_token_prefers_static_token() {
        let env = environment(&[
            ("DEV_AUTH_TOKEN", "env-token"),
            ("DEV_USERNAME", "foo"),
            ("DEV_PASSWORD", "bar"),
        ]);
        let transport = ScriptedTransport::new(vec![]);
        let manager = TokenManager::new(env, transport.clone());
        manager
            .set_token_for_testing("cached", Utc::now() + Duration::hours(1))
            .await;

        assert_eq!(manager.get_valid_token().await.unwrap(), "env-token");
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_get_valid_token_reuses_cached_token() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc"}))]);
        let manager = TokenManager::new(credentials(), transport.clone());

        assert_eq!(manager.get_valid_token().await.unwrap(), "abc");
        assert_eq!(manager.get_valid_token().await.unwrap(), "abc");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_get_valid_token_refreshes_expiring_token() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "fresh"}))]);
        let manager = TokenManager::new(credentials(), transport.clone());
        manager
            .set_token_for_testing("stale", Utc::now() + Duration::seconds(120))
            .await;

        assert_eq!(manager.get_valid_token().await.unwrap(), "fresh");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_state() {
        let transport = ScriptedTransport::new(vec![Err("connection reset".to_string())]);
        let manager = TokenManager::new(credentials(), transport);
        manager
            .set_token_for_testing("stale", Utc::now() + Duration::seconds(120))
            .await;

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(manager.status_at(Utc::now()).await, TokenStatus::Empty);
    }

    /// First signin waits for the gate and is rejected; later signins succeed
    struct GatedTransport {
        gate: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn execute(
            &self,
            _request: TransportRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.notified().await;
                return Ok(TransportResponse::json_body(
                    StatusCode::UNAUTHORIZED,
                    &json!({"error": "bad credentials"}),
                ));
            }
            Ok(TransportResponse::json_body(
                StatusCode::OK,
                &json!({"token": "explicit", "expires_in": 3600}),
            ))
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_token_from_concurrent_login() {
        let transport = Arc::new(GatedTransport {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::new(credentials(), transport.clone());
        manager
            .set_token_for_testing("stale", Utc::now() + Duration::seconds(120))
            .await;

        let (refresh, login) = tokio::join!(manager.get_valid_token(), async {
            while transport.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            let token = manager.login(None, None).await;
            transport.gate.notify_one();
            token
        });

        assert!(matches!(refresh, Err(Error::Authentication { status: 401, .. })));
        assert_eq!(login.unwrap(), "explicit");
        assert!(manager.is_token_valid().await);
        assert_eq!(manager.get_valid_token().await.unwrap(), "explicit");
    }

    #[tokio::test]
    async fn test_refresh_returns_issued_token() {
        let transport = ScriptedTransport::new(vec![ok(json!({"jwt": "issued"}))]);
        let manager = TokenManager::new(credentials(), transport);

        let token = manager.get_valid_token().await.unwrap();
        manager.clear().await;

        assert_eq!(token, "issued");
        assert_eq!(manager.status_at(Utc::now()).await, TokenStatus::Empty);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc"}))]);
        let manager = Arc::new(TokenManager::new(credentials(), transport.clone()));

        let (a, b) = tokio::join!(manager.get_valid_token(), manager.get_valid_token());
        assert_eq!(a.unwrap(), "abc");
        assert_eq!(b.unwrap(), "abc");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_logout_calls_signout_and_clears() {
        let transport = ScriptedTransport::new(vec![ok(json!({"token": "abc"})), ok(json!({}))]);
        let manager = TokenManager::new(credentials(), transport.clone());

        manager.login(None, None).await.unwrap();
        manager.logout().await;

        let request = transport.request(1);
        assert_eq!(request.url, "http://api.test/users/signout");
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer abc");
        assert!(!manager.is_token_valid().await);
        assert!(manager.expires_at().await.is_none());
    }

    #[tokio::test]
    async fn test_logout_swallows_errors() {
        let transport = ScriptedTransport::new(vec![
            ok(json!({"token": "abc"})),
            Err("network down".to_string()),
        ]);
        let manager = TokenManager::new(credentials(), transport);

        manager.login(None, None).await.unwrap();
        manager.logout().await;
        assert_eq!(manager.status_at(Utc::now()).await, TokenStatus::Empty);
    }

    #[tokio::test]
    async fn test_logout_when_logged_out_is_noop() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = TokenManager::new(credentials(), transport.clone());

        manager.logout().await;
        manager.logout().await;
        assert!(!manager.is_token_valid().await);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_get_auth_headers() {
        let transport = ScriptedTransport::new(vec![ok(json!({"access_token": "xyz"}))]);
        let manager = TokenManager::new(credentials(), transport);

        let headers = manager.get_auth_headers().await.unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer xyz");
        assert_eq!(headers.len(), 1);
    }

    #[tokio::test]
    async fn test_get_auth_headers_propagates_failure() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = TokenManager::new(environment(&[]), transport);

        let err = manager.get_auth_headers().await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));
    }
}
