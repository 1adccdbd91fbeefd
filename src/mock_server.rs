//! Mock REST API implementing the signin/signout contract and a small users resource.
//!
//! Tokens are random UUIDs held in memory; user routes answer 401 unless the
//! request carries `Authorization: Bearer <issued token>`.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tower_http::trace::TraceLayer;

/// Configuration for the mock API server
#[derive(Debug, Clone)]
pub struct MockApiConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Accepted username
    pub username: String,
    /// Accepted password
    pub password: String,
    /// Response field carrying the token (token, access_token or jwt)
    pub token_field: String,
    /// `expires_in` reported on login; omitted when `None`
    pub expires_in: Option<i64>,
}

impl Default for MockApiConfig {
    fn default() -> Self {
        Self {
            port: 0,
            username: "admin".to_string(),
            password: "admin".to_string(),
            token_field: "token".to_string(),
            expires_in: Some(3600),
        }
    }
}

struct MockState {
    config: MockApiConfig,
    tokens: RwLock<HashSet<String>>,
    users: RwLock<BTreeMap<String, Value>>,
    next_id: AtomicU64,
}

impl MockState {
    fn new(config: MockApiConfig) -> Self {
        let users: BTreeMap<String, Value> = seed_users()
            .into_iter()
            .filter_map(|u| {
                let name = u.get("username")?.as_str()?.to_string();
                Some((name, u))
            })
            .collect();
        let next_id = users
            .values()
            .filter_map(|u| u.get("id").and_then(Value::as_u64))
            .max()
            .unwrap_or(0)
            + 1;

        Self {
            config,
            tokens: RwLock::new(HashSet::new()),
            users: RwLock::new(users),
            next_id: AtomicU64::new(next_id),
        }
    }
}

/// Mock API server bound to a local port
pub struct MockApiServer {
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockApiServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockApiConfig) -> Self {
        Self {
            state: Arc::new(MockState::new(config)),
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = build_router(self.state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::info!("Mock API listening on http://127.0.0.1:{}", port);
        Ok(port)
    }

    /// Get the server's port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the server's URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Number of tokens issued and not yet signed out
    pub async fn active_sessions(&self) -> usize {
        self.state.tokens.read().await.len()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Router for the mock API, usable without binding a socket
pub fn router(config: MockApiConfig) -> Router {
    build_router(Arc::new(MockState::new(config)))
}

fn build_router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/users/signin", post(handle_signin))
        .route("/users/signout", post(handle_signout))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:username",
            get(get_user)
                .put(replace_user)
                .patch(update_user)
                .delete(delete_user),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct SigninBody {
    username: Option<String>,
    password: Option<String>,
}

async fn handle_signin(
    State(state): State<Arc<MockState>>,
    Json(body): Json<SigninBody>,
) -> Response {
    let config = &state.config;
    let accepted = body.username.as_deref() == Some(config.username.as_str())
        && body.password.as_deref() == Some(config.password.as_str());

    if !accepted {
        return error(StatusCode::UNAUTHORIZED, "bad credentials");
    }

    let token = uuid::Uuid::new_v4().to_string();
    state.tokens.write().await.insert(token.clone());

    let mut payload = serde_json::Map::new();
    payload.insert(config.token_field.clone(), Value::String(token));
    if let Some(expires_in) = config.expires_in {
        payload.insert("expires_in".to_string(), json!(expires_in));
    }

    (StatusCode::OK, Json(Value::Object(payload))).into_response()
}

async fn handle_signout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Some(token) if state.tokens.write().await.remove(token) => {
            (StatusCode::OK, Json(json!({"message": "signed out"}))).into_response()
        }
        _ => error(StatusCode::UNAUTHORIZED, "invalid token"),
    }
}

async fn list_users(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }

    let users: Vec<Value> = state.users.read().await.values().cloned().collect();
    (StatusCode::OK, Json(Value::Array(users))).into_response()
}

async fn create_user(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }

    let username = match body.get("username").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return error(StatusCode::BAD_REQUEST, "username is required"),
    };

    let mut users = state.users.write().await;
    if users.contains_key(&username) {
        return error(StatusCode::CONFLICT, "user already exists");
    }

    let mut user = body;
    user["id"] = json!(state.next_id.fetch_add(1, Ordering::SeqCst));
    users.insert(username, user.clone());

    (StatusCode::CREATED, Json(user)).into_response()
}

async fn get_user(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }

    match state.users.read().await.get(&username) {
        Some(user) => (StatusCode::OK, Json(user.clone())).into_response(),
        None => error(StatusCode::NOT_FOUND, "user not found"),
    }
}

async fn replace_user(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }

    if !body.is_object() {
        return error(StatusCode::BAD_REQUEST, "body must be an object");
    }

    let mut users = state.users.write().await;
    let Some(existing) = users.get_mut(&username) else {
        return error(StatusCode::NOT_FOUND, "user not found");
    };

    let id = existing.get("id").cloned().unwrap_or(Value::Null);
    let mut user = body;
    user["id"] = id;
    user["username"] = Value::String(username);
    *existing = user.clone();

    (StatusCode::OK, Json(user)).into_response()
}

async fn update_user(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }

    let Value::Object(changes) = body else {
        return error(StatusCode::BAD_REQUEST, "body must be an object");
    };

    let mut users = state.users.write().await;
    let Some(existing) = users.get_mut(&username) else {
        return error(StatusCode::NOT_FOUND, "user not found");
    };

    for (key, value) in changes {
        // Identity fields are fixed
        if key != "id" && key != "username" {
            existing[key.as_str()] = value;
        }
    }

    (StatusCode::OK, Json(existing.clone())).into_response()
}

async fn delete_user(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }

    match state.users.write().await.remove(&username) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND, "user not found"),
    }
}

async fn authorize(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    match bearer(headers) {
        Some(token) if state.tokens.read().await.contains(token) => Ok(()),
        _ => Err(error(StatusCode::UNAUTHORIZED, "Unauthorized")),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn seed_users() -> Vec<Value> {
    vec![
        json!({
            "id": 1,
            "name": "Leanne Graham",
            "username": "bret",
            "email": "sincere@april.biz"
        }),
        json!({
            "id": 2,
            "name": "Ervin Howell",
            "username": "antonette",
            "email": "shanna@melissa.tv"
        }),
    ]
}
