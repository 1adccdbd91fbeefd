// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Safety margin subtracted from a token's expiry before it is considered stale (5 minutes)
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// Lifetime assumed when the login response carries no `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Longest lifetime accepted from a login response (one year)
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 3600;

/// Candidate token fields in the login response, tried in order
pub const TOKEN_FIELDS: [&str; 3] = ["token", "access_token", "jwt"];

/// Login endpoint path, relative to the base URL
pub const SIGNIN_PATH: &str = "/users/signin";

/// Logout endpoint path, relative to the base URL
pub const SIGNOUT_PATH: &str = "/users/signout";

/// Expiry buffer as a duration
pub fn expiry_buffer() -> Duration {
    Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// Expiry for a token issued at `now` with the server-reported `expires_in`
/// Lifetimes beyond a year either way are clamped to one year.
pub fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let secs = expires_in.clamp(-MAX_TOKEN_LIFETIME_SECS, MAX_TOKEN_LIFETIME_SECS);
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

/// Observable token validity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// No token cached
    Empty,
    /// Token cached and outside the expiry buffer
    Valid,
    /// Token cached but inside the expiry buffer (or past expiry)
    Expiring,
}

/// Cached token and its expiry; both present or both absent
#[derive(Debug, Clone, Default)]
pub struct TokenState {
    inner: Option<CachedToken>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl TokenState {
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            inner: Some(CachedToken { token, expires_at }),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.inner.as_ref().map(|c| c.token.as_str())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.as_ref().map(|c| c.expires_at)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Validity at the given instant; the buffer boundary counts as expiring
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        match self.inner {
            None => TokenStatus::Empty,
            Some(ref cached) if now >= cached.expires_at - expiry_buffer() => TokenStatus::Expiring,
            Some(_) => TokenStatus::Valid,
        }
    }
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Token data extracted from a successful login
#[derive(Debug, Clone)]
pub struct TokenData {
    pub token: String,
    pub expires_in: i64,
}
