// Login and logout calls against the API's user endpoints

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use super::types::{
    LoginRequest, TokenData, DEFAULT_TOKEN_LIFETIME_SECS, SIGNIN_PATH, SIGNOUT_PATH, TOKEN_FIELDS,
};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportRequest};

/// Build a `Bearer <token>` header value
pub fn bearer_value(token: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| Error::InvalidHeader {
        name: AUTHORIZATION.to_string(),
        message: e.to_string(),
    })
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Sign in with username/password and extract the issued token
pub async fn sign_in(
    transport: &dyn Transport,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<TokenData> {
    let url = format!("{}{}", base_url, SIGNIN_PATH);
    let body = serde_json::to_value(LoginRequest { username, password })
        .map_err(|e| Error::Config(format!("Failed to encode login request: {}", e)))?;

    let response = transport
        .execute(TransportRequest::post(url).headers(json_headers()).json(body))
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text();
        tracing::debug!(
            "Login request failed: status={}, body={}",
            status,
            error_text
        );
        return Err(Error::Authentication {
            status: status.as_u16(),
            body: error_text,
        });
    }

    // A body that is not JSON cannot carry a token
    let data: Value = response.json().unwrap_or(Value::Null);
    extract_token(&data)
}

/// Sign out the given token; the caller decides what to do with failures
pub async fn sign_out(transport: &dyn Transport, base_url: &str, token: &str) -> Result<()> {
    let url = format!("{}{}", base_url, SIGNOUT_PATH);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer_value(token)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let response = transport
        .execute(TransportRequest::post(url).headers(headers))
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Authentication {
            status: status.as_u16(),
            body: response.text(),
        });
    }

    Ok(())
}

/// Pull the token and lifetime out of a login response body
pub fn extract_token(data: &Value) -> Result<TokenData> {
    let token = TOKEN_FIELDS
        .iter()
        .filter_map(|field| data.get(*field).and_then(Value::as_str))
        .find(|t| !t.is_empty())
        .ok_or(Error::TokenExtraction)?;

    let expires_in = data
        .get("expires_in")
        .and_then(Value::as_i64)
        .filter(|secs| *secs != 0)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

    Ok(TokenData {
        token: token.to_string(),
        expires_in,
    })
}
