//! Response assertions for API tests.
//!
//! Every check returns `Err(Error::Assertion)` describing the mismatch, so
//! tests can use `?` or `unwrap()` as they prefer.

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::TransportResponse;

/// Header some servers use to report their own processing time (ms)
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Outcome of validating a payload against a schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Pluggable schema validation capability
pub trait SchemaValidator {
    fn validate(&self, payload: &Value, schema: &Value) -> ValidationReport;
}

pub fn assert_status(response: &TransportResponse, expected: StatusCode) -> Result<()> {
    if response.status() != expected {
        return Err(Error::Assertion(format!(
            "expected status {}, got {} (body: {})",
            expected,
            response.status(),
            response.text()
        )));
    }
    Ok(())
}

/// Every expected header must be present with exactly the given value
pub fn assert_headers(response: &TransportResponse, expected: &[(&str, &str)]) -> Result<()> {
    for (name, value) in expected {
        match response.header(name) {
            Some(actual) if actual == *value => {}
            Some(actual) => {
                return Err(Error::Assertion(format!(
                    "header '{}': expected '{}', got '{}'",
                    name, value, actual
                )))
            }
            None => {
                return Err(Error::Assertion(format!("header '{}' is missing", name)));
            }
        }
    }
    Ok(())
}

/// Compare the value at a dot path (`data.items.0.id`) with `expected`
pub fn assert_json_path(response: &TransportResponse, path: &str, expected: &Value) -> Result<()> {
    let body = json_body(response)?;
    let actual = lookup_path(&body, path)
        .ok_or_else(|| Error::Assertion(format!("path '{}' not found in body", path)))?;

    if actual != expected {
        return Err(Error::Assertion(format!(
            "path '{}': expected {}, got {}",
            path, expected, actual
        )));
    }
    Ok(())
}

pub fn assert_array_length(response: &TransportResponse, expected: usize) -> Result<()> {
    let body = json_body(response)?;
    let items = body
        .as_array()
        .ok_or_else(|| Error::Assertion("response body is not an array".to_string()))?;

    if items.len() != expected {
        return Err(Error::Assertion(format!(
            "expected {} items, got {}",
            expected,
            items.len()
        )));
    }
    Ok(())
}

/// Response must arrive in under `max`
/// Uses the server-reported `x-response-time` when present, otherwise the
/// transport's measured elapsed time.
pub fn assert_response_time(response: &TransportResponse, max: Duration) -> Result<()> {
    let reported = response
        .header(RESPONSE_TIME_HEADER)
        .and_then(parse_millis)
        .map(Duration::from_millis);
    let actual = reported.unwrap_or_else(|| response.elapsed());

    if actual >= max {
        return Err(Error::Assertion(format!(
            "response took {}ms, limit is {}ms",
            actual.as_millis(),
            max.as_millis()
        )));
    }
    Ok(())
}

pub fn assert_schema(
    response: &TransportResponse,
    schema: &Value,
    validator: &dyn SchemaValidator,
) -> Result<()> {
    let body = json_body(response)?;
    let report = validator.validate(&body, schema);

    if !report.valid {
        return Err(Error::Assertion(format!(
            "schema validation failed: {}",
            report.errors.join(", ")
        )));
    }
    Ok(())
}

fn json_body(response: &TransportResponse) -> Result<Value> {
    response
        .json()
        .map_err(|e| Error::Assertion(format!("response body is not valid JSON: {}", e)))
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => current.get(segment),
    })
}

// "12", "12ms" and "12.5ms" all parse to whole milliseconds
fn parse_millis(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().trim_end_matches("ms").trim();
    trimmed
        .parse::<u64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|ms| ms as u64))
}
