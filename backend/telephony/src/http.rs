//! Shared HTTP plumbing for adapters: client construction and error mapping.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use callforge_core::{CallError, ProviderKind};

/// Default bound on a single provider request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a transport failure. Timeouts and connection failures are retryable network errors.
pub fn transport_error(provider: ProviderKind, err: reqwest::Error) -> CallError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CallError::Network {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    } else {
        CallError::provider(provider.as_str(), err.to_string(), None)
    }
}

/// Fail with a provider error on non-2xx, otherwise parse the JSON body.
///
/// An empty 2xx body parses as `null`.
pub async fn json_body(provider: ProviderKind, response: Response) -> Result<Value, CallError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if !status.is_success() {
        return Err(status_error(provider, status, &text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| {
        CallError::provider(provider.as_str(), format!("invalid response body: {e}"), Some(status.as_u16()))
    })
}

pub fn status_error(provider: ProviderKind, status: StatusCode, body: &str) -> CallError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string());
    CallError::provider(
        provider.as_str(),
        format!("{provider} API error {status}: {detail}"),
        Some(status.as_u16()),
    )
}

/// First candidate (dotted paths allowed) holding a non-empty string or number.
pub fn pick_str(value: &Value, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|path| {
        let mut current = value;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        match current {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

/// Extract a call id from a dial response or fail loudly.
pub fn require_call_id(provider: ProviderKind, body: &Value, candidates: &[&str]) -> Result<String, CallError> {
    pick_str(body, candidates).ok_or_else(|| {
        CallError::provider(
            provider.as_str(),
            format!("{provider} response did not include a call id"),
            None,
        )
    })
}
