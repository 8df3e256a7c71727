//! Response classification shared by all provider adapters
//!
//! Turns a transport result (status code + body, or a reqwest error) into an
//! `Outcome`. Status codes always end up in the error detail as either a
//! trailing `(NNN)` or an `HTTP NNN` marker so the retry layer can recover
//! them from the text alone.

use serde_json::Value;

use crate::Outcome;

/// Error message fragments that mean "rate limited" even on a 2xx response.
///
/// Some gateways answer 200 with an error envelope when a quota is hit.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "quota",
    "resource_exhausted",
    "resource exhausted",
    "too many requests",
];

/// Whether an error message describes a rate limit or exhausted quota.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Pull a human readable message out of a provider error envelope.
///
/// Understands `{"error":{"message":…}}` (all three providers),
/// `{"error":"…"}` and a bare `{"message":…}`.
pub fn error_message(body: &Value) -> Option<String> {
    match body.get("error") {
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                obj.get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
        Some(Value::String(s)) => Some(s.clone()),
        _ => body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Gemini style error status (`PERMISSION_DENIED`, `RESOURCE_EXHAUSTED`, …).
pub fn error_status(body: &Value) -> Option<&str> {
    body.get("error")?.get("status")?.as_str()
}

fn with_message(label: &str, message: Option<String>, code: u16) -> String {
    match message {
        Some(m) if !m.trim().is_empty() => format!("{label}: {} ({code})", m.trim()),
        _ => format!("{label} ({code})"),
    }
}

/// Classify a non-2xx response.
pub fn classify_error_status(status: u16, body: &str) -> Outcome {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| error_message(&v));

    match status {
        401 => Outcome::failure(with_message("Unauthorized", message, 401)),
        403 => Outcome::failure(with_message("Permission denied", message, 403)),
        429 => Outcome::rate_limited(with_message("Rate Limited", message, 429)),
        _ => match message {
            Some(m) if !m.trim().is_empty() => {
                Outcome::failure(format!("HTTP {status}: {}", m.trim()))
            }
            _ => Outcome::failure(format!("HTTP {status}")),
        },
    }
}

/// Classify a 2xx response body.
///
/// `has_marker` decides whether the parsed body carries the provider's
/// success marker (completion choices, message content, candidates).
pub fn classify_ok_body(body: &str, has_marker: fn(&Value) -> bool) -> Outcome {
    if body.trim().is_empty() {
        return Outcome::failure("Empty response");
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return Outcome::failure(format!("Parse error: {e}")),
    };

    if value.get("error").is_some_and(|e| !e.is_null()) {
        let message = error_message(&value).unwrap_or_else(|| "unknown error".to_string());
        if is_rate_limit_message(&message) {
            return Outcome::rate_limited(format!("Rate Limited: {message} (429)"));
        }
        return Outcome::failure(message);
    }

    if has_marker(&value) {
        Outcome::success()
    } else {
        Outcome::failure("invalid response format")
    }
}

/// Classify a transport-level failure (DNS, connect, timeout, body read).
pub fn network_failure(error: &reqwest::Error) -> Outcome {
    if error.is_timeout() {
        Outcome::failure("Network error: timeout")
    } else if error.is_connect() {
        Outcome::failure(format!("Network error: connection refused ({error})"))
    } else {
        Outcome::failure(format!("Network error: {error}"))
    }
}

/// True when `value[field]` is a non-empty array.
pub fn non_empty_array(value: &Value, field: &str) -> bool {
    value
        .get(field)
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty())
}
