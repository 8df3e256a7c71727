//! Retry decision for failed probe outcomes
//!
//! Transient failures are retried, definitive classifications are not:
//! - 403, 502, 503, 504 → retry (403 is ambiguous: some providers use it for throttling)
//! - transport markers in the error text (timeout, network, refused connection, fetch) → retry
//! - everything else (400, 401, 404, application errors) → final
//!
//! Status codes are recovered from the error text, which carries them as a
//! trailing `(NNN)` or an `HTTP NNN` marker.

use std::sync::LazyLock;

use regex::Regex;

/// Status codes that are worth another attempt.
const RETRYABLE_STATUS: &[u16] = &[403, 502, 503, 504];

/// Lowercase fragments that mark a transport-level failure.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "network",
    "econnrefused",
    "connection refused",
    "fetch",
];

static TRAILING_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{3})\)\s*$").expect("valid regex"));

static HTTP_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bHTTP\s+(\d{3})\b").expect("valid regex"));

/// Extract a status code from structured error text.
///
/// Returns `None` ("unknown") when neither marker is present.
pub fn extract_status_code(detail: &str) -> Option<u16> {
    TRAILING_CODE
        .captures(detail)
        .or_else(|| HTTP_CODE.captures(detail))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Decide whether a failure is transient.
///
/// An unknown status code is never retryable by code, only by keyword.
pub fn should_retry(error_detail: &str, status_code: Option<u16>) -> bool {
    if status_code.is_some_and(|code| RETRYABLE_STATUS.contains(&code)) {
        return true;
    }
    let lower = error_detail.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// `should_retry` with the status code taken from the text itself.
pub fn is_retryable(error_detail: &str) -> bool {
    should_retry(error_detail, extract_status_code(error_detail))
}
