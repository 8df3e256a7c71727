//! Shared HTTP plumbing for the provider adapters

use std::time::Duration;

use reqwest::header::HeaderValue;
use serde_json::Value;
use tracing::debug;

use crate::classify::{classify_error_status, classify_ok_body, network_failure};
use crate::{Outcome, ProviderError, ProviderKind, Result};

/// Client and endpoint settings handed to every adapter.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub client: reqwest::Client,
    /// Replaces the provider's default base URL (relay / proxy deployments)
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSettings {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            base_url: None,
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    /// Base URL for `kind` without a trailing slash.
    pub fn base_for(&self, kind: ProviderKind) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

/// Build a header value from key material.
///
/// Keys pasted from documents sometimes carry characters that are illegal in
/// headers; that is the one failure adapters report as an error.
pub(crate) fn key_header(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|e| ProviderError::InvalidKey(format!("{e}")))?;
    header.set_sensitive(true);
    Ok(header)
}

/// Send a probe request and classify the response.
pub(crate) async fn execute(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
    has_marker: fn(&Value) -> bool,
) -> Outcome {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            debug!(provider = provider.id(), error = %e, "probe transport failure");
            return network_failure(&e);
        }
    };

    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            debug!(provider = provider.id(), status, error = %e, "failed to read probe body");
            return network_failure(&e);
        }
    };

    if !(200..300).contains(&status) {
        debug!(provider = provider.id(), status, "probe returned error status");
        return classify_error_status(status, &body);
    }

    classify_ok_body(&body, has_marker)
}
