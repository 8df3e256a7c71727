//! Anthropic messages API probe

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{Value, json};

use crate::classify::non_empty_array;
use crate::http::{HttpSettings, execute, key_header};
use crate::{Outcome, ProbeFuture, ProviderKind, ProviderProbe, Result};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ClaudeProbe {
    pub fn new(settings: &HttpSettings) -> Self {
        Self {
            client: settings.client.clone(),
            base_url: settings.base_for(ProviderKind::Claude),
            timeout: settings.timeout,
        }
    }

    fn has_content(body: &Value) -> bool {
        non_empty_array(body, "content")
    }
}

impl ProviderProbe for ClaudeProbe {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn probe<'a>(&'a self, key: &'a str, model: &'a str) -> ProbeFuture<'a, Result<Outcome>> {
        Box::pin(async move {
            let api_key = key_header(key)?;
            let request = self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header(HeaderName::from_static("x-api-key"), api_key)
                .header(
                    HeaderName::from_static("anthropic-version"),
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                )
                .timeout(self.timeout)
                .json(&json!({
                    "model": model,
                    "max_tokens": 1,
                    "messages": [{"role": "user", "content": "hi"}],
                }));
            Ok(execute(ProviderKind::Claude, request, Self::has_content).await)
        })
    }
}
