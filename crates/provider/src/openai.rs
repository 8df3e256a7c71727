//! OpenAI-compatible chat completions probe

use std::time::Duration;

use serde_json::{Value, json};

use crate::classify::non_empty_array;
use crate::http::{HttpSettings, execute, key_header};
use crate::{Outcome, ProbeFuture, ProviderKind, ProviderProbe, Result};

/// Validates keys with a one-token chat completion.
pub struct OpenAiProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAiProbe {
    pub fn new(settings: &HttpSettings) -> Self {
        Self {
            client: settings.client.clone(),
            base_url: settings.base_for(ProviderKind::OpenAi),
            timeout: settings.timeout,
        }
    }

    fn has_choices(body: &Value) -> bool {
        non_empty_array(body, "choices")
    }
}

impl ProviderProbe for OpenAiProbe {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn probe<'a>(&'a self, key: &'a str, model: &'a str) -> ProbeFuture<'a, Result<Outcome>> {
        Box::pin(async move {
            let auth = key_header(&format!("Bearer {key}"))?;
            let request = self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header(reqwest::header::AUTHORIZATION, auth)
                .timeout(self.timeout)
                .json(&json!({
                    "model": model,
                    "messages": [{"role": "user", "content": "hi"}],
                    "max_tokens": 1,
                }));
            Ok(execute(ProviderKind::OpenAi, request, Self::has_choices).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_url, start_mock};

    fn probe_at(url: &str) -> OpenAiProbe {
        OpenAiProbe::new(
            &HttpSettings::new(reqwest::Client::new(), Duration::from_secs(5))
                .with_base_url(Some(url.to_string())),
        )
    }

    #[tokio::test]
    async fn valid_key_sends_bearer_and_minimal_body() {
        let (url, captured) =
            start_mock(200, r#"{"choices":[{"message":{"content":"h"}}]}"#).await;
        let outcome = probe_at(&url).probe("sk-test", "gpt-4o-mini").await.unwrap();
        assert_eq!(outcome, Outcome::success());

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/v1/chat/completions");
        assert_eq!(requests[0].headers["authorization"], "Bearer sk-test");
        assert_eq!(requests[0].body["model"], "gpt-4o-mini");
        assert_eq!(requests[0].body["max_tokens"], 1);
    }

    #[tokio::test]
    async fn unauthorized_key_is_failure() {
        let (url, _) = start_mock(401, r#"{"error":{"message":"Incorrect API key"}}"#).await;
        let outcome = probe_at(&url).probe("sk-bad", "gpt-4o-mini").await.unwrap();
        assert!(!outcome.success);
        assert!(!outcome.rate_limited);
        assert!(outcome.error_detail.unwrap().ends_with("(401)"));
    }

    #[tokio::test]
    async fn rate_limited_key() {
        let (url, _) = start_mock(429, "").await;
        let outcome = probe_at(&url).probe("sk-busy", "gpt-4o-mini").await.unwrap();
        assert!(outcome.rate_limited);
        assert_eq!(outcome.error_detail.as_deref(), Some("Rate Limited (429)"));
    }

    #[tokio::test]
    async fn missing_choices_is_invalid_format() {
        let (url, _) = start_mock(200, r#"{"object":"chat.completion"}"#).await;
        let outcome = probe_at(&url).probe("sk-test", "gpt-4o-mini").await.unwrap();
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("invalid response format")
        );
    }

    #[tokio::test]
    async fn dead_upstream_is_network_failure() {
        let url = dead_url().await;
        let outcome = probe_at(&url).probe("sk-test", "gpt-4o-mini").await.unwrap();
        assert!(!outcome.success);
        assert!(
            outcome.error_detail.unwrap().starts_with("Network error"),
            "transport failures must be distinguishable from HTTP failures"
        );
    }

    #[tokio::test]
    async fn key_with_newline_is_an_error() {
        let probe = probe_at("http://127.0.0.1:9");
        assert!(probe.probe("sk-\nbroken", "gpt-4o-mini").await.is_err());
    }
}
