//! Google Generative Language probes
//!
//! `GeminiProbe` validates a key with a tiny `generateContent` call.
//! `GeminiTierProbe` issues a second call with an oversized prompt: free-tier
//! keys are refused on that path (403 / `PERMISSION_DENIED`) or throttled
//! (429 / `RESOURCE_EXHAUSTED`), while billed keys get a normal 2xx.

use std::time::Duration;

use reqwest::header::HeaderName;
use serde_json::{Value, json};
use tracing::debug;

use crate::classify::{error_status, non_empty_array};
use crate::http::{HttpSettings, execute, key_header};
use crate::{Outcome, PaidTierProbe, ProbeFuture, ProviderKind, ProviderProbe, Result, TierVerdict};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Filler sentence used to pad the tier probe prompt.
const FILLER: &str = "The quick brown fox jumps over the lazy dog. ";

fn generate_url(base_url: &str, model: &str) -> String {
    let model = model.trim().trim_start_matches("models/");
    format!("{base_url}/v1beta/models/{model}:generateContent")
}

pub struct GeminiProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiProbe {
    pub fn new(settings: &HttpSettings) -> Self {
        Self {
            client: settings.client.clone(),
            base_url: settings.base_for(ProviderKind::Gemini),
            timeout: settings.timeout,
        }
    }

    fn has_candidates(body: &Value) -> bool {
        non_empty_array(body, "candidates")
    }
}

impl ProviderProbe for GeminiProbe {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn probe<'a>(&'a self, key: &'a str, model: &'a str) -> ProbeFuture<'a, Result<Outcome>> {
        Box::pin(async move {
            let api_key = key_header(key)?;
            let request = self
                .client
                .post(generate_url(&self.base_url, model))
                .header(HeaderName::from_static(API_KEY_HEADER), api_key)
                .timeout(self.timeout)
                .json(&json!({
                    "contents": [{"parts": [{"text": "hi"}]}],
                    "generationConfig": {"maxOutputTokens": 1},
                }));
            Ok(execute(ProviderKind::Gemini, request, Self::has_candidates).await)
        })
    }
}

/// Billing tier probe for Gemini keys.
pub struct GeminiTierProbe {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    min_payload_chars: usize,
}

impl GeminiTierProbe {
    pub fn new(settings: &HttpSettings, model: impl Into<String>, min_payload_chars: usize) -> Self {
        Self {
            client: settings.client.clone(),
            base_url: settings.base_for(ProviderKind::Gemini),
            model: model.into(),
            timeout: settings.timeout,
            min_payload_chars,
        }
    }

    /// Prompt text at least `min_payload_chars` long.
    fn payload_text(&self) -> String {
        let mut text = String::from("Reply with OK. ");
        while text.len() < self.min_payload_chars {
            text.push_str(FILLER);
        }
        text
    }

    fn classify(status: u16, body: &str) -> TierVerdict {
        if (200..300).contains(&status) {
            return TierVerdict::paid();
        }
        let parsed = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
        match (status, error_status(&parsed)) {
            (_, Some("PERMISSION_DENIED")) | (403, _) => TierVerdict::free("permission_denied"),
            (_, Some("RESOURCE_EXHAUSTED")) | (429, _) => TierVerdict::free("rate_limited"),
            _ => TierVerdict::free(format!("http_{status}")),
        }
    }
}

impl PaidTierProbe for GeminiTierProbe {
    fn probe_tier<'a>(&'a self, key: &'a str) -> ProbeFuture<'a, TierVerdict> {
        Box::pin(async move {
            let api_key = match key_header(key) {
                Ok(h) => h,
                Err(e) => return TierVerdict::free(format!("network:{e}")),
            };
            let response = self
                .client
                .post(generate_url(&self.base_url, &self.model))
                .header(HeaderName::from_static(API_KEY_HEADER), api_key)
                .timeout(self.timeout)
                .json(&json!({
                    "contents": [{"parts": [{"text": self.payload_text()}]}],
                    "generationConfig": {"maxOutputTokens": 1},
                }))
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "tier probe transport failure");
                    return TierVerdict::free(format!("network:{e}"));
                }
            };
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Self::classify(status, &body)
        })
    }
}
