//! Turns configuration plus a key blob into a `BatchRequest`
//!
//! Gemini probes are wrapped with the paid tier hook; each request gets its own
//! detection queue so the tier probe targets the request's model.

use std::sync::Arc;

use key_pool::{BatchRequest, PaidDetectionQueue, PaidTierHook};
use provider::{GeminiTierProbe, HttpSettings, ProviderKind, ProviderProbe};

use crate::config::{PaidDetectionConfig, ValidationConfig};

#[derive(Clone)]
pub struct BatchPlanner {
    validation: ValidationConfig,
    paid: PaidDetectionConfig,
    http: HttpSettings,
}

impl BatchPlanner {
    pub fn new(validation: ValidationConfig, paid: PaidDetectionConfig, client: reqwest::Client) -> Self {
        let http = HttpSettings::new(client, validation.request_timeout())
            .with_base_url(validation.proxy_base_url.clone());
        Self {
            validation,
            paid,
            http,
        }
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.validation.provider
    }

    /// Probe for `kind`, with paid tier detection where the provider has it.
    pub fn probe(&self, kind: ProviderKind, model: &str) -> Arc<dyn ProviderProbe> {
        let probe = provider::probe_for(kind, &self.http);
        if !kind.supports_paid_detection() {
            return probe;
        }
        let tier = Arc::new(GeminiTierProbe::new(
            &self.http,
            model,
            self.paid.min_payload_chars,
        ));
        let queue = Arc::new(PaidDetectionQueue::new(
            tier,
            self.paid.concurrency,
            self.paid.backoff(),
        ));
        Arc::new(PaidTierHook::new(probe, queue))
    }

    /// Request for `input`; provider and model fall back to the configured ones.
    pub fn request(
        &self,
        input: String,
        provider: Option<ProviderKind>,
        model: Option<String>,
    ) -> BatchRequest {
        let kind = provider.unwrap_or(self.validation.provider);
        let model = model.unwrap_or_else(|| self.validation.model.clone());
        BatchRequest {
            probe: self.probe(kind, &model),
            input,
            model,
            concurrency_limit: self.validation.concurrency_limit,
            max_retries: self.validation.max_retries,
            jitter: self.validation.jitter(),
        }
    }
}
