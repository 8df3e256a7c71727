//! Provider probes for API key validation
//!
//! Defines the `ProviderProbe` trait that decouples the scheduling engine from
//! the HTTP details of each provider. Every adapter issues one minimal request
//! for one key and folds the response into an `Outcome`; expected failures
//! (bad key, rate limit, network trouble, garbage body) are outcomes, never
//! errors. `PaidTierProbe` is the auxiliary Gemini call used to infer the
//! billing tier of a key that already validated.

pub mod classify;
pub mod claude;
pub mod gemini;
pub mod http;
pub mod openai;

pub use claude::ClaudeProbe;
pub use gemini::{GeminiProbe, GeminiTierProbe};
pub use http::HttpSettings;
pub use openai::OpenAiProbe;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// Provider protocol families a key can be validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions
    #[serde(alias = "openai-compatible")]
    OpenAi,
    /// Anthropic messages API
    #[serde(alias = "anthropic")]
    Claude,
    /// Google Generative Language API
    #[serde(alias = "google")]
    Gemini,
}

impl ProviderKind {
    /// Identifier for logging and metrics labels.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Only Gemini keys get the secondary billing tier probe.
    pub fn supports_paid_detection(&self) -> bool {
        matches!(self, ProviderKind::Gemini)
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::Claude => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAi),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

/// Result of a single probe call against a provider.
///
/// `paid_hint` is only ever set for providers that support paid detection,
/// and only on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_hint: Option<bool>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self {
            rate_limited: true,
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }

    pub fn with_paid_hint(mut self, is_paid: bool) -> Self {
        self.paid_hint = Some(is_paid);
        self
    }

    /// Success and rate limiting are final answers; nothing else is.
    pub fn is_definitive(&self) -> bool {
        self.success || self.rate_limited
    }
}

/// Billing tier inferred by the paid tier probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierVerdict {
    pub is_paid: bool,
    /// `ok`, `permission_denied`, `rate_limited`, `http_<status>` or `network:<detail>`
    pub reason: String,
}

impl TierVerdict {
    pub fn paid() -> Self {
        Self {
            is_paid: true,
            reason: "ok".to_string(),
        }
    }

    pub fn free(reason: impl Into<String>) -> Self {
        Self {
            is_paid: false,
            reason: reason.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        !self.is_paid && self.reason == "rate_limited"
    }
}

/// Unexpected probe failures. Expected failure modes are `Outcome`s instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("key cannot be sent as a header: {0}")]
    InvalidKey(String),

    #[error("internal provider error: {0}")]
    Internal(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by probe trait methods.
///
/// `Pin<Box<dyn Future>>` keeps the traits dyn-compatible (`Arc<dyn ProviderProbe>`).
pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One validation call against one provider for one key.
pub trait ProviderProbe: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Validate `key` by calling `model`.
    ///
    /// Returns `Err` only when the call could not be attempted at all; the
    /// retry layer treats that like a transient exception.
    fn probe<'a>(&'a self, key: &'a str, model: &'a str) -> ProbeFuture<'a, Result<Outcome>>;
}

/// Secondary billing tier probe. Never fails; failures are free-tier verdicts.
pub trait PaidTierProbe: Send + Sync {
    fn probe_tier<'a>(&'a self, key: &'a str) -> ProbeFuture<'a, TierVerdict>;
}

/// Build the HTTP probe for `kind`.
pub fn probe_for(kind: ProviderKind, settings: &HttpSettings) -> Arc<dyn ProviderProbe> {
    match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProbe::new(settings)),
        ProviderKind::Claude => Arc::new(ClaudeProbe::new(settings)),
        ProviderKind::Gemini => Arc::new(GeminiProbe::new(settings)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Claude);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("mistral".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn provider_kind_deserializes_lowercase() {
        let kind: ProviderKind = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(kind, ProviderKind::Gemini);
        let kind: ProviderKind = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(kind, ProviderKind::Claude);
    }

    #[test]
    fn only_gemini_supports_paid_detection() {
        assert!(ProviderKind::Gemini.supports_paid_detection());
        assert!(!ProviderKind::OpenAi.supports_paid_detection());
        assert!(!ProviderKind::Claude.supports_paid_detection());
    }

    #[test]
    fn outcome_constructors() {
        assert!(Outcome::success().is_definitive());
        assert!(Outcome::rate_limited("Rate Limited (429)").is_definitive());
        let failure = Outcome::failure("HTTP 502");
        assert!(!failure.is_definitive());
        assert_eq!(failure.error_detail.as_deref(), Some("HTTP 502"));
        assert_eq!(Outcome::success().with_paid_hint(true).paid_hint, Some(true));
    }

    #[test]
    fn tier_verdict_rate_limited() {
        assert!(TierVerdict::free("rate_limited").is_rate_limited());
        assert!(!TierVerdict::free("permission_denied").is_rate_limited());
        assert!(!TierVerdict::paid().is_rate_limited());
    }
}
