//! Per-key validation state
//!
//! A `CredentialRecord` tracks one distinct key through the validation state
//! machine. Transitions only move forward:
//!
//! - Pending → Testing (first attempt starts)
//! - Testing → Retrying (retryable failure, next attempt scheduled)
//! - Retrying → Retrying (further retries)
//! - Testing/Retrying → Valid | Invalid | RateLimited | Paid (terminal)
//!
//! `Paid` is only reachable for providers with paid tier detection.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use provider::{Outcome, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Pending,
    Testing,
    Retrying,
    Valid,
    Invalid,
    RateLimited,
    Paid,
}

impl KeyStatus {
    /// Terminal statuses in report order.
    pub const TERMINAL: [KeyStatus; 4] = [
        KeyStatus::Paid,
        KeyStatus::Valid,
        KeyStatus::RateLimited,
        KeyStatus::Invalid,
    ];

    /// Status label for logs, metrics and the API.
    pub fn label(&self) -> &'static str {
        match self {
            KeyStatus::Pending => "pending",
            KeyStatus::Testing => "testing",
            KeyStatus::Retrying => "retrying",
            KeyStatus::Valid => "valid",
            KeyStatus::Invalid => "invalid",
            KeyStatus::RateLimited => "rate_limited",
            KeyStatus::Paid => "paid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KeyStatus::Valid | KeyStatus::Invalid | KeyStatus::RateLimited | KeyStatus::Paid
        )
    }

    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        use KeyStatus::*;
        matches!(
            (*self, next),
            (Pending, Testing)
                | (Testing, Retrying)
                | (Retrying, Retrying)
                | (Testing | Retrying, Valid | Invalid | RateLimited | Paid)
        )
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(KeyStatus::Pending),
            "testing" => Ok(KeyStatus::Testing),
            "retrying" => Ok(KeyStatus::Retrying),
            "valid" => Ok(KeyStatus::Valid),
            "invalid" => Ok(KeyStatus::Invalid),
            "rate_limited" => Ok(KeyStatus::RateLimited),
            "paid" => Ok(KeyStatus::Paid),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// One distinct key under test.
///
/// The key value is wrapped in `Secret` and never mutated; logs only ever
/// see `preview()`.
#[derive(Debug)]
pub struct CredentialRecord {
    value: Secret<String>,
    provider: ProviderKind,
    model: String,
    status: KeyStatus,
    last_error: Option<String>,
    attempt: u32,
    is_paid_tier: Option<bool>,
    /// Unix timestamp in milliseconds, set on the terminal transition
    completed_at: Option<u64>,
}

impl CredentialRecord {
    pub fn new(value: String, provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            value: Secret::new(value),
            provider,
            model: model.into(),
            status: KeyStatus::Pending,
            last_error: None,
            attempt: 0,
            is_paid_tier: None,
            completed_at: None,
        }
    }

    pub fn key(&self) -> &str {
        self.value.expose()
    }

    pub fn preview(&self) -> String {
        self.value.preview()
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_paid_tier(&self) -> Option<bool> {
        self.is_paid_tier
    }

    pub fn completed_at(&self) -> Option<u64> {
        self.completed_at
    }

    /// Move to `next`, rejecting backward or skipped transitions.
    pub fn transition(&mut self, next: KeyStatus) -> Result<()> {
        let allowed = self.status.can_transition_to(next)
            && (next != KeyStatus::Paid || self.provider.supports_paid_detection());
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(now_millis());
        }
        Ok(())
    }

    /// Enter attempt `index`: `Testing` for the first, `Retrying` afterwards.
    pub fn begin_attempt(&mut self, index: u32) -> Result<()> {
        if index == 0 {
            self.transition(KeyStatus::Testing)?;
        } else {
            self.transition(KeyStatus::Retrying)?;
        }
        self.attempt = index;
        Ok(())
    }

    /// Record the last outcome and move to its terminal status.
    pub fn finalize(&mut self, outcome: &Outcome) -> Result<KeyStatus> {
        let status = if outcome.success {
            if self.provider.supports_paid_detection() {
                self.is_paid_tier = outcome.paid_hint;
            }
            if self.is_paid_tier == Some(true) {
                KeyStatus::Paid
            } else {
                KeyStatus::Valid
            }
        } else if outcome.rate_limited {
            KeyStatus::RateLimited
        } else {
            KeyStatus::Invalid
        };

        self.last_error = if outcome.success {
            None
        } else {
            outcome.error_detail.clone()
        };
        self.transition(status)?;
        Ok(status)
    }

    /// Serializable snapshot. Full key material only when `reveal_key` is set.
    pub fn view(&self, reveal_key: bool) -> RecordView {
        RecordView {
            key: if reveal_key {
                self.value.expose().clone()
            } else {
                self.preview()
            },
            status: self.status,
            last_error: self.last_error.clone(),
            attempt: self.attempt,
            is_paid_tier: self.is_paid_tier,
            completed_at: self.completed_at,
        }
    }
}

/// Per-key result as reported to the CLI and the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    pub key: String,
    pub status: KeyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paid_tier: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: ProviderKind) -> CredentialRecord {
        CredentialRecord::new("sk-test-0123456789abcdef".into(), provider, "m")
    }

    #[test]
    fn new_record_is_pending_without_timestamp() {
        let r = record(ProviderKind::OpenAi);
        assert_eq!(r.status(), KeyStatus::Pending);
        assert_eq!(r.attempt(), 0);
        assert!(r.completed_at().is_none());
        assert!(r.is_paid_tier().is_none());
    }

    #[test]
    fn forward_transitions_are_allowed() {
        let mut r = record(ProviderKind::OpenAi);
        r.begin_attempt(0).unwrap();
        assert_eq!(r.status(), KeyStatus::Testing);
        r.begin_attempt(1).unwrap();
        assert_eq!(r.status(), KeyStatus::Retrying);
        assert_eq!(r.attempt(), 1);
        r.begin_attempt(2).unwrap();
        assert_eq!(r.attempt(), 2);
        r.transition(KeyStatus::Valid).unwrap();
        assert!(r.completed_at().is_some());
    }

    #[test]
    fn backward_transitions_are_rejected() {
        let mut r = record(ProviderKind::OpenAi);
        assert!(r.transition(KeyStatus::Valid).is_err(), "Pending cannot jump to terminal");
        r.begin_attempt(0).unwrap();
        r.begin_attempt(1).unwrap();
        assert!(r.transition(KeyStatus::Testing).is_err());
        r.transition(KeyStatus::Invalid).unwrap();
        for next in [
            KeyStatus::Pending,
            KeyStatus::Testing,
            KeyStatus::Retrying,
            KeyStatus::Valid,
        ] {
            assert!(r.transition(next).is_err(), "terminal Invalid must not move to {next}");
        }
    }

    #[test]
    fn paid_requires_paid_detection_provider() {
        let mut r = record(ProviderKind::Claude);
        r.begin_attempt(0).unwrap();
        let err = r.transition(KeyStatus::Paid).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { to: KeyStatus::Paid, .. }));
    }

    #[test]
    fn finalize_gemini_paid_hint() {
        let mut r = record(ProviderKind::Gemini);
        r.begin_attempt(0).unwrap();
        let status = r.finalize(&Outcome::success().with_paid_hint(true)).unwrap();
        assert_eq!(status, KeyStatus::Paid);
        assert_eq!(r.is_paid_tier(), Some(true));

        let mut r = record(ProviderKind::Gemini);
        r.begin_attempt(0).unwrap();
        let status = r.finalize(&Outcome::success().with_paid_hint(false)).unwrap();
        assert_eq!(status, KeyStatus::Valid);
        assert_eq!(r.is_paid_tier(), Some(false));
    }

    #[test]
    fn finalize_ignores_paid_hint_for_other_providers() {
        let mut r = record(ProviderKind::OpenAi);
        r.begin_attempt(0).unwrap();
        let status = r.finalize(&Outcome::success().with_paid_hint(true)).unwrap();
        assert_eq!(status, KeyStatus::Valid);
        assert!(r.is_paid_tier().is_none());
    }

    #[test]
    fn finalize_failure_keeps_last_error() {
        let mut r = record(ProviderKind::OpenAi);
        r.begin_attempt(0).unwrap();
        let status = r.finalize(&Outcome::rate_limited("Rate Limited (429)")).unwrap();
        assert_eq!(status, KeyStatus::RateLimited);
        assert_eq!(r.last_error(), Some("Rate Limited (429)"));
        assert!(r.completed_at().is_some());
    }

    #[test]
    fn view_masks_key_unless_revealed() {
        let mut r = record(ProviderKind::OpenAi);
        r.begin_attempt(0).unwrap();
        r.finalize(&Outcome::failure("Unauthorized (401)")).unwrap();

        let masked = r.view(false);
        assert_eq!(masked.key, "sk-t…cdef");
        assert_eq!(masked.status, KeyStatus::Invalid);

        let revealed = r.view(true);
        assert_eq!(revealed.key, "sk-test-0123456789abcdef");

        let json = serde_json::to_value(&masked).unwrap();
        assert_eq!(json["status"], "invalid");
        assert!(json.get("is_paid_tier").is_none());
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            KeyStatus::Pending,
            KeyStatus::Testing,
            KeyStatus::Retrying,
            KeyStatus::Valid,
            KeyStatus::Invalid,
            KeyStatus::RateLimited,
            KeyStatus::Paid,
        ] {
            assert_eq!(status.label().parse::<KeyStatus>().unwrap(), status);
        }
    }
}
