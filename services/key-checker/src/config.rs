//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Only `validation.provider` and `validation.model` are required; every
//! other field has a default. `KEYCHECK_PROXY_BASE_URL` overrides
//! `validation.proxy_base_url`.

use key_pool::{BackoffPolicy, JitterWindow};
use provider::ProviderKind;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PROXY_ENV: &str = "KEYCHECK_PROXY_BASE_URL";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub validation: ValidationConfig,
    #[serde(default)]
    pub paid_detection: PaidDetectionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Batch validation settings
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    pub provider: ProviderKind,
    pub model: String,
    /// Replaces the provider's default API host, e.g. a relay or proxy
    #[serde(default)]
    pub proxy_base_url: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_jitter_min")]
    pub retry_jitter_min_ms: u64,
    #[serde(default = "default_jitter_max")]
    pub retry_jitter_max_ms: u64,
}

/// Paid tier detection queue settings (Gemini only)
#[derive(Debug, Clone, Deserialize)]
pub struct PaidDetectionConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_paid_retries")]
    pub max_retries: u32,
    /// Prompt size for the tier probe; free-tier keys reject large payloads
    #[serde(default = "default_min_payload")]
    pub min_payload_chars: usize,
}

/// HTTP API settings for `--serve`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Concurrent requests served before new ones wait
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_concurrency() -> usize {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_request_timeout() -> u64 {
    20
}

fn default_jitter_min() -> u64 {
    300
}

fn default_jitter_max() -> u64 {
    800
}

fn default_base_delay() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    16_000
}

fn default_paid_retries() -> u32 {
    3
}

fn default_min_payload() -> usize {
    1024
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

fn default_max_connections() -> usize {
    64
}

impl Default for PaidDetectionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            base_delay_ms: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay(),
            max_retries: default_paid_retries(),
            min_payload_chars: default_min_payload(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl ValidationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn jitter(&self) -> JitterWindow {
        JitterWindow::new(
            Duration::from_millis(self.retry_jitter_min_ms),
            Duration::from_millis(self.retry_jitter_max_ms),
        )
    }
}

impl PaidDetectionConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.base_delay_ms),
            factor: self.backoff_factor,
            max: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var(PROXY_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                config.validation.proxy_base_url = Some(url.to_string());
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let v = &self.validation;
        if v.model.trim().is_empty() {
            return Err(common::Error::invalid("validation.model", "must not be empty"));
        }

        if let Some(url) = &v.proxy_base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::invalid(
                    "validation.proxy_base_url",
                    format!("must start with http:// or https://, got: {url}"),
                ));
            }
        }

        if v.concurrency_limit == 0 {
            return Err(common::Error::invalid(
                "validation.concurrency_limit",
                "must be at least 1",
            ));
        }

        if v.request_timeout_secs == 0 {
            return Err(common::Error::invalid(
                "validation.request_timeout_secs",
                "must be greater than 0",
            ));
        }

        if v.retry_jitter_max_ms < v.retry_jitter_min_ms {
            return Err(common::Error::invalid(
                "validation.retry_jitter_max_ms",
                format!(
                    "must be >= retry_jitter_min_ms ({})",
                    v.retry_jitter_min_ms
                ),
            ));
        }

        let p = &self.paid_detection;
        if p.concurrency == 0 {
            return Err(common::Error::invalid(
                "paid_detection.concurrency",
                "must be at least 1",
            ));
        }

        if !p.backoff_factor.is_finite() || p.backoff_factor < 1.0 {
            return Err(common::Error::invalid(
                "paid_detection.backoff_factor",
                format!("must be a finite number >= 1.0, got: {}", p.backoff_factor),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::invalid(
                "server.max_connections",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("key-checker.toml")
    }
}
