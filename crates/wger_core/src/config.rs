use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WgerConfig {
    pub api: ApiConfig,
    /// Absent block = no retries.
    pub retry: Option<RetryConfig>,
    /// Absent block = no circuit breaking.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub url_guard: UrlGuardConfig,
    pub weight_cache: WeightCacheConfig,
}

impl WgerConfig {
    /// Parse `path` as TOML, then apply environment overrides.
    /// Sections and fields left out of the file keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read wger config {}", path.display()))?;
        let mut config: WgerConfig = toml::from_str(&content)
            .with_context(|| format!("Malformed wger config {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// [`Self::load`], or built-in defaults plus environment overrides when the
    /// file is missing or unreadable. A malformed file is logged as a warning.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Self::from_env();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring config: {:#}", e);
            Self::from_env()
        })
    }

    fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WGER_BASE_URL") {
            self.api.base_url = v;
        }
        if let Ok(v) = std::env::var("WGER_API_TOKEN") {
            self.api.token = Some(v);
        }
        if let Ok(v) = std::env::var("WGER_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.api.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("WGER_ENV") {
            self.url_guard.is_development = v.eq_ignore_ascii_case("development");
        }
        if let Ok(v) = std::env::var("WGER_SKIP_DNS") {
            self.url_guard.skip_dns = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// wger API key, sent as `Authorization: Token <key>`.
    pub token: Option<String>,
    /// Per-attempt request timeout.
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://wger.de".to_string(),
            token: None,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the capped delay used as symmetric jitter. Clamped to [0, 1].
    pub jitter_ratio: f64,
    pub retryable_status_codes: Vec<u16>,
    pub retry_on_network_error: bool,
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
            retryable_status_codes: vec![429, 502, 503, 504],
            retry_on_network_error: true,
            retry_on_timeout: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. 0 opens on the first failure.
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Successful probes needed in half-open before closing again.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UrlGuardConfig {
    /// Development mode relaxes loopback/private-address checks to warnings.
    pub is_development: bool,
    pub skip_dns: bool,
    /// Hostnames (and their subdomains) trusted without DNS re-checking.
    pub allowed_domains: Vec<String>,
    pub dns_timeout_ms: u64,
    pub dns_failure_policy: DnsFailurePolicy,
}

impl Default for UrlGuardConfig {
    fn default() -> Self {
        Self {
            is_development: false,
            skip_dns: false,
            allowed_domains: vec![],
            dns_timeout_ms: 3_000,
            dns_failure_policy: DnsFailurePolicy::FailOpen,
        }
    }
}

/// What the URL validator does when a hostname cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsFailurePolicy {
    /// Record a warning and accept the URL.
    #[default]
    FailOpen,
    /// Treat the failure as a validation error.
    FailClosed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightCacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for WeightCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 32,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
