//! SSRF guard for configured base URLs.
//!
//! Checks run in a fixed order: syntax, protocol, cloud metadata hosts,
//! loopback, literal-IP ranges, DNS rebinding, embedded credentials, port.
//! After the first error the remaining error checks are skipped, but the port
//! advisory still runs so its warning is always reported.

use crate::ranges::{self, RestrictedRange};
use crate::resolver::{DnsResolver, ResolveError};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use url::{Host, Url};
use wger_core::{DnsFailurePolicy, UrlGuardConfig};

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Hosts serving cloud instance metadata (AWS, GCP, Azure, Alibaba, ECS).
const METADATA_HOSTS: &[&str] = &[
    "169.254.169.254",
    "169.254.170.2",
    "100.100.100.200",
    "fd00:ec2::254",
    "metadata.google.internal",
    "metadata.goog",
    "metadata",
];

const HTTP_PORTS: &[u16] = &[80, 8080, 8000, 3000];
const HTTPS_PORTS: &[u16] = &[443, 8443];

// ============================================================================
// Options and result
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub is_development: bool,
    pub skip_dns: bool,
    /// Trusted hostnames; they and their subdomains skip the DNS check.
    pub allowed_domains: Vec<String>,
    pub dns_timeout: Duration,
    pub dns_failure_policy: DnsFailurePolicy,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self::from(&UrlGuardConfig::default())
    }
}

impl From<&UrlGuardConfig> for ValidateOptions {
    fn from(config: &UrlGuardConfig) -> Self {
        Self {
            is_development: config.is_development,
            skip_dns: config.skip_dns,
            allowed_domains: config.allowed_domains.clone(),
            dns_timeout: Duration::from_millis(config.dns_timeout_ms),
            dns_failure_policy: config.dns_failure_policy,
        }
    }
}

impl ValidateOptions {
    pub fn development() -> Self {
        Self {
            is_development: true,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self::default()
    }

    pub fn skip_dns(mut self) -> Self {
        self.skip_dns = true;
        self
    }

    fn is_allowed_domain(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|allowed| {
            let allowed = allowed.trim_end_matches('.').to_ascii_lowercase();
            host == allowed || host.ends_with(&format!(".{}", allowed))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub normalized_url: Option<String>,
}

impl ValidationResult {
    fn rejected(error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
            warnings: vec![],
            normalized_url: None,
        }
    }

    /// The accepted URL, or every error that rejected it.
    pub fn into_result(self) -> Result<Url, UrlRejected> {
        let parsed = self.normalized_url.as_deref().map(Url::parse);
        match (self.valid, parsed) {
            (true, Some(Ok(url))) => Ok(url),
            _ => Err(UrlRejected {
                errors: self.errors,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("URL rejected: {}", .errors.join("; "))]
pub struct UrlRejected {
    pub errors: Vec<String>,
}

// ============================================================================
// Validator
// ============================================================================

/// Stateless apart from the injected resolver; safe to share across tasks.
#[derive(Clone)]
pub struct UrlValidator {
    resolver: Arc<dyn DnsResolver>,
}

impl UrlValidator {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Full pipeline including the DNS-rebinding check.
    pub async fn validate(&self, input: &str, options: &ValidateOptions) -> ValidationResult {
        let mut check = match Check::begin(input, options) {
            Ok(check) => check,
            Err(result) => return result,
        };

        check.static_host_checks();
        if let Some(host) = check.dns_target() {
            let lookup = self.resolver.lookup(&host);
            let answer = match tokio::time::timeout(options.dns_timeout, lookup).await {
                Ok(answer) => answer,
                Err(_) => Err(ResolveError::Timeout(options.dns_timeout.as_millis() as u64)),
            };
            check.resolved(&host, answer);
        }
        check.trailing_checks();
        check.finish()
    }

    /// Same pipeline without DNS resolution.
    pub fn validate_sync(&self, input: &str, options: &ValidateOptions) -> ValidationResult {
        validate_sync(input, options)
    }
}

/// Every check except DNS resolution; never blocks.
pub fn validate_sync(input: &str, options: &ValidateOptions) -> ValidationResult {
    let mut check = match Check::begin(input, options) {
        Ok(check) => check,
        Err(result) => return result,
    };
    check.static_host_checks();
    check.trailing_checks();
    check.finish()
}

// ============================================================================
// Individual checks
// ============================================================================

struct Check<'a> {
    url: Url,
    options: &'a ValidateOptions,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> Check<'a> {
    /// Syntax and protocol. Failures here end validation.
    fn begin(input: &str, options: &'a ValidateOptions) -> Result<Self, ValidationResult> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationResult::rejected(
                "URL must be a non-empty string".to_string(),
            ));
        }

        let url = Url::parse(trimmed).map_err(|e| match e {
            url::ParseError::InvalidPort => {
                ValidationResult::rejected(format!("Invalid port in URL: {}", e))
            }
            other => ValidationResult::rejected(format!("Invalid URL format: {}", other)),
        })?;

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(ValidationResult {
                valid: false,
                errors: vec![format!(
                    "Protocol '{}:' is not allowed; only http and https are permitted",
                    url.scheme()
                )],
                warnings: vec![],
                normalized_url: Some(url.to_string()),
            });
        }

        if url.host().is_none() {
            return Err(ValidationResult::rejected("URL must include a host".to_string()));
        }

        Ok(Self {
            url,
            options,
            errors: Vec::new(),
            warnings: Vec::new(),
        })
    }

    fn failed(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Lowercased hostname without trailing dot; IPv6 without brackets.
    fn host_key(&self) -> String {
        match self.url.host() {
            Some(Host::Domain(domain)) => domain.trim_end_matches('.').to_ascii_lowercase(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        }
    }

    fn literal_ip(&self) -> Option<IpAddr> {
        match self.url.host() {
            Some(Host::Ipv4(ip)) => Some(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => Some(IpAddr::V6(ip)),
            _ => None,
        }
    }

    /// Steps that only need the parsed host: metadata, loopback, literal IP.
    fn static_host_checks(&mut self) {
        self.check_metadata();
        self.check_loopback();
        self.check_literal_ip();
    }

    /// Steps after DNS: credentials and port.
    fn trailing_checks(&mut self) {
        self.check_credentials();
        self.check_port();
    }

    fn check_metadata(&mut self) {
        let host = self.host_key();
        let unwrapped = self.literal_ip().map(|ip| ranges::canonical(ip).to_string());
        let is_metadata = METADATA_HOSTS
            .iter()
            .any(|m| *m == host || unwrapped.as_deref() == Some(*m));
        if !is_metadata {
            return;
        }
        if self.options.is_development {
            self.warnings.push(format!(
                "Cloud metadata endpoint '{}' allowed in development mode",
                host
            ));
        } else {
            self.errors.push(format!(
                "Access to cloud metadata endpoint '{}' is blocked",
                host
            ));
        }
    }

    fn check_loopback(&mut self) {
        if self.failed() {
            return;
        }
        let host = self.host_key();
        let loopback = match self.literal_ip() {
            Some(ip) => ranges::is_loopback(ip),
            None => host == "localhost" || host.ends_with(".localhost"),
        };
        if !loopback {
            return;
        }
        if self.options.is_development {
            self.warnings.push(format!(
                "Loopback host '{}' allowed in development mode",
                host
            ));
        } else {
            self.errors.push(format!(
                "Localhost/loopback addresses are not allowed: '{}'",
                host
            ));
        }
    }

    fn check_literal_ip(&mut self) {
        if self.failed() {
            return;
        }
        let Some(ip) = self.literal_ip() else {
            return;
        };
        // Loopback was already reported above.
        if ranges::is_loopback(ip) {
            return;
        }
        if let Some(range) = ranges::restricted_range(ip) {
            if self.options.is_development {
                self.warnings.push(format!(
                    "IP address {} is in a restricted range ({}); allowed in development mode",
                    ip, range.label
                ));
            } else {
                self.errors.push(format!(
                    "IP address {} is in a restricted range ({})",
                    ip, range.label
                ));
            }
        }
    }

    /// Hostname to resolve, if the DNS-rebinding check applies.
    fn dns_target(&self) -> Option<String> {
        if self.failed() || self.options.is_development || self.options.skip_dns {
            return None;
        }
        if self.literal_ip().is_some() {
            return None;
        }
        let host = self.host_key();
        if self.options.is_allowed_domain(&host) {
            return None;
        }
        Some(host)
    }

    fn resolved(&mut self, host: &str, answer: Result<Vec<IpAddr>, ResolveError>) {
        let addrs = match answer {
            Ok(addrs) if !addrs.is_empty() => addrs,
            Ok(_) => return self.dns_failed(host, ResolveError::NotFound(host.to_string())),
            Err(e) => return self.dns_failed(host, e),
        };

        let blocked: Vec<(IpAddr, &RestrictedRange)> = addrs
            .iter()
            .filter_map(|ip| ranges::restricted_range(*ip).map(|range| (*ip, range)))
            .collect();
        for (ip, range) in blocked {
            self.errors.push(format!(
                "Hostname '{}' resolves to restricted address {} ({})",
                host, ip, range.label
            ));
        }
    }

    fn dns_failed(&mut self, host: &str, error: ResolveError) {
        match self.options.dns_failure_policy {
            DnsFailurePolicy::FailOpen => self.warnings.push(format!(
                "DNS resolution failed for '{}' ({}); rebinding check skipped",
                host, error
            )),
            DnsFailurePolicy::FailClosed => self.errors.push(format!(
                "DNS resolution failed for '{}' ({})",
                host, error
            )),
        }
    }

    fn check_credentials(&mut self) {
        if self.failed() {
            return;
        }
        if !self.url.username().is_empty() || self.url.password().is_some() {
            self.errors
                .push("URLs with embedded credentials are not allowed".to_string());
        }
    }

    fn check_port(&mut self) {
        let Some(port) = self.url.port() else {
            return;
        };
        if port == 0 {
            if !self.failed() {
                self.errors.push("Invalid port: 0".to_string());
            }
            return;
        }
        let standard = match self.url.scheme() {
            "http" => HTTP_PORTS,
            _ => HTTPS_PORTS,
        };
        if !standard.contains(&port) {
            self.warnings.push(format!(
                "Non-standard port {} for {}",
                port,
                self.url.scheme()
            ));
        }
    }

    fn finish(self) -> ValidationResult {
        let normalized = self.url.to_string();
        if !self.errors.is_empty() {
            tracing::debug!("URL rejected: {} ({})", normalized, self.errors.join("; "));
        }
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            normalized_url: Some(normalized),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
