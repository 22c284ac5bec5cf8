//! Hostname resolution used by the DNS-rebinding check.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no addresses found for {0}")]
    NotFound(String),
    #[error("lookup timed out after {0}ms")]
    Timeout(u64),
    #[error("lookup failed: {0}")]
    Io(String),
}

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Every A and AAAA address for `host`.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// The operating system resolver, via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ResolveError::Io(e.to_string()))?;

        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        if ips.is_empty() {
            return Err(ResolveError::NotFound(host.to_string()));
        }
        Ok(ips)
    }
}

/// Fixed answers, for tests and air-gapped setups.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    answers: HashMap<String, Result<Vec<IpAddr>, ResolveError>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.answers
            .insert(host.to_ascii_lowercase(), Ok(addrs.to_vec()));
        self
    }

    pub fn failing(mut self, host: &str, error: ResolveError) -> Self {
        self.answers.insert(host.to_ascii_lowercase(), Err(error));
        self
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.answers
            .get(&host.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| Err(ResolveError::NotFound(host.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let ip: IpAddr = "93.184.216.34".parse().unwrap();
        let resolver = StaticResolver::new()
            .with("Example.com", &[ip])
            .failing("flaky.test", ResolveError::Timeout(3000));

        assert_eq!(resolver.lookup("example.com").await, Ok(vec![ip]));
        assert_eq!(
            resolver.lookup("flaky.test").await,
            Err(ResolveError::Timeout(3000))
        );
        assert!(matches!(
            resolver.lookup("unknown.test").await,
            Err(ResolveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_system_resolver_literal() {
        // Literal addresses resolve without touching the network.
        let ips = SystemResolver.lookup("127.0.0.1").await.unwrap();
        assert_eq!(ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }
}
