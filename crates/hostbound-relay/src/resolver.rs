//! Hostname resolution

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to resolve hostname '{host}': {reason}")]
    LookupFailed { host: String, reason: String },

    #[error("No addresses found for hostname '{0}'")]
    NoAddresses(String),
}

/// Hostname-to-address lookup, injected into the relay so tests can route
/// sniffed hostnames to local listeners.
///
/// A successful resolution is always non-empty.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError>;
}

/// System resolver backed by `tokio::net::lookup_host`.
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ResolveError::LookupFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ResolveError::NoAddresses(host.to_string()));
        }

        trace!("Resolved {} to {} address(es)", host, addrs.len());
        Ok(addrs)
    }
}

/// Drop a `:port` suffix from a sniffed `Host:` value before resolution.
/// The port the client names never selects the backend port; that is fixed
/// per deployment.
pub fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}
