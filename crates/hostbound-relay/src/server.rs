//! Sniffing proxy server
//!
//! One generic accept loop serves both proxy modes: the HTTP variant and the
//! TLS variant differ only in which sniffer inspects the preamble and which
//! port the backend is dialed on. Each accepted socket gets its own task;
//! a failing connection never disturbs the listener or its peers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hostbound_sniff::{HostHeaderSniffer, SniSniffer, Sniffer};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::conn::{Connection, RelaySettings};
use crate::resolver::{DnsResolver, Resolver};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    /// Port the backend is dialed on; fixed per deployment, not negotiated
    /// per connection.
    pub backend_port: u16,
    /// Cap on bytes buffered per connection while sniffing.
    pub max_sniff_bytes: usize,
    /// Backend connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:80".parse().unwrap(),
            backend_port: 80,
            max_sniff_bytes: 16 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ProxyConfig {
    fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            backend_port: self.backend_port,
            max_sniff_bytes: self.max_sniff_bytes,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// TCP server that routes each accepted connection by its sniffed hostname.
pub struct SniffProxyServer {
    config: ProxyConfig,
    sniffer: Arc<dyn Sniffer>,
    resolver: Arc<dyn Resolver>,
}

impl SniffProxyServer {
    pub fn new(config: ProxyConfig, sniffer: Arc<dyn Sniffer>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            config,
            sniffer,
            resolver,
        }
    }

    /// HTTP mode: route by the request's Host header, dial backends on port
    /// 80 unless configured otherwise.
    pub fn http(config: ProxyConfig) -> Self {
        Self::new(config, Arc::new(HostHeaderSniffer), Arc::new(DnsResolver))
    }

    /// TLS mode: route by the ClientHello SNI, dial backends on port 443
    /// unless configured otherwise.
    pub fn tls(config: ProxyConfig) -> Self {
        Self::new(config, Arc::new(SniSniffer), Arc::new(DnsResolver))
    }

    /// Bind the listen socket. Split from [`serve`] so callers can learn the
    /// bound address before the accept loop starts.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            let port = self.config.bind_addr.port();
            let address = self.config.bind_addr.ip().to_string();
            let reason = e.to_string();
            ServerError::BindError {
                address,
                port,
                reason,
            }
        })
    }

    /// Bind and serve until the process exits.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("Sniffing proxy starting on {}", self.config.bind_addr);
        let listener = self.bind().await?;
        info!(
            "✅ Proxy listening on {} (backend port {})",
            self.config.bind_addr, self.config.backend_port
        );
        self.serve(listener).await
    }

    /// Accept loop: one task per connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let settings = self.config.relay_settings();

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);

                    let sniffer = self.sniffer.clone();
                    let resolver = self.resolver.clone();
                    let settings = settings.clone();

                    tokio::spawn(async move {
                        let conn = Connection::new(socket, peer_addr);
                        if let Err(e) = conn
                            .run(sniffer.as_ref(), resolver.as_ref(), &settings)
                            .await
                        {
                            debug!("Connection from {} ended with error: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Listener accept error: {}", e);
                }
            }
        }
    }
}
