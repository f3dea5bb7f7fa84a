//! Per-connection relay state machine
//!
//! A [`Connection`] owns the accepted client socket and, once a route is
//! known, the backend socket. It moves through an explicit state value so
//! each transition can be tested in isolation: buffer-and-sniff, resolve,
//! connect, flush the buffer, then steady-state bidirectional copy. Every
//! terminal path converges on [`RelayState::Closed`] exactly once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hostbound_sniff::{SniffOutcome, Sniffer};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use crate::resolver::{strip_port, ResolveError, Resolver};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Client preamble carried no usable destination host")]
    MalformedPreamble,

    #[error("Client sent {0} bytes without a routable preamble")]
    SniffLimitExceeded(usize),

    #[error("Resolution error: {0}")]
    ResolveError(#[from] ResolveError),

    #[error("Failed to connect to backend {addr}: {reason}")]
    BackendConnectFailed { addr: SocketAddr, reason: String },

    #[error("Backend connect to {0} timed out")]
    BackendConnectTimeout(SocketAddr),
}

/// Tunables for a single relayed connection.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Port the backend is dialed on; fixed per deployment, never taken
    /// from the client.
    pub backend_port: u16,
    /// Cap on bytes buffered before a route is found.
    pub max_sniff_bytes: usize,
    /// Backend connect timeout.
    pub connect_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            backend_port: 80,
            max_sniff_bytes: 16 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of a relayed connection. States are mutually exclusive;
/// `Closed` is terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Buffering client bytes, sniffing for a destination.
    AwaitingRoute,
    /// Destination known, hostname lookup in flight.
    Resolving,
    /// Backend connect in flight.
    Connecting,
    /// Steady-state bidirectional forwarding.
    Relaying,
    /// Both sockets released.
    Closed,
}

/// One accepted client socket and, once routed, its backend socket.
pub struct Connection {
    client: TcpStream,
    backend: Option<TcpStream>,
    state: RelayState,
    pending: BytesMut,
    peer_addr: SocketAddr,
}

impl Connection {
    pub fn new(client: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            client,
            backend: None,
            state: RelayState::AwaitingRoute,
            pending: BytesMut::new(),
            peer_addr,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Drive the connection to completion. Every path, success or failure,
    /// releases both sockets before returning.
    pub async fn run(
        mut self,
        sniffer: &dyn Sniffer,
        resolver: &dyn Resolver,
        settings: &RelaySettings,
    ) -> Result<(), RelayError> {
        let started = Instant::now();
        let bytes_in = Arc::new(AtomicU64::new(0));
        let bytes_out = Arc::new(AtomicU64::new(0));

        let result = self
            .drive(sniffer, resolver, settings, &bytes_in, &bytes_out)
            .await;
        self.close().await;

        debug!(
            "Connection from {} closed ({}ms, ↓{}B ↑{}B)",
            self.peer_addr,
            started.elapsed().as_millis(),
            bytes_in.load(Ordering::Relaxed),
            bytes_out.load(Ordering::Relaxed)
        );

        result
    }

    async fn drive(
        &mut self,
        sniffer: &dyn Sniffer,
        resolver: &dyn Resolver,
        settings: &RelaySettings,
        bytes_in: &Arc<AtomicU64>,
        bytes_out: &Arc<AtomicU64>,
    ) -> Result<(), RelayError> {
        let Some(host) = self.await_route(sniffer, settings.max_sniff_bytes).await? else {
            // Client went away before a route was found
            return Ok(());
        };

        info!("📥 Connection from {} for host: {}", self.peer_addr, host);

        let addr = self
            .resolve_backend(resolver, &host, settings.backend_port)
            .await?;

        info!("🔀 Routing {} to backend {}", host, addr);

        self.connect_backend(addr, settings.connect_timeout).await?;
        bytes_in.fetch_add(self.pending.len() as u64, Ordering::Relaxed);
        self.flush_pending().await?;

        self.transition(RelayState::Relaying);
        if let Some(backend) = self.backend.as_mut() {
            forward_streams(
                &mut self.client,
                backend,
                bytes_in.clone(),
                bytes_out.clone(),
            )
            .await;
        }

        Ok(())
    }

    /// Read client bytes into the pending buffer and sniff after each read
    /// until the sniffer decides. `Ok(None)` means the client closed before
    /// any decision.
    async fn await_route(
        &mut self,
        sniffer: &dyn Sniffer,
        max_sniff_bytes: usize,
    ) -> Result<Option<String>, RelayError> {
        let mut buf = [0u8; 8192];
        loop {
            let n = self.client.read(&mut buf).await?;
            if n == 0 {
                debug!(
                    "Client {} closed before sending a routable preamble",
                    self.peer_addr
                );
                return Ok(None);
            }
            if self.pending.len() + n > max_sniff_bytes {
                return Err(RelayError::SniffLimitExceeded(self.pending.len() + n));
            }
            self.pending.extend_from_slice(&buf[..n]);

            match sniffer.sniff(&self.pending) {
                SniffOutcome::NeedMoreData => continue,
                SniffOutcome::Invalid => return Err(RelayError::MalformedPreamble),
                SniffOutcome::RouteTo(host) => return Ok(Some(host)),
            }
        }
    }

    async fn resolve_backend(
        &mut self,
        resolver: &dyn Resolver,
        host: &str,
        port: u16,
    ) -> Result<SocketAddr, RelayError> {
        self.transition(RelayState::Resolving);
        let addrs = resolver.resolve(strip_port(host), port).await?;

        // Prefer IPv4 addresses
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ResolveError::NoAddresses(host.to_string()))?;

        Ok(addr)
    }

    async fn connect_backend(
        &mut self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<(), RelayError> {
        self.transition(RelayState::Connecting);
        let backend = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(RelayError::BackendConnectFailed {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(RelayError::BackendConnectTimeout(addr)),
        };
        self.backend = Some(backend);
        Ok(())
    }

    /// Write everything buffered before the backend existed, exactly once.
    /// The backend observes the same byte sequence the client sent.
    async fn flush_pending(&mut self) -> Result<(), RelayError> {
        if let Some(backend) = self.backend.as_mut() {
            if !self.pending.is_empty() {
                backend.write_all(&self.pending).await?;
                self.pending.clear();
            }
        }
        Ok(())
    }

    /// Release both sockets. Entering `Closed` twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == RelayState::Closed {
            return;
        }
        self.transition(RelayState::Closed);
        if let Some(mut backend) = self.backend.take() {
            let _ = backend.shutdown().await;
        }
        let _ = self.client.shutdown().await;
    }

    fn transition(&mut self, next: RelayState) {
        trace!(
            "Connection {} state {:?} -> {:?}",
            self.peer_addr,
            self.state,
            next
        );
        self.state = next;
    }
}

/// Steady-state bidirectional copy. EOF on one side shuts down the opposite
/// write half and ends the relay; an error counts as that side's close and
/// is never retried.
async fn forward_streams(
    client: &mut TcpStream,
    backend: &mut TcpStream,
    bytes_in: Arc<AtomicU64>,
    bytes_out: Arc<AtomicU64>,
) {
    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    let client_to_backend = async move {
        let mut buf = [0u8; 8192];
        loop {
            match client_read.read(&mut buf).await {
                Ok(0) => {
                    debug!("Client closed connection");
                    let _ = backend_write.shutdown().await;
                    break;
                }
                Ok(n) => {
                    bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                    if let Err(e) = backend_write.write_all(&buf[..n]).await {
                        debug!("Error writing to backend: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    debug!("Error reading from client: {}", e);
                    break;
                }
            }
        }
    };

    let backend_to_client = async move {
        let mut buf = [0u8; 8192];
        loop {
            match backend_read.read(&mut buf).await {
                Ok(0) => {
                    debug!("Backend closed connection");
                    let _ = client_write.shutdown().await;
                    break;
                }
                Ok(n) => {
                    bytes_out.fetch_add(n as u64, Ordering::Relaxed);
                    if let Err(e) = client_write.write_all(&buf[..n]).await {
                        debug!("Error writing to client: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    debug!("Error reading from backend: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = client_to_backend => {}
        _ = backend_to_client => {}
    }
}
