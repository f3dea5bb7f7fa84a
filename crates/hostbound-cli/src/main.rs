//! hostbound - route TCP connections by sniffing the destination host

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostbound_relay::{ProxyConfig, SniffProxyServer};

/// Sniffing reverse proxy: reads the destination hostname out of the first
/// bytes a client sends (HTTP Host header or TLS ClientHello SNI), then
/// relays the connection to that host unmodified.
#[derive(Parser, Debug)]
#[command(name = "hostbound")]
#[command(about = "Route TCP connections by sniffing the destination host", long_about = None)]
struct Cli {
    /// Proxy mode: http sniffs the Host header, tls sniffs the ClientHello SNI
    #[arg(long, value_enum, default_value = "http", env = "HOSTBOUND_MODE")]
    mode: Mode,

    /// Address to listen on (defaults to 0.0.0.0:80 for http, 0.0.0.0:443 for tls)
    #[arg(long, env = "HOSTBOUND_LISTEN")]
    listen: Option<SocketAddr>,

    /// Port backends are dialed on (defaults to the mode's standard port)
    #[arg(long, env = "HOSTBOUND_BACKEND_PORT")]
    backend_port: Option<u16>,

    /// Maximum bytes buffered per connection while sniffing for a destination
    #[arg(long, default_value_t = 16 * 1024, env = "HOSTBOUND_MAX_SNIFF_BYTES")]
    max_sniff_bytes: usize,

    /// Backend connect timeout in seconds
    #[arg(long, default_value_t = 10, env = "HOSTBOUND_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    /// Sniff the HTTP Host header, relay to that host
    Http,
    /// Sniff the TLS ClientHello SNI, relay without terminating TLS
    Tls,
}

impl Mode {
    fn standard_port(self) -> u16 {
        match self {
            Mode::Http => 80,
            Mode::Tls => 443,
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let standard_port = cli.mode.standard_port();
    let config = ProxyConfig {
        bind_addr: cli
            .listen
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], standard_port))),
        backend_port: cli.backend_port.unwrap_or(standard_port),
        max_sniff_bytes: cli.max_sniff_bytes,
        connect_timeout: Duration::from_secs(cli.connect_timeout_secs),
    };

    info!(
        "Starting hostbound in {:?} mode on {}",
        cli.mode, config.bind_addr
    );

    let server = match cli.mode {
        Mode::Http => SniffProxyServer::http(config),
        Mode::Tls => SniffProxyServer::tls(config),
    };

    server.start().await?;
    Ok(())
}
