//! Destination sniffing for raw TCP streams
//!
//! Extracts the hostname a client intends to reach from the first bytes it
//! sends, without terminating the protocol: either an HTTP `Host:` header or
//! the SNI extension of a TLS ClientHello. Sniffers are pure functions over
//! the bytes buffered so far and are re-run from scratch as more data
//! arrives, so a header split across TCP segments converges once enough of
//! it is present.

pub mod http;
pub mod tls;

pub use http::HostHeaderSniffer;
pub use tls::SniSniffer;

/// Outcome of inspecting the bytes buffered so far on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffOutcome {
    /// The buffer is a consistent but incomplete prefix; feed more bytes.
    NeedMoreData,
    /// The preamble is complete or malformed and carries no usable hostname.
    Invalid,
    /// Destination hostname found.
    RouteTo(String),
}

/// A destination sniffer.
///
/// Implementations must be pure over `buf`: the same bytes always produce
/// the same outcome, and extending `buf` never turns a decided outcome back
/// into [`SniffOutcome::NeedMoreData`].
pub trait Sniffer: Send + Sync {
    fn sniff(&self, buf: &[u8]) -> SniffOutcome;
}
