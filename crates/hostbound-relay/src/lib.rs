//! Connection relaying for the sniffing reverse proxy
//!
//! One [`Connection`] per accepted client socket walks an explicit state
//! machine: buffer client bytes and sniff a destination, resolve it, connect
//! to the backend, flush what was buffered, then copy bytes both ways until
//! either side closes. The [`server`] module owns the listen/accept loop and
//! spawns one task per connection.

pub mod conn;
pub mod resolver;
pub mod server;

pub use conn::{Connection, RelayError, RelaySettings, RelayState};
pub use resolver::{strip_port, DnsResolver, ResolveError, Resolver};
pub use server::{ProxyConfig, ServerError, SniffProxyServer};
