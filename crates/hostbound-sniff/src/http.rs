//! HTTP Host-header sniffing

use tracing::trace;

use crate::{SniffOutcome, Sniffer};

const HOST_PREFIX: &[u8] = b"\r\nhost:";
const HEADERS_END: &[u8] = b"\r\n\r\n";

/// Sniffs the destination from the `Host:` header of an HTTP request.
///
/// The buffer is scanned byte-wise for a case-insensitive
/// `\r\nHost:<value>\r\n` line. A request whose header block completes
/// without a Host header, or whose Host value is empty, is invalid; anything
/// short of a complete Host line or header block just needs more data.
pub struct HostHeaderSniffer;

impl Sniffer for HostHeaderSniffer {
    fn sniff(&self, buf: &[u8]) -> SniffOutcome {
        if let Some((start, end)) = find_host_value(buf) {
            let value = buf[start..end].trim_ascii();
            if value.is_empty() {
                return SniffOutcome::Invalid;
            }
            let host = String::from_utf8_lossy(value).into_owned();
            trace!("Extracted Host header value: {}", host);
            return SniffOutcome::RouteTo(host);
        }

        // Header block finished without a Host line
        if contains(buf, HEADERS_END) {
            SniffOutcome::Invalid
        } else {
            SniffOutcome::NeedMoreData
        }
    }
}

/// Byte range of the first complete `\r\nHost:<value>\r\n` value, if any.
fn find_host_value(buf: &[u8]) -> Option<(usize, usize)> {
    let at = buf
        .windows(HOST_PREFIX.len())
        .position(|w| w.eq_ignore_ascii_case(HOST_PREFIX))?;
    let start = at + HOST_PREFIX.len();
    let len = buf[start..].windows(2).position(|w| w == b"\r\n")?;
    Some((start, start + len))
}

fn contains(buf: &[u8], needle: &[u8]) -> bool {
    buf.windows(needle.len()).any(|w| w == needle)
}
