//! TLS ClientHello SNI sniffing
//!
//! Walks the binary ClientHello layout far enough to find the server_name
//! extension. TLS records and TCP segments are not aligned, so a ClientHello
//! routinely spans several reads; every length check distinguishes "the
//! declared field runs past what is buffered" (more data expected) from "the
//! record is complete and carries no SNI" (invalid).

use tracing::trace;

use crate::{SniffOutcome, Sniffer};

/// Record header: content type (1) + version (2) + record length (2).
const TLS_HEADER_LEN: usize = 5;
/// Handshake header (4) + client version (2) + random (32).
const CLIENT_HELLO_FIXED_LEN: usize = 38;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;

/// Sniffs the destination from the SNI extension of a TLS ClientHello.
pub struct SniSniffer;

impl Sniffer for SniSniffer {
    fn sniff(&self, buf: &[u8]) -> SniffOutcome {
        if buf.len() < TLS_HEADER_LEN + CLIENT_HELLO_FIXED_LEN {
            return SniffOutcome::NeedMoreData;
        }

        // SSLv2 CLIENT-HELLO: high bit of a 2-byte record length, no SNI
        if buf[0] & 0x80 != 0 && buf[2] == 1 {
            return SniffOutcome::Invalid;
        }
        if buf[0] != CONTENT_TYPE_HANDSHAKE {
            return SniffOutcome::Invalid;
        }
        // SNI requires SSL major version 3 (TLS)
        if buf[1] < 3 {
            return SniffOutcome::Invalid;
        }
        if buf[TLS_HEADER_LEN] != HANDSHAKE_TYPE_CLIENT_HELLO {
            return SniffOutcome::Invalid;
        }

        let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize + TLS_HEADER_LEN;
        if buf.len() < record_len {
            return SniffOutcome::NeedMoreData;
        }

        let mut pos = TLS_HEADER_LEN + CLIENT_HELLO_FIXED_LEN;

        // Session ID
        if pos + 1 > buf.len() || pos + 1 + buf[pos] as usize > buf.len() {
            return SniffOutcome::NeedMoreData;
        }
        pos += 1 + buf[pos] as usize;

        // Cipher suites
        if pos + 2 > buf.len() {
            return SniffOutcome::NeedMoreData;
        }
        let cipher_suites_len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
        if pos + 2 + cipher_suites_len > buf.len() {
            return SniffOutcome::NeedMoreData;
        }
        pos += 2 + cipher_suites_len;

        // Compression methods
        if pos + 1 > buf.len() || pos + 1 + buf[pos] as usize > buf.len() {
            return SniffOutcome::NeedMoreData;
        }
        pos += 1 + buf[pos] as usize;

        // Total extensions length
        if pos + 2 > buf.len() {
            return SniffOutcome::NeedMoreData;
        }
        pos += 2;

        // Extensions: 2-byte type + 2-byte length + payload
        loop {
            if pos + 4 > record_len {
                // Record complete, SNI not present; never wait for a second record
                return SniffOutcome::Invalid;
            }
            if pos + 4 > buf.len() {
                return SniffOutcome::NeedMoreData;
            }
            let ext_type = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let ext_len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;

            if ext_type == EXT_SERVER_NAME {
                pos += 4;
                // Server name list: list length (2) + name type (1) + name length (2)
                if pos + 5 > buf.len() {
                    return SniffOutcome::NeedMoreData;
                }
                let name_len = u16::from_be_bytes([buf[pos + 3], buf[pos + 4]]) as usize;
                if pos + 5 + name_len > buf.len() {
                    return SniffOutcome::NeedMoreData;
                }
                let name = &buf[pos + 5..pos + 5 + name_len];
                return match std::str::from_utf8(name) {
                    Ok(hostname) if !hostname.is_empty() => {
                        trace!("Extracted SNI hostname: {}", hostname);
                        SniffOutcome::RouteTo(hostname.to_string())
                    }
                    _ => SniffOutcome::Invalid,
                };
            }

            pos += 4 + ext_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniff(buf: &[u8]) -> SniffOutcome {
        SniSniffer.sniff(buf)
    }

    /// Build a minimal ClientHello carrying `hostname` in the SNI extension.
    fn client_hello_with_sni(hostname: &str) -> Vec<u8> {
        let mut hello = Vec::new();

        // TLS record header
        hello.push(0x16); // Content type: Handshake
        hello.push(0x03); // Version TLS 1.2 (major)
        hello.push(0x03); // Version TLS 1.2 (minor)
        let record_len_at = hello.len();
        hello.extend_from_slice(&[0x00, 0x00]); // Record length placeholder

        // Handshake header
        hello.push(0x01); // Msg type: ClientHello
        let handshake_len_at = hello.len();
        hello.extend_from_slice(&[0x00, 0x00, 0x00]); // Length placeholder

        // Client version + random
        hello.extend_from_slice(&[0x03, 0x03]);
        hello.extend_from_slice(&[0x00; 32]);

        // Session ID (empty)
        hello.push(0x00);

        // Cipher suites (two)
        hello.extend_from_slice(&[0x00, 0x04]);
        hello.extend_from_slice(&[0x00, 0x2f, 0x00, 0x35]);

        // Compression methods (null only)
        hello.push(0x01);
        hello.push(0x00);

        // Extensions length placeholder
        let extensions_len_at = hello.len();
        hello.extend_from_slice(&[0x00, 0x00]);

        // A padding-ish extension first, so the loop has to skip one
        hello.extend_from_slice(&[0x00, 0x15, 0x00, 0x03]); // type: padding, len 3
        hello.extend_from_slice(&[0x00, 0x00, 0x00]);

        // server_name extension
        hello.extend_from_slice(&[0x00, 0x00]); // type
        let sni_len = 5 + hostname.len();
        hello.extend_from_slice(&(sni_len as u16).to_be_bytes()); // extension length
        hello.extend_from_slice(&((sni_len - 2) as u16).to_be_bytes()); // list length
        hello.push(0x00); // name type: host_name
        hello.extend_from_slice(&(hostname.len() as u16).to_be_bytes());
        hello.extend_from_slice(hostname.as_bytes());

        // Backpatch the length fields
        let extensions_len = hello.len() - extensions_len_at - 2;
        hello[extensions_len_at..extensions_len_at + 2]
            .copy_from_slice(&(extensions_len as u16).to_be_bytes());

        let handshake_len = hello.len() - handshake_len_at - 3;
        hello[handshake_len_at] = ((handshake_len >> 16) & 0xff) as u8;
        hello[handshake_len_at + 1] = ((handshake_len >> 8) & 0xff) as u8;
        hello[handshake_len_at + 2] = (handshake_len & 0xff) as u8;

        let record_len = hello.len() - record_len_at - 2;
        hello[record_len_at..record_len_at + 2]
            .copy_from_slice(&(record_len as u16).to_be_bytes());

        hello
    }

    /// Same layout, but without any server_name extension.
    fn client_hello_without_sni() -> Vec<u8> {
        let mut hello = client_hello_with_sni("x");
        // Rebuild by truncating at the extensions and zeroing their length
        let hello_len = hello.len();
        let sni_total = 4 + 5 + 1; // ext header + sub-header + 1-byte name
        let padding_total = 4 + 3;
        hello.truncate(hello_len - sni_total - padding_total);
        let extensions_len_at = hello.len() - 2;
        hello[extensions_len_at..].copy_from_slice(&[0x00, 0x00]);

        // Shrink the backpatched lengths accordingly
        let record_len = hello.len() - 5;
        hello[3..5].copy_from_slice(&(record_len as u16).to_be_bytes());
        let handshake_len = hello.len() - 9;
        hello[6] = ((handshake_len >> 16) & 0xff) as u8;
        hello[7] = ((handshake_len >> 8) & 0xff) as u8;
        hello[8] = (handshake_len & 0xff) as u8;
        hello
    }

    #[test]
    fn test_extracts_sni_hostname() {
        let hello = client_hello_with_sni("example.com");
        assert_eq!(sniff(&hello), SniffOutcome::RouteTo("example.com".into()));
    }

    #[test]
    fn test_extracts_long_subdomain() {
        let hello = client_hello_with_sni("v1-api.staging.example.com");
        assert_eq!(
            sniff(&hello),
            SniffOutcome::RouteTo("v1-api.staging.example.com".into())
        );
    }

    #[test]
    fn test_short_buffer_needs_more() {
        let hello = client_hello_with_sni("example.com");
        assert_eq!(sniff(&hello[..10]), SniffOutcome::NeedMoreData);
        assert_eq!(sniff(&hello[..42]), SniffOutcome::NeedMoreData);
    }

    #[test]
    fn test_truncation_anywhere_needs_more() {
        let hello = client_hello_with_sni("example.com");
        for end in 0..hello.len() {
            assert_eq!(
                sniff(&hello[..end]),
                SniffOutcome::NeedMoreData,
                "prefix of {} bytes should be incomplete",
                end
            );
        }
    }

    #[test]
    fn test_non_handshake_content_type_is_invalid() {
        let mut hello = client_hello_with_sni("example.com");
        hello[0] = 0x00;
        assert_eq!(sniff(&hello), SniffOutcome::Invalid);
    }

    #[test]
    fn test_sslv2_is_invalid() {
        let mut buf = vec![0u8; 64];
        buf[0] = 0x80;
        buf[2] = 0x01;
        assert_eq!(sniff(&buf), SniffOutcome::Invalid);
    }

    #[test]
    fn test_pre_tls_major_version_is_invalid() {
        let mut hello = client_hello_with_sni("example.com");
        hello[1] = 0x02;
        assert_eq!(sniff(&hello), SniffOutcome::Invalid);
    }

    #[test]
    fn test_non_client_hello_handshake_is_invalid() {
        let mut hello = client_hello_with_sni("example.com");
        hello[5] = 0x02; // ServerHello
        assert_eq!(sniff(&hello), SniffOutcome::Invalid);
    }

    #[test]
    fn test_complete_record_without_sni_is_invalid() {
        let hello = client_hello_without_sni();
        assert_eq!(sniff(&hello), SniffOutcome::Invalid);
    }

    #[test]
    fn test_incomplete_record_without_sni_needs_more() {
        let hello = client_hello_without_sni();
        assert_eq!(sniff(&hello[..hello.len() - 1]), SniffOutcome::NeedMoreData);
    }

    #[test]
    fn test_trailing_bytes_after_record_are_ignored() {
        let mut hello = client_hello_with_sni("example.com");
        hello.extend_from_slice(b"application data after the hello");
        assert_eq!(sniff(&hello), SniffOutcome::RouteTo("example.com".into()));
    }
}
