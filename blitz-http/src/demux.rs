//! Protocol Demultiplexer (C5, spec §4.5). Decides HTTP/1.1 vs HTTP/2 on
//! the first decrypted (or cleartext) bytes of a connection; the choice is
//! sticky for the connection's lifetime.

use crate::h1::parser::parse_request;
use crate::h2::conn::CLIENT_PREFACE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxResult {
    Http2,
    Http1,
    /// Not enough bytes yet to decide.
    NeedMoreData,
}

/// Inspects `buf` (the plaintext just produced, whether from cleartext TCP
/// or a TLS terminator) per spec §4.5's ordered checks: connection preface,
/// then ALPN (passed in separately since it is negotiated out-of-band by
/// the TLS layer), then h2c upgrade request, else HTTP/1.1.
pub fn classify(buf: &[u8], alpn_h2: bool) -> DemuxResult {
    if alpn_h2 {
        return DemuxResult::Http2;
    }
    if buf.len() >= CLIENT_PREFACE.len() {
        if buf.starts_with(CLIENT_PREFACE) {
            return DemuxResult::Http2;
        }
        // Enough bytes to rule out a preface match; fall through to HTTP/1.1
        // sniffing below rather than waiting indefinitely.
    } else if CLIENT_PREFACE.starts_with(buf) {
        // What we have so far is a prefix of the preface; wait for more.
        return DemuxResult::NeedMoreData;
    }

    match parse_request(buf) {
        Ok(Some(view)) => {
            if view.is_h2c_upgrade() {
                DemuxResult::Http2
            } else {
                DemuxResult::Http1
            }
        }
        Ok(None) => DemuxResult::NeedMoreData,
        // Malformed as HTTP/1.1 and not a preface: let the HTTP/1.1 engine
        // produce the 400 response (spec §4.6 "on malformed input").
        Err(_) => DemuxResult::Http1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_h2_wins_immediately() {
        assert_eq!(classify(b"", true), DemuxResult::Http2);
    }

    #[test]
    fn preface_selects_http2() {
        assert_eq!(classify(CLIENT_PREFACE, false), DemuxResult::Http2);
    }

    #[test]
    fn partial_preface_prefix_waits() {
        assert_eq!(classify(&CLIENT_PREFACE[..3], false), DemuxResult::NeedMoreData);
    }

    #[test]
    fn h2c_upgrade_request_selects_http2() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\nHTTP2-Settings: AAMAAABkAARAAAAAAAIAAAAA\r\nConnection: Upgrade, HTTP2-Settings\r\n\r\n";
        assert_eq!(classify(raw, false), DemuxResult::Http2);
    }

    #[test]
    fn plain_request_selects_http1() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(classify(raw, false), DemuxResult::Http1);
    }
}
