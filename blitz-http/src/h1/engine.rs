//! HTTP/1.1 Engine (C6, spec §4.6): request parse, route, response emit
//! with keep-alive, operating on the connection's already-allocated read/
//! write buffers.

use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::filters::{run_on_request, RequestFilter, RequestMeta};
use crate::h1::parser::{parse_request, ParseError};
use crate::h1::response::simple_status;
use crate::routes::route_origin;

pub enum EngineOutcome {
    /// Nothing to do yet; keep buffering reads.
    NeedMoreData,
    /// A response was produced; `consumed` bytes should be dropped from the
    /// front of the read buffer, `response` written, and the connection
    /// closed if `!keep_alive`.
    Response {
        consumed: usize,
        response: Vec<u8>,
        keep_alive: bool,
    },
    /// The request requested an h2c upgrade; caller switches the
    /// connection's protocol variant and feeds the remaining bytes (if any)
    /// to the HTTP/2 engine starting with the client preface.
    UpgradeToH2c { consumed: usize, response: Vec<u8> },
}

pub struct Http1Engine {
    authenticator: Option<Box<dyn Authenticator>>,
    filters: Vec<Box<dyn RequestFilter>>,
}

impl Http1Engine {
    pub fn new(authenticator: Option<Box<dyn Authenticator>>, filters: Vec<Box<dyn RequestFilter>>) -> Self {
        Self {
            authenticator,
            filters,
        }
    }

    /// Attempts to parse and serve one request from `buf`. On malformed
    /// input, returns a `400` response and the caller must close the
    /// connection afterward (spec §4.6).
    pub fn handle(&self, buf: &[u8]) -> EngineOutcome {
        let view = match parse_request(buf) {
            Ok(Some(v)) => v,
            Ok(None) => return EngineOutcome::NeedMoreData,
            Err(ParseError::Malformed) => {
                return EngineOutcome::Response {
                    consumed: buf.len(),
                    response: simple_status(400, "Bad Request", false),
                    keep_alive: false,
                }
            }
            Err(ParseError::HeaderSectionTooLarge) => {
                return EngineOutcome::Response {
                    consumed: buf.len(),
                    response: simple_status(431, "Request Header Fields Too Large", false),
                    keep_alive: false,
                }
            }
            Err(ParseError::BodyTooLarge) => {
                return EngineOutcome::Response {
                    consumed: buf.len(),
                    response: simple_status(413, "Payload Too Large", false),
                    keep_alive: false,
                }
            }
        };

        let consumed = view.head_len + view.content_length().unwrap_or(0);
        let keep_alive = view.keep_alive();

        if view.is_h2c_upgrade() {
            debug!("h2c upgrade requested");
            return EngineOutcome::UpgradeToH2c {
                consumed,
                response: crate::h1::response::switching_protocols_h2c(),
            };
        }

        let mut meta = RequestMeta::from_view(&view);
        if let crate::filters::FilterOutcome::Stop(resp_meta) = run_on_request(&self.filters, &mut meta) {
            warn!(status = resp_meta.status, "request stopped by filter");
            return EngineOutcome::Response {
                consumed,
                response: simple_status(resp_meta.status, "Stopped", keep_alive),
                keep_alive,
            };
        }

        let response = route_origin(&view, self.authenticator.as_deref());
        EngineOutcome::Response {
            consumed,
            response,
            keep_alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_round_trip_hello() {
        let engine = Http1Engine::new(None, vec![]);
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        match engine.handle(raw) {
            EngineOutcome::Response { response, keep_alive, consumed } => {
                assert!(keep_alive);
                assert_eq!(consumed, raw.len());
                assert!(String::from_utf8(response).unwrap().contains("Hello, World!"));
            }
            _ => panic!("expected Response"),
        }
    }

    #[test]
    fn malformed_request_yields_400_and_close() {
        let engine = Http1Engine::new(None, vec![]);
        match engine.handle(b"\x01\x02garbage") {
            EngineOutcome::Response { response, keep_alive, .. } => {
                assert!(!keep_alive);
                assert!(String::from_utf8(response).unwrap().starts_with("HTTP/1.1 400"));
            }
            _ => panic!("expected Response"),
        }
    }

    #[test]
    fn partial_request_needs_more_data() {
        let engine = Http1Engine::new(None, vec![]);
        assert!(matches!(
            engine.handle(b"GET /hello HTTP/1.1\r\n"),
            EngineOutcome::NeedMoreData
        ));
    }
}
