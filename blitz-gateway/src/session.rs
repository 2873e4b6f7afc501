//! Per-connection glue (spec §3 "Connection", §4.5): the piece the
//! `blitz-core` connection table deliberately keeps opaque. A `Session`
//! holds the real protocol engines for one descriptor; `ConnectionTable`
//! only holds marker handles so its invariant checks and `remove` cleanup
//! stay generic across protocols (see `blitz_core::table`'s doc comments).

use std::net::Ipv4Addr;

use bytes::BytesMut;

use blitz_http::h1::engine::EngineOutcome;
use blitz_http::h2::conn::Connection as H2Connection;
use blitz_http::Http1Engine;
use blitz_tls::{NegotiatedAlpn, TerminatorState, TlsTerminator};

/// Which protocol engine owns the bytes flowing through this connection.
/// Sticky for the connection's lifetime once chosen (spec §4.5).
pub enum Protocol {
    /// Demultiplexer hasn't seen enough bytes yet.
    Undecided,
    Http1,
    Http2(Box<H2Connection>),
}

pub struct Session {
    pub tls: Option<TlsTerminator>,
    /// Peer address the rate limiter (C9) admits requests against, captured
    /// once at accept time (spec §4.9: per-source buckets keyed by IPv4).
    pub peer_ip: Ipv4Addr,
    pub protocol: Protocol,
    /// Accumulated plaintext not yet consumed by the active engine; a
    /// single buffer-pool read may not contain a whole request (spec §4.1:
    /// fixed-size slots are returned to the pool each round, so
    /// cross-read state must live here, not in the slot).
    pub accum: BytesMut,
    pub pending_write: BytesMut,
    pub keep_alive: bool,
    pub close_after_write: bool,
    /// Set once an upstream hop has been dispatched for the in-flight
    /// request (load-balancer mode), so a second completion for the same
    /// connection doesn't re-forward it.
    pub awaiting_upstream: bool,
}

impl Session {
    pub fn new(tls: Option<TlsTerminator>, peer_ip: Ipv4Addr) -> Self {
        Self {
            tls,
            peer_ip,
            protocol: Protocol::Undecided,
            accum: BytesMut::new(),
            pending_write: BytesMut::new(),
            keep_alive: true,
            close_after_write: false,
            awaiting_upstream: false,
        }
    }

    /// True once the TLS layer (if any) has finished its handshake and
    /// plaintext can flow; connections with no TLS are trivially ready.
    pub fn plaintext_ready(&self) -> bool {
        match &self.tls {
            Some(t) => t.state() == TerminatorState::Connected,
            None => true,
        }
    }

    pub fn alpn_is_h2(&self) -> bool {
        matches!(self.tls.as_ref().map(|t| t.alpn()), Some(NegotiatedAlpn::Http2))
    }
}

/// Drives one connection's HTTP/1.1 engine against whatever plaintext has
/// accumulated, producing zero or more responses. The caller is
/// responsible for queuing `pending_write` afterward and honoring
/// `close_after_write`.
pub fn drive_http1(session: &mut Session, engine: &Http1Engine) {
    loop {
        let outcome = engine.handle(&session.accum);
        match outcome {
            EngineOutcome::NeedMoreData => break,
            EngineOutcome::Response {
                consumed,
                response,
                keep_alive,
            } => {
                session.pending_write.extend_from_slice(&response);
                bytes::Buf::advance(&mut session.accum, consumed);
                session.keep_alive = keep_alive;
                if !keep_alive {
                    session.close_after_write = true;
                    break;
                }
            }
            EngineOutcome::UpgradeToH2c { consumed, response } => {
                session.pending_write.extend_from_slice(&response);
                bytes::Buf::advance(&mut session.accum, consumed);
                session.protocol = Protocol::Http2(Box::new(H2Connection::new()));
                break;
            }
        }
    }
}

/// Drives the connection's HTTP/2 engine, emitting HEADERS+DATA for every
/// request that reaches completion via the fixed built-in routes (origin
/// mode only; load-balancer mode handles HTTP/2 forwarding in the gateway
/// itself since it needs the backend selector).
pub fn drive_http2_origin(session: &mut Session, conn: &mut H2Connection, authenticator: Option<&dyn blitz_http::auth::Authenticator>) {
    let completed = match conn.feed(&mut session.accum) {
        Ok(c) => c,
        Err(_) => {
            session.close_after_write = true;
            session.pending_write.extend_from_slice(&conn.take_outbound());
            return;
        }
    };
    for req in completed {
        let (headers, body) = blitz_http::routes::route_origin_h2(&req.headers, &req.body, authenticator);
        conn.send_response(req.stream_id, headers, &body);
    }
    session.pending_write.extend_from_slice(&conn.take_outbound());
}
