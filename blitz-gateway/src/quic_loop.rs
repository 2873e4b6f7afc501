//! QUIC UDP datagram loop (C8, SPEC_FULL §4.8). Runs as a blocking loop on
//! its own thread rather than through the `io_uring` TCP completion loop:
//! `blitz_core::event_loop::EventLoop` exposes no `submit_recv_msg`/
//! `submit_send_msg` (only `OpKind::RecvMsg`/`SendMsg` exist as dispatch
//! targets, with no submission side), so wiring QUIC through it would mean
//! extending `blitz-core` itself. Out of scope for this pass; documented in
//! DESIGN.md.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rand::RngCore;
use rustls::ServerConfig;
use tracing::{debug, info, warn};

use blitz_quic::capture::Capture;
use blitz_quic::QuicConnection;

const MAX_DATAGRAM: usize = 1500;
const SCID_LEN: usize = 8;
const SWEEP_EVERY: u32 = 256;

/// Runs forever, accepting new DCIDs as Initial packets arrive and driving
/// existing connections' handshakes. Never returns except on a fatal
/// socket error.
pub fn run(listen_addr: &str, tls_config: Arc<ServerConfig>, capture_root: Option<PathBuf>) -> std::io::Result<()> {
    let socket = UdpSocket::bind(listen_addr)?;
    info!(addr = listen_addr, "quic listener bound");

    let mut connections: HashMap<Vec<u8>, QuicConnection> = HashMap::new();
    let mut captures: HashMap<Vec<u8>, Capture> = HashMap::new();
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut iterations: u32 = 0u32;

    loop {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "quic recv failed");
                continue;
            }
        };
        let datagram = &buf[..n];
        if datagram.is_empty() {
            continue;
        }

        let now = Instant::now();
        let is_long_header = datagram[0] & 0x80 != 0;
        let dcid = if is_long_header {
            match blitz_quic::packet::parse_long_header(datagram) {
                Ok(header) => header.dcid.to_vec(),
                Err(e) => {
                    debug!(?e, "dropping unparseable long-header datagram");
                    continue;
                }
            }
        } else {
            // Short-header (1-RTT) packets carry no self-describing DCID
            // length (RFC 9000 §17.3.1); this server always issues
            // `SCID_LEN`-byte connection IDs, so that's the length every
            // short-header packet addressed to one of our connections uses.
            // A short header can only ever route to an existing connection,
            // never create one.
            match blitz_quic::packet::short_header_dcid(datagram, SCID_LEN) {
                Some(d) if connections.contains_key(d) => d.to_vec(),
                _ => {
                    debug!("dropping short-header datagram with no matching connection");
                    continue;
                }
            }
        };

        let conn = match connections.get_mut(&dcid) {
            Some(c) => c,
            None => {
                let mut scid = vec![0u8; SCID_LEN];
                rand::thread_rng().fill_bytes(&mut scid);
                let new_conn = match QuicConnection::accept(tls_config.clone(), dcid.clone(), scid) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "failed to accept quic connection");
                        continue;
                    }
                };
                if let Some(root) = &capture_root {
                    if let Ok(cap) = Capture::open(root, &dcid) {
                        captures.insert(dcid.clone(), cap);
                    }
                }
                connections.insert(dcid.clone(), new_conn);
                connections.get_mut(&dcid).expect("just inserted")
            }
        };

        match conn.on_datagram(datagram, now) {
            Ok(response) if !response.is_empty() => {
                if let Some(cap) = captures.get_mut(&dcid) {
                    let _ = cap.log_packet("tx", 0, response.len());
                }
                if let Err(e) = socket.send_to(&response, peer) {
                    warn!(error = %e, "quic send failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, dcid = ?dcid, "quic datagram processing failed");
                connections.remove(&dcid);
                captures.remove(&dcid);
            }
        }

        iterations = iterations.wrapping_add(1);
        if iterations % SWEEP_EVERY == 0 {
            sweep(&mut connections, &mut captures, now);
        }
    }
}

fn sweep(connections: &mut HashMap<Vec<u8>, QuicConnection>, captures: &mut HashMap<Vec<u8>, Capture>, now: Instant) {
    let expired: Vec<Vec<u8>> = connections
        .iter()
        .filter(|(_, c)| c.is_handshake_timed_out(now) || c.is_idle_timed_out(now) || c.is_initial_timed_out(now))
        .map(|(dcid, _)| dcid.clone())
        .collect();
    for dcid in expired {
        debug!(dcid = ?dcid, "sweeping timed-out quic connection");
        connections.remove(&dcid);
        captures.remove(&dcid);
    }
}
