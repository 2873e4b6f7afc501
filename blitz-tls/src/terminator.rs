//! TLS Terminator (C4, spec §4.4).
//!
//! `Handshaking -> Connected -> (Closed | Error)`. The read path feeds
//! ciphertext from a completed read buffer into the TLS input queue, then
//! extracts any available cleartext; the write path gives plaintext to the
//! `rustls` engine, then drains ciphertext from its output queue into a
//! write buffer. Neither side ever touches the socket directly.

use std::io::Read;
use std::sync::Arc;

use rustls::{ServerConfig, ServerConnection};
use tracing::{debug, warn};

use crate::error::TlsError;
use crate::memio::ByteQueue;

/// First byte of a TLS handshake record (spec §4.4: "if it is the TLS
/// handshake record type (0x16) the session begins, otherwise the
/// connection is treated as cleartext").
pub const TLS_HANDSHAKE_RECORD_TYPE: u8 = 0x16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorState {
    Handshaking,
    Connected,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedAlpn {
    Http2,
    Http11,
    Unknown,
}

/// Distinguishes 0-RTT early application data from ordinary post-handshake
/// data, per spec §4.4 ("surfaced as a distinct class of request data to
/// downstream consumers").
pub enum PlaintextChunk {
    EarlyData(Vec<u8>),
    Application(Vec<u8>),
}

pub struct TlsTerminator {
    conn: ServerConnection,
    state: TerminatorState,
    ciphertext_in: ByteQueue,
    ciphertext_out: ByteQueue,
    early_data_budget: usize,
}

impl TlsTerminator {
    pub fn new(config: Arc<ServerConfig>, early_data_cap: usize) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config).map_err(TlsError::Handshake)?;
        Ok(Self {
            conn,
            state: TerminatorState::Handshaking,
            ciphertext_in: ByteQueue::new(),
            ciphertext_out: ByteQueue::new(),
            early_data_budget: early_data_cap,
        })
    }

    pub fn state(&self) -> TerminatorState {
        self.state
    }

    pub fn alpn(&self) -> NegotiatedAlpn {
        match self.conn.alpn_protocol() {
            Some(b"h2") => NegotiatedAlpn::Http2,
            Some(b"http/1.1") => NegotiatedAlpn::Http11,
            _ => NegotiatedAlpn::Unknown,
        }
    }

    /// Appends freshly read ciphertext (from the connection's completed
    /// read buffer) and drives the handshake/record processing forward,
    /// returning any plaintext now available.
    pub fn feed_ciphertext(&mut self, bytes: &[u8]) -> Result<Vec<PlaintextChunk>, TlsError> {
        self.ciphertext_in.push(bytes);
        let read_res = self.conn.read_tls(&mut self.ciphertext_in);
        match read_res {
            Ok(0) => {}
            Ok(_) => {}
            Err(e) => {
                self.state = TerminatorState::Error;
                return Err(TlsError::Io(e));
            }
        }

        if let Err(e) = self.conn.process_new_packets() {
            warn!(error = %e, "TLS record processing failed");
            self.state = TerminatorState::Error;
            // Best-effort alert: draining whatever rustls queued to send
            // back (e.g. a close_notify/alert) before the caller closes.
            let _ = self.conn.write_tls(&mut self.ciphertext_out);
            return Err(TlsError::Decrypt(e));
        }

        let mut out = Vec::new();

        if let Some(mut early) = self.conn.early_data() {
            let mut buf = vec![0u8; self.early_data_budget];
            loop {
                match std::io::Read::read(&mut early, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.push(PlaintextChunk::EarlyData(buf[..n].to_vec())),
                    Err(_) => break,
                }
            }
        }

        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match self.conn.reader().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.push(PlaintextChunk::Application(buf[..n].to_vec())),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.state = TerminatorState::Error;
                    return Err(TlsError::Io(e));
                }
            }
        }

        if !self.conn.is_handshaking() && self.state == TerminatorState::Handshaking {
            self.state = TerminatorState::Connected;
            debug!(alpn = ?self.alpn(), "TLS handshake complete");
        }

        // Any response bytes produced as a side effect of processing
        // (handshake flight continuation, alerts) must also reach the peer.
        let _ = self.conn.write_tls(&mut self.ciphertext_out);

        Ok(out)
    }

    /// Queues plaintext to be encrypted; ciphertext is drained separately
    /// via [`Self::take_ciphertext_to_send`] into a write-buffer submission.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<(), TlsError> {
        std::io::Write::write_all(&mut self.conn.writer(), data)?;
        self.conn.write_tls(&mut self.ciphertext_out)?;
        Ok(())
    }

    pub fn take_ciphertext_to_send(&mut self, max: usize) -> Vec<u8> {
        self.ciphertext_out.drain_up_to(max)
    }

    pub fn has_ciphertext_to_send(&self) -> bool {
        !self.ciphertext_out.is_empty()
    }

    pub fn close(&mut self) {
        self.conn.send_close_notify();
        let _ = self.conn.write_tls(&mut self.ciphertext_out);
        self.state = TerminatorState::Closed;
    }
}

/// Inspects the first byte of a brand-new connection's read buffer to
/// decide whether this is a TLS record or cleartext HTTP (spec §4.4 /
/// §4.5). Returns `None` if no bytes are available yet.
pub fn sniff_first_byte(bytes: &[u8]) -> Option<bool> {
    bytes.first().map(|&b| b == TLS_HANDSHAKE_RECORD_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_detects_handshake_record_type() {
        assert_eq!(sniff_first_byte(&[0x16, 0x03, 0x01]), Some(true));
        assert_eq!(sniff_first_byte(b"GET / HTTP/1.1"), Some(false));
        assert_eq!(sniff_first_byte(&[]), None);
    }
}
