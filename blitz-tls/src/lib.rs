//! TLS Terminator (C4): TLS 1.3 + ALPN over an in-memory byte-queue bridge
//! so the completion loop never hands a blocking socket to the TLS engine.

pub mod error;
pub mod material;
pub mod memio;
pub mod terminator;

pub use error::TlsError;
pub use terminator::{NegotiatedAlpn, PlaintextChunk, TerminatorState, TlsTerminator};
