//! Error taxonomy (spec §7): resource exhaustion, peer protocol errors,
//! crypto errors, upstream failures, configuration errors, platform errors.
//!
//! Each subsystem crate defines its own narrow error enum and converts into
//! the relevant variant here only at the boundary where a decision (close,
//! retry, roll back, exit) is actually made.

use std::fmt;
use std::io;

/// Resource exhaustion: no buffer, no upstream socket, no submission-queue
/// slot. Always handled by refusing the triggering work, never by blocking
/// or growing the resource.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("buffer pool exhausted ({kind:?})")]
    BufferPoolExhausted { kind: crate::buffer::BufferKind },
    #[error("submission queue full")]
    SubmissionQueueFull,
    #[error("connection table full (max {max})")]
    ConnectionTableFull { max: usize },
}

/// Configuration errors (spec §7): reject at load, no live state mutated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate backend name: {0}")]
    DuplicateBackend(String),
    #[error("backend {0} has zero weight")]
    ZeroWeightBackend(String),
    #[error("could not parse rate_limit value: {0:?}")]
    BadRateLimit(String),
    #[error("listen address invalid: {0}")]
    BadListenAddress(String),
    #[error("TLS material required but missing ({reason})")]
    MissingTlsMaterial { reason: &'static str },
    #[error("{0} validation problems found")]
    Multiple(usize, Vec<ConfigError>),
}

/// Platform errors: `io_uring` init failure, bind failure, and similar.
/// Fatal at startup; logged and per-operation at runtime.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("io_uring setup failed: {0}")]
    IoUringInit(#[source] io::Error),
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Top-level error aggregate surfaced from the gateway binary's startup and
/// reload paths. Per-crate errors convert into this at the call sites that
/// actually decide how to react (see spec §7's local-recovery policy).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("peer protocol error: {0}")]
    PeerProtocol(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl fmt::Display for crate::buffer::BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            crate::buffer::BufferKind::Read => write!(f, "read"),
            crate::buffer::BufferKind::Write => write!(f, "write"),
        }
    }
}
