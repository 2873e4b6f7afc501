//! Core runtime for Blitz Gateway: the buffer pool, connection table,
//! `io_uring` completion loop, token-bucket rate limiter, and graceful
//! reload manager.
//!
//! Everything in this crate runs on the single fast-path thread described in
//! the design: no subsystem here takes a lock against the event loop itself,
//! only against state shared with background tasks (health checks, cert
//! reload) living outside the loop.

pub mod buffer;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod lru;
pub mod ratelimit;
pub mod reload;
pub mod table;

pub use buffer::{BufferHandle, BufferKind, BufferPool};
pub use config::Configuration;
pub use error::{ConfigError, GatewayError, ResourceError};
pub use event_loop::{EventLoop, OpKind, UserData};
pub use ratelimit::{Decision, RateLimiter};
pub use reload::{ReloadManager, ReloadSignal};
pub use table::{Connection, ConnectionTable, ProtocolKind};
