//! Connection Table (C2, spec §4.2).
//!
//! An intrusive dictionary from socket descriptor to [`Connection`], not an
//! fd-indexed array — descriptors are unbounded over the process lifetime
//! even though live connections are bounded.

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::time::Instant;

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::buffer::{BufferHandle, BufferPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Http1,
    Http2,
    Http3Stream,
    Raw,
}

/// Opaque per-connection HTTP/2 state handle. The concrete stream table,
/// flow-control windows, and HPACK contexts live in `blitz-http`; this crate
/// only needs to know that *something* is present so it can enforce the
/// "HTTP/2 variant implies non-null state" invariant and release it on
/// removal.
pub trait Http2StateHandle: Send {
    fn on_close(&mut self);
}

/// Opaque per-connection upstream-socket handle (load-balancer mode). Lives
/// in `blitz-lb`; this crate only needs to release it on removal.
pub trait UpstreamHandle: Send {
    fn on_close(&mut self);
}

/// Opaque per-connection TLS session handle. Lives in `blitz-tls`.
pub trait TlsSessionHandle: Send {
    fn on_close(&mut self);
}

pub struct Connection {
    pub fd: RawFd,
    pub read_buffer: Option<BufferHandle>,
    pub write_buffer: Option<BufferHandle>,
    /// Peer IPv4 address, looked up once at accept time; the rate limiter
    /// (C9) keys its per-source buckets on this (spec §4.9). `None` when the
    /// peer couldn't be resolved (e.g. an IPv6 peer, which falls back to the
    /// unspecified-address bucket).
    pub peer_ip: Option<Ipv4Addr>,
    pub protocol: ProtocolKind,
    pub tls: Option<Box<dyn TlsSessionHandle>>,
    pub http2: Option<Box<dyn Http2StateHandle>>,
    pub upstream: Option<Box<dyn UpstreamHandle>>,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub request_count: u64,
    /// requests served, used by the sweep to enforce a max-requests-per-conn cap.
    pub max_requests: Option<u64>,
    pub idle_timeout_secs: u64,
}

impl Connection {
    pub fn new(fd: RawFd, idle_timeout_secs: u64) -> Self {
        let now = Instant::now();
        Self {
            fd,
            read_buffer: None,
            write_buffer: None,
            peer_ip: None,
            protocol: ProtocolKind::Raw,
            tls: None,
            http2: None,
            upstream: None,
            created_at: now,
            last_activity: now,
            request_count: 0,
            max_requests: None,
            idle_timeout_secs,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_activity).as_secs() > self.idle_timeout_secs
    }

    /// Enforces the invariant "if the protocol variant is HTTP/2 the HTTP/2
    /// state is present and non-null".
    pub fn assert_protocol_invariant(&self) {
        if matches!(self.protocol, ProtocolKind::Http2) {
            debug_assert!(self.http2.is_some(), "HTTP/2 connection missing state");
        }
    }
}

/// fd -> Connection map plus buffer-pool references so `remove` can release
/// every owned sub-resource in a single step.
pub struct ConnectionTable {
    conns: AHashMap<RawFd, Connection>,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            conns: AHashMap::with_capacity(max_connections.min(4096)),
            max_connections,
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.conns.len() >= self.max_connections
    }

    pub fn insert(&mut self, conn: Connection) -> Result<(), crate::error::ResourceError> {
        if self.is_full() {
            return Err(crate::error::ResourceError::ConnectionTableFull {
                max: self.max_connections,
            });
        }
        trace!(fd = conn.fd, "connection inserted");
        self.conns.insert(conn.fd, conn);
        Ok(())
    }

    pub fn lookup(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.conns.get_mut(&fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.conns.contains_key(&fd)
    }

    /// Releases any owned buffers and sub-resources in one step. Idempotent:
    /// removing an already-removed (or never-present, e.g. unknown
    /// descriptor) fd is a no-op, matching the "completion for unknown
    /// descriptor is ignored" failure semantics in spec §4.2/§4.3.
    pub fn remove(&mut self, fd: RawFd, read_pool: &mut BufferPool, write_pool: &mut BufferPool) {
        if let Some(mut conn) = self.conns.remove(&fd) {
            if let Some(h) = conn.read_buffer.take() {
                read_pool.release(h);
            }
            if let Some(h) = conn.write_buffer.take() {
                write_pool.release(h);
            }
            if let Some(mut tls) = conn.tls.take() {
                tls.on_close();
            }
            if let Some(mut h2) = conn.http2.take() {
                h2.on_close();
            }
            if let Some(mut up) = conn.upstream.take() {
                up.on_close();
            }
            debug!(fd, "connection removed");
        }
    }

    /// Once-per-second sweep target: closes idle/expired connections. The
    /// caller (event loop) is responsible for actually closing the fd and
    /// calling `remove`; this just enumerates candidates so sweeping never
    /// mutates the map while iterating it from two places at once.
    pub fn sweep_candidates(&self, now: Instant) -> Vec<RawFd> {
        self.conns
            .values()
            .filter(|c| {
                c.is_idle_expired(now)
                    || c.max_requests.is_some_and(|m| c.request_count >= m)
            })
            .map(|c| c.fd)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_is_idempotent() {
        let mut table = ConnectionTable::new(4);
        let mut rp = BufferPool::new(crate::buffer::BufferKind::Read, 2, 64);
        let mut wp = BufferPool::new(crate::buffer::BufferKind::Write, 2, 64);
        table.remove(99, &mut rp, &mut wp);
        table.remove(99, &mut rp, &mut wp);
    }

    #[test]
    fn remove_releases_buffers_exactly_once() {
        let mut table = ConnectionTable::new(4);
        let mut rp = BufferPool::new(crate::buffer::BufferKind::Read, 1, 64);
        let mut wp = BufferPool::new(crate::buffer::BufferKind::Write, 1, 64);
        let mut conn = Connection::new(1, 30);
        conn.read_buffer = Some(rp.acquire().unwrap());
        conn.write_buffer = Some(wp.acquire().unwrap());
        table.insert(conn).unwrap();
        table.remove(1, &mut rp, &mut wp);
        assert_eq!(rp.free_slots(), 1);
        assert_eq!(wp.free_slots(), 1);
    }

    #[test]
    fn table_rejects_beyond_capacity() {
        let mut table = ConnectionTable::new(1);
        table.insert(Connection::new(1, 30)).unwrap();
        assert!(table.insert(Connection::new(2, 30)).is_err());
    }
}
