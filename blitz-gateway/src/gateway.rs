//! Fast-path wiring: implements `blitz_core::event_loop::EventHandler` over
//! the connection table, buffer pools, TLS terminator, and HTTP/1.1+HTTP/2
//! engines (spec §4.2-§4.7, §4.9, §4.10). One `Gateway` owns the
//! single-threaded completion loop; nothing here ever blocks except the
//! documented, deliberately-scoped load-balancer forward path (see
//! `forward_lb_http1`/`forward_lb_http2`).

use std::io;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use rustls::ServerConfig;
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use blitz_core::buffer::{BufferKind, BufferPool};
use blitz_core::config::{Configuration, Mode};
use blitz_core::error::{PlatformError, ResourceError};
use blitz_core::event_loop::{EventHandler, EventLoop};
use blitz_core::ratelimit::{Decision, RateLimiter, RateLimiterConfig};
use blitz_core::reload::ReloadManager;
use blitz_core::table::{Connection, ConnectionTable, Http2StateHandle, ProtocolKind, TlsSessionHandle, UpstreamHandle};

use blitz_http::auth::{Authenticator, JwtAuthenticator};
use blitz_http::demux::{classify, DemuxResult};
use blitz_http::filters::{RequestFilter, RequestIdFilter};
use blitz_http::h1::parser::parse_response_head;
use blitz_http::h1::response::simple_status;
use blitz_http::h2::conn::Connection as H2Connection;
use blitz_http::h2::hpack::HeaderList;
use blitz_http::Http1Engine;

use blitz_lb::health::{self, HealthCheckConfig};
use blitz_lb::{forward, Backend, ForwardError, RetryPolicy, Selector, Transport, TransportError, UpstreamPool};

use crate::metrics::Counters;
use crate::session::{drive_http1, drive_http2_origin, Protocol, Session};

const READ_BUF_SIZE: usize = 4096;
const WRITE_BUF_SIZE: usize = 8192;
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(1);
const UPSTREAM_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker satisfying `ConnectionTable`'s opaque-handle invariant; the real
/// TLS/H2/upstream state lives in `Gateway::sessions`, keyed by the same
/// `fd` (see `session.rs` doc comment on why the split exists).
struct NoopHandle;
impl TlsSessionHandle for NoopHandle {
    fn on_close(&mut self) {}
}
impl Http2StateHandle for NoopHandle {
    fn on_close(&mut self) {}
}
impl UpstreamHandle for NoopHandle {
    fn on_close(&mut self) {}
}

struct LbState {
    selector: Selector,
    pool: UpstreamPool,
    retry: RetryPolicy,
}

pub struct Gateway {
    event_loop: EventLoop,
    read_pool: BufferPool,
    write_pool: BufferPool,
    table: ConnectionTable,
    sessions: AHashMap<RawFd, Session>,
    generations: AHashMap<RawFd, u16>,
    next_generation: u16,
    rate_limiter: RateLimiter,
    reload: ReloadManager,
    tls_config: Option<Arc<ServerConfig>>,
    http1_engine: Arc<Http1Engine>,
    authenticator: Option<Arc<dyn Authenticator>>,
    lb: Option<LbState>,
    listen_fd: RawFd,
    metrics: Arc<Counters>,
    /// Path `--config` pointed at, if any; re-read and validated on
    /// `SIGHUP`/`SIGUSR2` (spec §4.11). `None` means the process was
    /// configured purely from CLI flags, which has nothing to re-read.
    config_path: Option<String>,
}

fn build_authenticator(config: &Configuration) -> Option<JwtAuthenticator> {
    config.jwt.issuer.as_ref().map(|_| {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        JwtAuthenticator::new(secret.into_bytes(), config.jwt.issuer.clone(), config.jwt.audience.clone())
    })
}

/// Runs the periodic backend health checker (C10, spec §4.10) on a
/// dedicated thread, never on the fast path (SPEC_FULL §5: "the health
/// checker ... may perform blocking filesystem I/O [and network I/O], and
/// are therefore called only ... from a dedicated task separate from the
/// fast path"). A `tokio` current-thread runtime, exactly as small as the
/// task needs, owns the interval timer; `health::run_once` itself is a
/// plain blocking call, which is fine here because this thread does
/// nothing else.
fn spawn_health_checker(backends: Vec<Arc<Backend>>) {
    let config = HealthCheckConfig::default();
    let spawned = std::thread::Builder::new()
        .name("blitz-health".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "failed to start health-checker runtime, backends will not be probed");
                    return;
                }
            };
            rt.block_on(async move {
                let mut ticker = tokio::time::interval(config.interval);
                loop {
                    ticker.tick().await;
                    health::run_once(&backends, &config);
                }
            });
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn health-checker thread, backends will not be probed");
    }
}

impl Gateway {
    pub fn bootstrap(
        config: Arc<Configuration>,
        tls_config: Option<Arc<ServerConfig>>,
        metrics: Arc<Counters>,
        config_path: Option<String>,
    ) -> Result<Self, PlatformError> {
        let event_loop = EventLoop::new(1024)?;

        let addr: std::net::SocketAddr = config
            .listen
            .parse()
            .map_err(|_| PlatformError::Bind {
                addr: config.listen.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "unparseable listen address"),
            })?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))
            .map_err(PlatformError::Io)?;
        socket.set_reuse_address(true).map_err(PlatformError::Io)?;
        socket.bind(&addr.into()).map_err(|e| PlatformError::Bind {
            addr: config.listen.clone(),
            source: e,
        })?;
        socket.listen(1024).map_err(PlatformError::Io)?;
        let listen_fd = socket.into_raw_fd();

        // Two instances: the HTTP/1.1 engine owns a `Box` by construction,
        // while the HTTP/2 path (driven straight from `Gateway`) needs a
        // sharable handle. Cheap to build twice; no shared mutable state.
        let http1_authenticator: Option<Box<dyn Authenticator>> =
            build_authenticator(&config).map(|a| Box::new(a) as Box<dyn Authenticator>);
        let authenticator: Option<Arc<dyn Authenticator>> =
            build_authenticator(&config).map(|a| Arc::new(a) as Arc<dyn Authenticator>);

        let filters: Vec<Box<dyn RequestFilter>> = vec![Box::new(RequestIdFilter::default())];
        let http1_engine = Arc::new(Http1Engine::new(http1_authenticator, filters));

        let lb = if config.mode == Mode::LoadBalancer {
            let backends: Vec<Arc<Backend>> = config
                .backends
                .iter()
                .map(|b| {
                    Arc::new(Backend::new(
                        b.name.clone(),
                        b.host.clone(),
                        b.port,
                        b.weight,
                        b.health_check_path.clone(),
                    ))
                })
                .collect();
            spawn_health_checker(backends.clone());
            Some(LbState {
                selector: Selector::new(backends),
                pool: UpstreamPool::new(32),
                retry: RetryPolicy {
                    max_retries: config.max_retries,
                    backoff: Duration::from_millis(50),
                },
            })
        } else {
            None
        };

        let rate_limiter = RateLimiter::new(RateLimiterConfig {
            global_rate: config.rate_limit.global_rps,
            per_ip_rate: config.rate_limit.per_ip_rps,
            burst_multiplier: config.rate_limit.burst_multiplier,
            per_ip_inactivity_window: Duration::from_secs(300),
        });

        blitz_core::reload::install_signal_handlers().map_err(PlatformError::Io)?;
        let reload = ReloadManager::new((*config).clone()).map_err(PlatformError::Io)?;

        let mut gw = Self {
            event_loop,
            read_pool: BufferPool::new(BufferKind::Read, config.max_connections.min(8192), READ_BUF_SIZE),
            write_pool: BufferPool::new(BufferKind::Write, config.max_connections.min(8192), WRITE_BUF_SIZE),
            table: ConnectionTable::new(config.max_connections),
            sessions: AHashMap::new(),
            generations: AHashMap::new(),
            next_generation: 0,
            rate_limiter,
            reload,
            tls_config,
            http1_engine,
            authenticator,
            lb,
            listen_fd,
            metrics,
            config_path,
        };
        gw.event_loop.submit_accept(listen_fd).map_err(resource_to_platform)?;
        gw.event_loop
            .submit_housekeeping_timer(HOUSEKEEPING_PERIOD)
            .map_err(resource_to_platform)?;
        Ok(gw)
    }

    /// Runs forever, one completion batch at a time. Exits only on an
    /// unrecoverable `io_uring` error (spec §7 "platform errors ... fatal
    /// at startup; logged and per-operation at runtime" — a post-startup
    /// ring failure is the one platform error this loop cannot route
    /// around and still propagates).
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.event_loop.run_once(self)?;
        }
    }

    fn close_connection(&mut self, fd: RawFd) {
        self.table.remove(fd, &mut self.read_pool, &mut self.write_pool);
        self.sessions.remove(&fd);
        self.generations.remove(&fd);
        unsafe {
            libc::close(fd);
        }
        trace!(fd, "connection closed");
    }

    fn accept_connection(&mut self, fd: RawFd) {
        if self.table.is_full() {
            warn!(fd, "connection table full, refusing new connection");
            unsafe {
                libc::close(fd);
            }
            return;
        }

        // Consulted on accept as well as per request (spec §2 "C9 is
        // consulted on accept and on each request admission"); a peer that
        // can't even open a connection never reaches a buffer or a table
        // slot.
        let peer_ip = peer_ipv4(fd).unwrap_or(Ipv4Addr::UNSPECIFIED);
        if !admit(&mut self.rate_limiter, peer_ip, &self.metrics) {
            debug!(fd, %peer_ip, "connection refused by rate limiter on accept");
            unsafe {
                libc::close(fd);
            }
            return;
        }

        let read_handle = match self.read_pool.acquire() {
            Ok(h) => h,
            Err(ResourceError::BufferPoolExhausted { .. }) => {
                self.metrics.inc_buffer_pool_exhaustion();
                unsafe {
                    libc::close(fd);
                }
                return;
            }
            Err(_) => {
                unsafe {
                    libc::close(fd);
                }
                return;
            }
        };

        let mut conn = Connection::new(fd, 60);
        conn.read_buffer = Some(read_handle);
        conn.protocol = ProtocolKind::Raw;
        conn.tls = Some(Box::new(NoopHandle));
        conn.peer_ip = Some(peer_ip);
        if self.table.insert(conn).is_err() {
            self.read_pool.release(read_handle);
            unsafe {
                libc::close(fd);
            }
            return;
        }

        let tls = self.tls_config.as_ref().map(|cfg| {
            blitz_tls::TlsTerminator::new(cfg.clone(), 16 * 1024).expect("rustls ServerConnection::new")
        });
        self.sessions.insert(fd, Session::new(tls, peer_ip));
        self.next_generation = self.next_generation.wrapping_add(1);
        let gen = self.next_generation;
        self.generations.insert(fd, gen);
        self.metrics.inc_accepted_connections();

        let buf = self.read_pool.data_mut(read_handle);
        if self.event_loop.submit_read(fd, gen, buf).is_err() {
            self.close_connection(fd);
        }
    }

    fn process_connection(&mut self, fd: RawFd, chunk: Vec<u8>) {
        let Some(mut session) = self.sessions.remove(&fd) else {
            return;
        };
        self.pump(&mut session, &chunk);
        self.sessions.insert(fd, session);
    }

    fn pump(&mut self, session: &mut Session, chunk: &[u8]) {
        if let Some(tls) = session.tls.as_mut() {
            match tls.feed_ciphertext(chunk) {
                Ok(plaintext_chunks) => {
                    for p in plaintext_chunks {
                        match p {
                            blitz_tls::PlaintextChunk::Application(b)
                            | blitz_tls::PlaintextChunk::EarlyData(b) => {
                                session.accum.extend_from_slice(&b);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "TLS record processing failed");
                    session.close_after_write = true;
                    return;
                }
            }
        } else {
            session.accum.extend_from_slice(chunk);
        }

        if matches!(session.protocol, Protocol::Undecided) && session.plaintext_ready() {
            let alpn_h2 = session.alpn_is_h2();
            match classify(&session.accum, alpn_h2) {
                DemuxResult::Http2 => {
                    let mut conn = blitz_http::h2::conn::Connection::new();
                    conn.send_initial_settings();
                    session.protocol = Protocol::Http2(Box::new(conn));
                    debug!("connection upgraded to HTTP/2");
                }
                DemuxResult::Http1 => session.protocol = Protocol::Http1,
                DemuxResult::NeedMoreData => {}
            }
        }

        // Admission is checked once per inbound read batch rather than per
        // individually-pipelined request (spec §2/§4.9: "consulted on
        // accept and on each request admission") — precise enough for the
        // common case of one request per read/response round trip, and
        // denying here still stops a denied peer before its bytes reach a
        // protocol engine or an upstream.
        if matches!(session.protocol, Protocol::Http1) {
            if !admit(&mut self.rate_limiter, session.peer_ip, &self.metrics) {
                session.pending_write.extend_from_slice(&simple_status(429, "Too Many Requests", false));
                session.close_after_write = true;
            } else if self.lb.is_some() {
                self.forward_lb_http1(session);
            } else {
                drive_http1(session, &self.http1_engine);
            }
        } else if matches!(session.protocol, Protocol::Http2(_)) {
            if !admit(&mut self.rate_limiter, session.peer_ip, &self.metrics) {
                session.close_after_write = true;
            } else {
                // Taken out of `session.protocol` (rather than matched by
                // `&mut` reference) so `conn` is an owned local with no
                // borrow on `session` itself — the forwarding calls below
                // need `&mut session` and `&mut conn` at once.
                let Protocol::Http2(mut conn) = std::mem::replace(&mut session.protocol, Protocol::Undecided) else {
                    unreachable!("checked above")
                };
                if self.lb.is_some() {
                    self.forward_lb_http2(session, &mut conn);
                } else {
                    drive_http2_origin(session, &mut conn, self.authenticator.as_deref());
                }
                session.protocol = Protocol::Http2(conn);
            }
        }

        if let Some(tls) = session.tls.as_mut() {
            if !session.pending_write.is_empty() {
                let _ = tls.write_plaintext(&session.pending_write);
                session.pending_write.clear();
            }
            let ciphertext = tls.take_ciphertext_to_send(usize::MAX);
            if !ciphertext.is_empty() {
                session.pending_write.extend_from_slice(&ciphertext);
            }
        }
    }

    /// Load-balancer-mode HTTP/1.1 forwarding (spec §4.6 "load-balancer mode
    /// delegates to C10", §4.10). Dispatches synchronously from the
    /// fast-path thread: a documented scope simplification (§5 describes
    /// upstream I/O conceptually sharing the completion loop, but wiring a
    /// second completion-driven leg per request is out of scope for this
    /// pass — see DESIGN.md). Acceptable only because backends are assumed
    /// low-latency; a stalled backend stalls this connection, not others,
    /// since each fd's read/write submissions are independent.
    fn forward_lb_http1(&self, session: &mut Session) {
        let lb = self.lb.as_ref().expect("forward_lb_http1 called without lb state");
        loop {
            let (consumed, keep_alive, request_bytes) =
                match blitz_http::h1::parser::parse_request(&session.accum) {
                    Ok(Some(view)) => {
                        let consumed = view.head_len + view.content_length().unwrap_or(0);
                        let keep_alive = view.keep_alive();
                        (consumed, keep_alive, session.accum[..consumed].to_vec())
                    }
                    Ok(None) => break,
                    Err(_) => {
                        session.pending_write.extend_from_slice(&simple_status(400, "Bad Request", false));
                        session.close_after_write = true;
                        session.accum.clear();
                        break;
                    }
                };

            let mut transport = RawRequestTransport {
                request: &request_bytes,
                timeout: UPSTREAM_DIAL_TIMEOUT,
                pool: &lb.pool,
            };
            match forward(&lb.selector, &mut transport, &lb.retry, |d| std::thread::sleep(d)) {
                Ok(response) => session.pending_write.extend_from_slice(&response),
                Err(ForwardError::NoBackend) => {
                    session.pending_write.extend_from_slice(&simple_status(503, "Service Unavailable", false));
                }
                Err(ForwardError::Exhausted { attempts }) => {
                    self.metrics.inc_upstream_retries();
                    warn!(attempts, "upstream retry budget exhausted");
                    session.pending_write.extend_from_slice(&simple_status(502, "Bad Gateway", false));
                }
            }
            bytes::Buf::advance(&mut session.accum, consumed);
            session.keep_alive = keep_alive;
            if !keep_alive {
                session.close_after_write = true;
                break;
            }
        }
    }

    /// Load-balancer-mode HTTP/2 forwarding (spec §4.10): an h2/h2c client
    /// must reach a backend the same as an HTTP/1.1 one does, never the
    /// fixed origin routes. Each completed request/stream is bridged to
    /// the backend over the same HTTP/1.1 raw-socket transport as
    /// `forward_lb_http1`, then bridged back to a HEADERS+DATA response on
    /// the same stream.
    fn forward_lb_http2(&self, session: &mut Session, conn: &mut H2Connection) {
        let lb = self.lb.as_ref().expect("forward_lb_http2 called without lb state");
        let completed = match conn.feed(&mut session.accum) {
            Ok(c) => c,
            Err(_) => {
                session.close_after_write = true;
                session.pending_write.extend_from_slice(&conn.take_outbound());
                return;
            }
        };
        for req in completed {
            let request_bytes = encode_h1_request(&req.headers, &req.body);
            let mut transport = RawRequestTransport {
                request: &request_bytes,
                timeout: UPSTREAM_DIAL_TIMEOUT,
                pool: &lb.pool,
            };
            let (headers, body) = match forward(&lb.selector, &mut transport, &lb.retry, |d| std::thread::sleep(d)) {
                Ok(response) => decode_h1_response(&response),
                Err(ForwardError::NoBackend) => (vec![(":status".to_string(), "503".to_string())], Vec::new()),
                Err(ForwardError::Exhausted { attempts }) => {
                    self.metrics.inc_upstream_retries();
                    warn!(attempts, "upstream retry budget exhausted");
                    (vec![(":status".to_string(), "502".to_string())], Vec::new())
                }
            };
            conn.send_response(req.stream_id, headers, &body);
        }
        session.pending_write.extend_from_slice(&conn.take_outbound());
    }

    /// Re-reads and validates the configuration file named by `--config` and
    /// swaps it in on success (spec §4.11). Only the `Configuration` snapshot
    /// held by `ReloadManager` is replaced — the rate limiter and load
    /// balancer backend set keep running with whatever they were built from
    /// at boot. A full hot-migration of live backend/rate-limit state is
    /// open work; see DESIGN.md.
    fn attempt_reload(&mut self) {
        let Some(path) = &self.config_path else {
            warn!("reload signal received but no --config file to re-read");
            return;
        };
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, path, "failed to read config file for reload");
                return;
            }
        };
        let candidate = match blitz_core::config::load_toml(&text) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "reload candidate configuration invalid, keeping previous");
                return;
            }
        };
        if let Err(e) = self.reload.try_reload(candidate) {
            warn!(error = %e, "reload rejected");
        }
    }

    /// Submits another read for `fd` using its already-assigned read-buffer
    /// slot, bumping the generation so a lingering completion for the
    /// *previous* submission on this fd can't be mistaken for this one.
    fn rearm_read(&mut self, fd: RawFd) {
        let Some(conn) = self.table.lookup(fd) else { return };
        let Some(handle) = conn.read_buffer else { return };
        let gen = self.generations.entry(fd).or_insert(0);
        *gen = gen.wrapping_add(1);
        let gen = *gen;
        let buf = self.read_pool.data_mut(handle);
        if self.event_loop.submit_read(fd, gen, buf).is_err() {
            self.close_connection(fd);
        }
    }

    /// Takes up to one write-buffer slot's worth of bytes off the front of
    /// `session.pending_write` and submits it. Returns `false` (nothing
    /// submitted) when there was nothing queued, so the caller knows
    /// whether to fall through to re-arming a read or closing instead.
    fn queue_write(&mut self, fd: RawFd) -> bool {
        let Some(session) = self.sessions.get_mut(&fd) else { return false };
        if session.pending_write.is_empty() {
            return false;
        }
        let write_handle = match self.table.lookup(fd).and_then(|c| c.write_buffer) {
            Some(h) => h,
            None => match self.write_pool.acquire() {
                Ok(h) => h,
                Err(_) => {
                    self.metrics.inc_buffer_pool_exhaustion();
                    return false;
                }
            },
        };
        if let Some(conn) = self.table.lookup(fd) {
            conn.write_buffer = Some(write_handle);
        }

        let session = self.sessions.get_mut(&fd).expect("checked above");
        let n = session.pending_write.len().min(WRITE_BUF_SIZE);
        let to_send = session.pending_write.split_to(n);
        let dst = self.write_pool.data_mut(write_handle);
        dst[..n].copy_from_slice(&to_send);
        self.write_pool.set_filled(write_handle, n);

        let gen = self.generations.entry(fd).or_insert(0);
        *gen = gen.wrapping_add(1);
        let gen = *gen;
        let data = self.write_pool.data(write_handle).to_vec();
        if self.event_loop.submit_write(fd, gen, &data).is_err() {
            self.close_connection(fd);
        }
        true
    }
}

/// Blocking transport: reuses an idle pooled socket for `backend` when one
/// is available (spec §4.10's `acquire`/`release` contract), dials a fresh
/// one otherwise, writes the already-framed HTTP/1.1 request, and reads
/// only as far as the response's own `Content-Length` says (no blind
/// `read_to_end`). The socket goes back to the pool afterward unless the
/// backend asked for `Connection: close` or the exchange failed partway.
struct RawRequestTransport<'a> {
    request: &'a [u8],
    timeout: Duration,
    pool: &'a UpstreamPool,
}

impl RawRequestTransport<'_> {
    fn dial(&self, backend: &Backend) -> Result<TcpStream, TransportError> {
        let (host, port) = backend.addr();
        let addr = format!("{host}:{port}");
        let sockaddr = addr.parse().map_err(|_| TransportError::ConnectFailed)?;
        let stream = TcpStream::connect_timeout(&sockaddr, self.timeout).map_err(|_| TransportError::ConnectFailed)?;
        stream.set_read_timeout(Some(self.timeout)).ok();
        stream.set_write_timeout(Some(self.timeout)).ok();
        Ok(stream)
    }
}

impl Transport for RawRequestTransport<'_> {
    fn send(&mut self, backend: &Backend) -> Result<Vec<u8>, TransportError> {
        let reused = self.pool.acquire(&backend.name);
        let mut stream = match reused {
            // SAFETY: `fd` only ever came from a previous `release(keep: true)`
            // on this same pool, which only ever holds fds this transport
            // opened and gave up exclusive ownership of.
            Some(fd) => unsafe { TcpStream::from_raw_fd(fd) },
            None => self.dial(backend)?,
        };

        if stream.write_all(self.request).is_err() {
            if reused.is_none() {
                return Err(TransportError::ConnectFailed);
            }
            // Pooled socket was stale (backend closed it while idle); one
            // fresh dial, no further retry here — `forward`'s own retry
            // budget covers a backend that's actually down.
            stream = self.dial(backend)?;
            stream.write_all(self.request).map_err(|_| TransportError::ConnectFailed)?;
        }

        let mut response = Vec::new();
        let mut buf = [0u8; 4096];
        let keep = loop {
            match parse_response_head(&response) {
                Ok(Some(head)) => {
                    let need = head.head_len + head.content_length().unwrap_or(0);
                    if response.len() >= need {
                        break head.keep_alive() && response.len() == need;
                    }
                }
                Ok(None) => {}
                Err(_) => {
                    close_fd(stream.into_raw_fd());
                    return Err(TransportError::ReadFailed);
                }
            }
            match stream.read(&mut buf) {
                Ok(0) => break false,
                Ok(n) => response.extend_from_slice(&buf[..n]),
                Err(_) if !response.is_empty() => {
                    close_fd(stream.into_raw_fd());
                    return Err(TransportError::PartialResponseSent);
                }
                Err(_) => {
                    close_fd(stream.into_raw_fd());
                    return Err(TransportError::ReadFailed);
                }
            }
        };

        if response.is_empty() {
            close_fd(stream.into_raw_fd());
            return Err(TransportError::ReadFailed);
        }
        self.pool.release(&backend.name, stream.into_raw_fd(), keep);
        Ok(response)
    }
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Translates a completed HTTP/2 request into an HTTP/1.1 wire request the
/// raw-socket transport can send to a backend (spec §4.10: load-balancer
/// mode forwards HTTP/2 client traffic over the same backend protocol as
/// HTTP/1.1). Pseudo-headers map onto the request line and `Host`; the hop
/// is always closed afterward since the H1 side of this bridge has no
/// notion of persistent backend streams to keep per-request identity
/// straight.
fn encode_h1_request(headers: &HeaderList, body: &[u8]) -> Vec<u8> {
    let find = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
    let method = find(":method").unwrap_or("GET");
    let path = find(":path").unwrap_or("/");

    let mut out = Vec::new();
    out.extend_from_slice(format!("{method} {path} HTTP/1.1\r\n").as_bytes());
    if let Some(authority) = find(":authority") {
        out.extend_from_slice(format!("Host: {authority}\r\n").as_bytes());
    }
    for (name, value) in headers {
        if name.starts_with(':') || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

/// Translates a backend's HTTP/1.1 response back into an HTTP/2
/// `:status` + header list and body for `Connection::send_response`.
/// Hop-by-hop headers that have no meaning in H2 are dropped.
fn decode_h1_response(response: &[u8]) -> (HeaderList, Vec<u8>) {
    match parse_response_head(response) {
        Ok(Some(head)) => {
            let mut headers: HeaderList = vec![(":status".to_string(), head.status.to_string())];
            for (name, value) in &head.headers {
                if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("transfer-encoding") {
                    continue;
                }
                headers.push((name.to_ascii_lowercase(), String::from_utf8_lossy(value).into_owned()));
            }
            let body = response[head.head_len.min(response.len())..].to_vec();
            (headers, body)
        }
        _ => (vec![(":status".to_string(), "502".to_string())], Vec::new()),
    }
}

fn resource_to_platform(e: ResourceError) -> PlatformError {
    PlatformError::Io(io::Error::new(io::ErrorKind::Other, e.to_string()))
}

impl EventHandler for Gateway {
    fn on_accept(&mut self, listen_fd: RawFd, result: io::Result<RawFd>) {
        if self.event_loop.submit_accept(listen_fd).is_err() {
            warn!("failed to re-arm accept, no more connections will be admitted");
        }
        match result {
            Ok(fd) => self.accept_connection(fd),
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }

    fn on_read(&mut self, fd: RawFd, generation: u16, result: io::Result<usize>) {
        if self.generations.get(&fd).copied() != Some(generation) {
            trace!(fd, generation, "stale read completion ignored");
            return;
        }
        let n = match result {
            Ok(0) | Err(_) => {
                self.close_connection(fd);
                return;
            }
            Ok(n) => n,
        };

        let chunk = {
            let Some(conn) = self.table.lookup(fd) else {
                return;
            };
            conn.touch();
            let Some(handle) = conn.read_buffer else {
                return;
            };
            self.read_pool.set_filled(handle, n);
            self.read_pool.data(handle).to_vec()
        };

        self.process_connection(fd, chunk);
        self.after_pump(fd);
    }

    fn on_write(&mut self, fd: RawFd, generation: u16, result: io::Result<usize>) {
        if self.generations.get(&fd).copied() != Some(generation) {
            trace!(fd, generation, "stale write completion ignored");
            return;
        }
        if result.is_err() {
            self.close_connection(fd);
            return;
        }
        if let Some(conn) = self.table.lookup(fd) {
            if let Some(h) = conn.write_buffer.take() {
                self.write_pool.release(h);
            }
        }
        self.after_pump(fd);
    }

    fn on_recv_msg(&mut self, _fd: RawFd, _result: io::Result<usize>) {
        // QUIC's UDP datagram loop runs outside this TCP completion loop
        // (see `quic_loop.rs`); `blitz_core::event_loop` does not yet expose
        // a `submit_recv_msg`, so this handler has nothing to dispatch to.
    }

    fn on_send_msg(&mut self, _fd: RawFd, _result: io::Result<usize>) {}

    fn on_timeout_tick(&mut self) {
        let now = Instant::now();
        for fd in self.table.sweep_candidates(now) {
            debug!(fd, "closing idle/expired connection");
            self.close_connection(fd);
        }
        self.rate_limiter.sweep(now);
        if let Some(lb) = &self.lb {
            lb.pool.sweep(now);
        }
        let signals = self.reload.drain_pending();
        if !signals.is_empty() {
            info!(?signals, "reload signal observed");
            self.attempt_reload();
        }
        if self.event_loop.submit_housekeeping_timer(HOUSEKEEPING_PERIOD).is_err() {
            warn!("failed to re-arm housekeeping timer");
        }
    }
}

impl Gateway {
    /// Shared tail of `on_read`/`on_write`: after bytes have been processed
    /// (or a write slot freed), either push more queued output, close a
    /// connection that finished its last response, or go back to reading.
    fn after_pump(&mut self, fd: RawFd) {
        if self.queue_write(fd) {
            return;
        }
        let Some(session) = self.sessions.get(&fd) else { return };
        if session.close_after_write {
            self.close_connection(fd);
            return;
        }
        self.rearm_read(fd);
    }
}

/// Reads the peer's IPv4 address off an already-accepted socket via
/// `getpeername` (spec §4.9: per-source rate-limit buckets are keyed on
/// this). Returns `None` for an IPv6 peer or a call that otherwise fails;
/// callers fall back to the unspecified-address bucket.
fn peer_ipv4(fd: RawFd) -> Option<Ipv4Addr> {
    unsafe {
        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let ret = libc::getpeername(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len);
        if ret == 0 && i32::from(addr.sin_family) == libc::AF_INET {
            Some(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
        } else {
            None
        }
    }
}

/// Admission check consulted before a connection's bytes are even read
/// into the protocol engines (spec §4.9); callers key by the peer's IPv4
/// address when available.
pub fn admit(rate_limiter: &mut RateLimiter, source: std::net::Ipv4Addr, metrics: &Counters) -> bool {
    match rate_limiter.admit(source) {
        Decision::Admit => true,
        Decision::DenyGlobal | Decision::DenyPerIp => {
            metrics.inc_rate_limit_denials();
            false
        }
    }
}
