//! Health checker (spec §4.10): a periodic blocking probe against each
//! backend's configured health path, run from a dedicated task rather than
//! the fast path (spec §5 "Blocking operations").

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::Backend;

#[derive(Debug, Clone, Copy)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            unhealthy_threshold: 3,
        }
    }
}

/// Runs one probe round across every backend that has a `health_check_path`
/// configured; backends without one are left untouched (treated as always
/// healthy by omission).
pub fn run_once(backends: &[Arc<Backend>], config: &HealthCheckConfig) {
    for backend in backends {
        let Some(path) = backend.health_check_path.clone() else {
            continue;
        };
        let ok = probe(backend, &path, config.timeout);
        backend.apply_health_probe(ok, config.unhealthy_threshold);
        if !ok {
            debug!(backend = %backend.name, "health probe failed");
        }
    }
}

fn probe(backend: &Backend, path: &str, timeout: Duration) -> bool {
    let (host, port) = backend.addr();
    let stream = TcpStream::connect_timeout(
        &match format!("{host}:{port}").parse() {
            Ok(addr) => addr,
            Err(_) => return false,
        },
        timeout,
    );
    let mut stream = match stream {
        Ok(s) => s,
        Err(e) => {
            warn!(backend = %backend.name, error = %e, "health probe connect failed");
            return false;
        }
    };
    let _ = stream.set_read_timeout(Some(timeout));
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    if stream.write_all(request.as_bytes()).is_err() {
        return false;
    }
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(n) if n >= 12 => buf.starts_with(b"HTTP/1.1 2") || buf.starts_with(b"HTTP/1.0 2"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_without_health_path_are_skipped() {
        let b = Arc::new(Backend::new("b1".into(), "127.0.0.1".into(), 1, 1, None));
        run_once(&[b.clone()], &HealthCheckConfig::default());
        assert!(b.is_healthy());
    }

    #[test]
    fn unreachable_backend_with_health_path_is_marked_down_after_threshold() {
        let b = Arc::new(Backend::new(
            "b1".into(),
            "127.0.0.1".into(),
            1,
            1,
            Some("/health".into()),
        ));
        let config = HealthCheckConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
            unhealthy_threshold: 1,
        };
        run_once(&[b.clone()], &config);
        assert!(!b.is_healthy());
    }
}
