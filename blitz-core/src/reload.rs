//! Graceful Reload Manager (C11, spec §4.11).
//!
//! `SIGHUP`/`SIGUSR2` are handled by an async-signal-safe handler that does
//! nothing but write one byte (encoding which signal arrived) into each
//! registered self-pipe. The event loop drains its pipe non-blockingly at a
//! quiescent point and, on a pending reload, parses/validates a new
//! configuration, runs a swap callback for live-data migration, then
//! atomically replaces the active configuration reference.
//!
//! Multiple `ReloadManager` instances may coexist in one process: the signal
//! handler walks a fixed-size registry of write-fds, so each instance's loop
//! observes the signal independently. Registration is mutex-protected; the
//! signal-handler read path is lock-free over an atomic count (it only reads
//! already-registered fds, never blocks on the registration lock, which is
//! why registration happens once at startup, not from inside the handler).

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::Configuration;

pub const MAX_REGISTRY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSignal {
    Hup,
    Usr2,
}

impl ReloadSignal {
    fn byte(self) -> u8 {
        match self {
            ReloadSignal::Hup => b'H',
            ReloadSignal::Usr2 => b'2',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'H' => Some(ReloadSignal::Hup),
            b'2' => Some(ReloadSignal::Usr2),
            _ => None,
        }
    }
}

struct Registry {
    fds: Mutex<Vec<RawFd>>,
    count: AtomicUsize,
}

static REGISTRY: Registry = Registry {
    fds: Mutex::new(Vec::new()),
    count: AtomicUsize::new(0),
};

extern "C" fn handle_signal(signum: libc::c_int) {
    let sig = if signum == libc::SIGHUP {
        ReloadSignal::Hup
    } else {
        ReloadSignal::Usr2
    };
    let byte = sig.byte();
    let n = REGISTRY.count.load(Ordering::Acquire);
    // SAFETY: async-signal-safe path. We only read a fixed-size snapshot of
    // raw fds written once at registration time and call write(2), which is
    // on the POSIX async-signal-safe list. We never touch the Mutex here.
    let fds_ptr = REGISTRY.fds.data_ptr();
    for i in 0..n.min(MAX_REGISTRY) {
        unsafe {
            let fd = *(&(*fds_ptr)).get_unchecked(i);
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Installs the process-wide `SIGHUP`/`SIGUSR2` handlers. Idempotent to
/// call more than once (subsequent calls just re-install the same handler).
pub fn install_signal_handlers() -> Result<(), std::io::Error> {
    unsafe {
        if libc::signal(libc::SIGHUP, handle_signal as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
        if libc::signal(libc::SIGUSR2, handle_signal as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn register_pipe(write_fd: RawFd) {
    let mut fds = REGISTRY.fds.lock();
    assert!(fds.len() < MAX_REGISTRY, "reload-manager registry full");
    fds.push(write_fd);
    REGISTRY.count.store(fds.len(), Ordering::Release);
}

/// Swap callback: performs live-data migration (e.g. diffing backend sets)
/// before the new configuration becomes the active one. Returning `Err`
/// aborts the reload; the previous configuration keeps serving (spec §7
/// "configuration errors ... fully rolled back").
pub type SwapCallback = Box<dyn FnMut(&Configuration, &Configuration) -> Result<(), String> + Send>;

/// Per-instance reload coordinator. Owns one end of a self-pipe registered
/// with the global signal-handler registry, and the `ArcSwap` holding the
/// active configuration.
pub struct ReloadManager {
    read_fd: RawFd,
    write_fd: RawFd,
    active: Arc<ArcSwap<Configuration>>,
    in_progress: Mutex<()>,
    swap_cb: Mutex<Option<SwapCallback>>,
}

impl ReloadManager {
    pub fn new(initial: Configuration) -> Result<Self, std::io::Error> {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);
        unsafe {
            let flags = libc::fcntl(read_fd, libc::F_GETFL);
            libc::fcntl(read_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        register_pipe(write_fd);
        Ok(Self {
            read_fd,
            write_fd,
            active: Arc::new(ArcSwap::from_pointee(initial)),
            in_progress: Mutex::new(()),
            swap_cb: Mutex::new(None),
        })
    }

    pub fn set_swap_callback(&mut self, cb: SwapCallback) {
        *self.swap_cb.lock() = Some(cb);
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn current(&self) -> Arc<Configuration> {
        self.active.load_full()
    }

    /// Drains the self-pipe non-blockingly. Returns the set of distinct
    /// signals observed since the last drain (usually 0 or 1, but coalesces
    /// bursts of the same signal without harm).
    pub fn drain_pending(&self) -> Vec<ReloadSignal> {
        let mut buf = [0u8; 64];
        let mut seen = Vec::new();
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
            for &b in &buf[..n as usize] {
                if let Some(sig) = ReloadSignal::from_byte(b) {
                    if !seen.contains(&sig) {
                        seen.push(sig);
                    }
                }
            }
        }
        seen
    }

    /// Attempts a reload given a freshly-parsed, already-validated
    /// candidate configuration. A single-entry guard forbids concurrent
    /// reloads; a reload observed while one is in flight is rejected, not
    /// queued (the next signal will trigger another attempt).
    pub fn try_reload(&self, candidate: Configuration) -> Result<(), String> {
        let _guard = match self.in_progress.try_lock() {
            Some(g) => g,
            None => {
                warn!("reload already in progress, ignoring concurrent signal");
                return Err("reload already in progress".to_string());
            }
        };
        let previous = self.active.load_full();
        if let Some(cb) = self.swap_cb.lock().as_mut() {
            if let Err(e) = cb(&previous, &candidate) {
                error!(error = %e, "reload swap callback failed, rolling back");
                return Err(e);
            }
        }
        self.active.store(Arc::new(candidate));
        info!("configuration reloaded");
        Ok(())
    }
}

impl Drop for ReloadManager {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Mode};

    fn minimal_config() -> Configuration {
        Configuration::minimal_for_test(Mode::Origin)
    }

    #[test]
    fn drain_pending_reports_signal_written_manually() {
        let mgr = ReloadManager::new(minimal_config()).unwrap();
        unsafe {
            let b = b'H';
            libc::write(mgr.write_fd, &b as *const u8 as *const libc::c_void, 1);
        }
        let sigs = mgr.drain_pending();
        assert_eq!(sigs, vec![ReloadSignal::Hup]);
        assert!(mgr.drain_pending().is_empty());
    }

    #[test]
    fn concurrent_reload_is_rejected() {
        let mgr = ReloadManager::new(minimal_config()).unwrap();
        let _g = mgr.in_progress.lock();
        assert!(mgr.try_reload(minimal_config()).is_err());
    }

    #[test]
    fn successful_reload_replaces_active_config() {
        let mgr = ReloadManager::new(minimal_config()).unwrap();
        let mut candidate = minimal_config();
        candidate.backends.push(crate::config::BackendConfig {
            name: "b2".into(),
            host: "127.0.0.1".into(),
            port: 9090,
            weight: 1,
            health_check_path: None,
        });
        mgr.try_reload(candidate).unwrap();
        assert_eq!(mgr.current().backends.len(), 1);
    }
}
