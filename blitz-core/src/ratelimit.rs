//! Rate Limiter (C9, spec §4.9).
//!
//! Token-bucket admission with a global bucket and a per-source-IPv4 bucket,
//! plus a trait boundary for a kernel-offload control plane that this
//! implementation does not ship a real eBPF program for (spec Design Note
//! §9a / Open Question (a)).

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    DenyGlobal,
    DenyPerIp,
}

/// Tokens, last-refill timestamp, rate, burst cap (spec §3 "Token Bucket").
#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    cap: f64,
}

impl Bucket {
    fn new(rate: f64, burst_multiplier: f64, now: Instant) -> Self {
        let cap = rate * burst_multiplier;
        Self {
            tokens: cap,
            last_refill: now,
            rate,
            cap,
        }
    }

    /// Refills by `rate * elapsed` capped at `cap`, then debits one token if
    /// available. Refill arithmetic is monotonic: a `now` that is not after
    /// `last_refill` contributes zero tokens rather than going negative.
    fn admit(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + self.rate * elapsed).min(self.cap);
            self.last_refill = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiterConfig {
    pub global_rate: f64,
    pub per_ip_rate: Option<f64>,
    pub burst_multiplier: f64,
    /// Per-IP buckets untouched for longer than this are evicted by the
    /// sweep (spec §4.9 "evicted after a configurable inactivity window").
    pub per_ip_inactivity_window: Duration,
}

/// Userspace token-bucket path (spec §4.9 "Userspace path"). Consulted on
/// accept and on each request admission when the kernel-offload path is not
/// enabled; still updated for diagnostic symmetry when it is (spec §4.9).
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    global: Bucket,
    per_ip: AHashMap<Ipv4Addr, (Bucket, Instant)>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let now = Instant::now();
        let global = Bucket::new(cfg.global_rate, cfg.burst_multiplier, now);
        Self {
            cfg,
            global,
            per_ip: AHashMap::new(),
        }
    }

    pub fn admit(&mut self, source: Ipv4Addr) -> Decision {
        self.admit_at(source, Instant::now())
    }

    fn admit_at(&mut self, source: Ipv4Addr, now: Instant) -> Decision {
        if !self.global.admit(now) {
            trace!("global rate limit denied");
            return Decision::DenyGlobal;
        }
        if let Some(per_ip_rate) = self.cfg.per_ip_rate {
            let burst = self.cfg.burst_multiplier;
            let entry = self
                .per_ip
                .entry(source)
                .or_insert_with(|| (Bucket::new(per_ip_rate, burst, now), now));
            entry.1 = now;
            if !entry.0.admit(now) {
                trace!(%source, "per-ip rate limit denied");
                return Decision::DenyPerIp;
            }
        }
        Decision::Admit
    }

    /// Evicts per-IP buckets idle beyond the inactivity window. Never drops
    /// an entry touched within the current sweep pass's `now`.
    pub fn sweep(&mut self, now: Instant) {
        self.per_ip
            .retain(|_, (_, last_touch)| now.saturating_duration_since(*last_touch) < self.cfg.per_ip_inactivity_window);
    }

    pub fn per_ip_bucket_count(&self) -> usize {
        self.per_ip.len()
    }
}

/// Kernel-offload control plane (spec §4.9 "Kernel-offload path"). No
/// production eBPF program exists for this gateway (spec Design Note §9a);
/// this trait exists so the control-plane call sites and the
/// `rate_limit_enable_ebpf` configuration key are real and wired rather than
/// merely documented.
pub trait EbpfRateLimiter: Send {
    fn set_global_rate(&mut self, rate: f64) -> Result<(), EbpfError>;
    fn set_per_ip_rate(&mut self, rate: f64) -> Result<(), EbpfError>;
    fn set_window(&mut self, window: Duration) -> Result<(), EbpfError>;
    fn counters(&self) -> Result<EbpfCounters, EbpfError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EbpfCounters {
    pub processed: u64,
    pub dropped: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EbpfError {
    #[error("kernel rate-limit offload is not available on this build/kernel")]
    Unsupported,
}

/// Always-unsupported stub. Selecting `rate_limit_enable_ebpf = true` with
/// this implementation falls back to the userspace path and logs a warning;
/// see `ReloadManager`/config validation for where that fallback is wired.
pub struct UnsupportedEbpf;

impl EbpfRateLimiter for UnsupportedEbpf {
    fn set_global_rate(&mut self, _rate: f64) -> Result<(), EbpfError> {
        Err(EbpfError::Unsupported)
    }
    fn set_per_ip_rate(&mut self, _rate: f64) -> Result<(), EbpfError> {
        Err(EbpfError::Unsupported)
    }
    fn set_window(&mut self, _window: Duration) -> Result<(), EbpfError> {
        Err(EbpfError::Unsupported)
    }
    fn counters(&self) -> Result<EbpfCounters, EbpfError> {
        Err(EbpfError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_deny_then_refill() {
        let mut rl = RateLimiter::new(RateLimiterConfig {
            global_rate: 5.0,
            per_ip_rate: None,
            burst_multiplier: 1.0,
            per_ip_inactivity_window: Duration::from_secs(60),
        });
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        for _ in 0..5 {
            assert_eq!(rl.admit_at(ip, now), Decision::Admit);
        }
        assert_eq!(rl.admit_at(ip, now), Decision::DenyGlobal);
        let later = now + Duration::from_secs_f64(1.0 / 5.0);
        assert_eq!(rl.admit_at(ip, later), Decision::Admit);
    }

    #[test]
    fn tokens_never_exceed_rate_times_burst() {
        let mut rl = RateLimiter::new(RateLimiterConfig {
            global_rate: 2.0,
            per_ip_rate: None,
            burst_multiplier: 3.0,
            per_ip_inactivity_window: Duration::from_secs(60),
        });
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        // idle for a long time, then check the bucket never over-fills past cap
        let later = now + Duration::from_secs(1000);
        for _ in 0..6 {
            assert_eq!(rl.admit_at(ip, later), Decision::Admit);
        }
        assert_eq!(rl.admit_at(ip, later), Decision::DenyGlobal);
    }

    #[test]
    fn negative_elapsed_never_adds_tokens() {
        let mut b = Bucket::new(10.0, 1.0, Instant::now());
        let before = b.tokens;
        let earlier = b.last_refill - Duration::from_secs(5);
        // saturating_duration_since clamps this to zero elapsed, not negative
        assert!(!b.admit(earlier) || b.tokens <= before);
    }

    #[test]
    fn eviction_does_not_drop_recently_touched_entry() {
        let mut rl = RateLimiter::new(RateLimiterConfig {
            global_rate: 100.0,
            per_ip_rate: Some(10.0),
            burst_multiplier: 1.0,
            per_ip_inactivity_window: Duration::from_secs(5),
        });
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 0, 3);
        rl.admit_at(ip, now);
        rl.sweep(now);
        assert_eq!(rl.per_ip_bucket_count(), 1);
    }

    #[test]
    fn stub_ebpf_reports_unsupported() {
        let mut e = UnsupportedEbpf;
        assert!(matches!(e.set_global_rate(5.0), Err(EbpfError::Unsupported)));
        assert!(matches!(e.counters(), Err(EbpfError::Unsupported)));
    }
}
