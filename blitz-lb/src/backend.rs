//! Backend bookkeeping (spec §4.3 "Backend", §4.10): address, weight,
//! health flag, and request counters, mutated by both the health checker
//! and the request path.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct Backend {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub health_check_path: Option<String>,
    healthy: std::sync::atomic::AtomicBool,
    consecutive_failures: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Backend {
    pub fn new(name: String, host: String, port: u16, weight: u32, health_check_path: Option<String>) -> Self {
        Self {
            name,
            host,
            port,
            weight: weight.max(1),
            health_check_path,
            healthy: std::sync::atomic::AtomicBool::new(true),
            consecutive_failures: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.successes.load(Ordering::Relaxed), self.failures.load(Ordering::Relaxed))
    }

    /// Called by the health checker: marks unhealthy after `threshold`
    /// consecutive probe failures, healthy again after a single success.
    pub fn apply_health_probe(&self, ok: bool, unhealthy_threshold: u64) {
        if ok {
            self.healthy.store(true, Ordering::Release);
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= unhealthy_threshold {
                self.healthy.store(false, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_with_floor_weight_of_one() {
        let b = Backend::new("b1".into(), "127.0.0.1".into(), 8080, 0, None);
        assert!(b.is_healthy());
        assert_eq!(b.weight, 1);
    }

    #[test]
    fn marks_unhealthy_after_threshold_consecutive_failures() {
        let b = Backend::new("b1".into(), "h".into(), 1, 1, None);
        b.apply_health_probe(false, 3);
        b.apply_health_probe(false, 3);
        assert!(b.is_healthy());
        b.apply_health_probe(false, 3);
        assert!(!b.is_healthy());
    }

    #[test]
    fn single_success_restores_health() {
        let b = Backend::new("b1".into(), "h".into(), 1, 1, None);
        for _ in 0..5 {
            b.apply_health_probe(false, 3);
        }
        assert!(!b.is_healthy());
        b.apply_health_probe(true, 3);
        assert!(b.is_healthy());
    }
}
