//! Metrics registry (C12, SPEC_FULL §4.12): a trait so the core never
//! imports a Prometheus client crate directly, only the counters/gauges
//! shape an external exporter samples from.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait MetricsSink: Send + Sync {
    fn inc_accepted_connections(&self);
    fn inc_rate_limit_denials(&self);
    fn inc_upstream_retries(&self);
    fn inc_buffer_pool_exhaustion(&self);
    fn inc_h2_stream_resets(&self);
}

/// In-process counters sampled by the optional Prometheus exporter task
/// (spec §4.12, §5 "background tasks ... communicate with the fast path
/// only through Arc-shared ... state"). Plain `AtomicU64`s: the fast-path
/// thread only ever increments, the exporter task only ever reads.
#[derive(Default)]
pub struct Counters {
    pub accepted_connections: AtomicU64,
    pub rate_limit_denials: AtomicU64,
    pub upstream_retries: AtomicU64,
    pub buffer_pool_exhaustion: AtomicU64,
    pub h2_stream_resets: AtomicU64,
}

impl MetricsSink for Counters {
    fn inc_accepted_connections(&self) {
        self.accepted_connections.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_rate_limit_denials(&self) {
        self.rate_limit_denials.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_upstream_retries(&self) {
        self.upstream_retries.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_buffer_pool_exhaustion(&self) {
        self.buffer_pool_exhaustion.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_h2_stream_resets(&self) {
        self.h2_stream_resets.fetch_add(1, Ordering::Relaxed);
    }
}

impl Counters {
    pub fn snapshot_text(&self) -> String {
        format!(
            "accepted_connections {}\nrate_limit_denials {}\nupstream_retries {}\nbuffer_pool_exhaustion {}\nh2_stream_resets {}\n",
            self.accepted_connections.load(Ordering::Relaxed),
            self.rate_limit_denials.load(Ordering::Relaxed),
            self.upstream_retries.load(Ordering::Relaxed),
            self.buffer_pool_exhaustion.load(Ordering::Relaxed),
            self.h2_stream_resets.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let c = Counters::default();
        c.inc_accepted_connections();
        c.inc_accepted_connections();
        c.inc_h2_stream_resets();
        assert_eq!(c.accepted_connections.load(Ordering::Relaxed), 2);
        assert_eq!(c.h2_stream_resets.load(Ordering::Relaxed), 1);
        assert!(c.snapshot_text().contains("accepted_connections 2"));
    }
}
