//! Weighted round-robin backend selection (spec §4.10): healthy backends
//! only, falling back to any backend when none are healthy so operators
//! observe upstream errors rather than a silent stall.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;

pub struct Selector {
    backends: Vec<Arc<Backend>>,
    /// Running weighted-round-robin cursor: (backend index, remaining
    /// credit for this pass), smooth WRR à la Nginx's `selectByRoundRobin`.
    cursor: Mutex<usize>,
}

impl Selector {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            backends,
            cursor: Mutex::new(0),
        }
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Returns the next backend to try, skipping unhealthy ones; if every
    /// backend is unhealthy, returns the next one anyway (spec §4.10).
    pub fn select(&self) -> Option<Arc<Backend>> {
        if self.backends.is_empty() {
            return None;
        }
        let healthy: Vec<&Arc<Backend>> = self.backends.iter().filter(|b| b.is_healthy()).collect();
        let pool: &[&Arc<Backend>] = if healthy.is_empty() {
            return Some(self.round_robin_any());
        } else {
            &healthy
        };
        let total_weight: u32 = pool.iter().map(|b| b.weight).sum();
        let mut cursor = self.cursor.lock();
        *cursor = (*cursor + 1) % total_weight.max(1) as usize;
        let mut remaining = *cursor as u32;
        for backend in pool {
            if remaining < backend.weight {
                return Some((*backend).clone());
            }
            remaining -= backend.weight;
        }
        pool.last().map(|b| (*b).clone())
    }

    fn round_robin_any(&self) -> Arc<Backend> {
        let mut cursor = self.cursor.lock();
        *cursor = (*cursor + 1) % self.backends.len();
        self.backends[*cursor].clone()
    }

    /// Selects excluding the given set of already-tried backend names, for
    /// retry-on-a-different-backend (spec §4.10 "Forwarding").
    pub fn select_excluding(&self, tried: &[String]) -> Option<Arc<Backend>> {
        let candidates: Vec<Arc<Backend>> = self
            .backends
            .iter()
            .filter(|b| b.is_healthy() && !tried.contains(&b.name))
            .cloned()
            .collect();
        candidates.into_iter().next().or_else(|| self.select())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, weight: u32) -> Arc<Backend> {
        Arc::new(Backend::new(name.into(), "h".into(), 1, weight, None))
    }

    #[test]
    fn skips_unhealthy_backend() {
        let b1 = backend("b1", 1);
        b1.apply_health_probe(false, 1);
        let b2 = backend("b2", 1);
        let selector = Selector::new(vec![b1.clone(), b2.clone()]);
        for _ in 0..5 {
            let selected = selector.select().unwrap();
            assert_eq!(selected.name, "b2");
        }
    }

    #[test]
    fn falls_back_to_any_backend_when_all_unhealthy() {
        let b1 = backend("b1", 1);
        b1.apply_health_probe(false, 1);
        let selector = Selector::new(vec![b1.clone()]);
        assert!(selector.select().is_some());
    }

    #[test]
    fn empty_backend_set_selects_nothing() {
        let selector = Selector::new(vec![]);
        assert!(selector.select().is_none());
    }

    #[test]
    fn retry_excludes_already_tried_backend() {
        let b1 = backend("b1", 1);
        let b2 = backend("b2", 1);
        let selector = Selector::new(vec![b1.clone(), b2.clone()]);
        let picked = selector.select_excluding(&["b1".to_string()]).unwrap();
        assert_eq!(picked.name, "b2");
    }
}
