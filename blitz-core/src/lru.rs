//! A small bounded LRU cache shared by the TLS session-ticket store and the
//! QUIC address-validation/0-RTT token store (spec §3 "Session Ticket / QUIC
//! Token").

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    created_at: Instant,
    lifetime: Duration,
}

/// Fixed-capacity, insertion/access-ordered cache. Eviction is strict FIFO
/// over access order (a true LRU), and expired entries are also purged
/// lazily on lookup so a cache full of expired tickets cannot wedge out
/// fresh ones indefinitely.
pub struct BoundedLru<K, V> {
    capacity: usize,
    map: HashMap<K, Entry<V>>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedLru<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: K, value: V, lifetime: Duration) {
        if !self.map.contains_key(&key) {
            if self.order.len() >= self.capacity {
                let oldest = self.order.remove(0);
                self.map.remove(&oldest);
            }
            self.order.push(key.clone());
        }
        self.map.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
                lifetime,
            },
        );
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = match self.map.get(key) {
            Some(e) => e.created_at.elapsed() > e.lifetime,
            None => return None,
        };
        if expired {
            self.map.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
        self.map.get(key).map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut lru: BoundedLru<u32, &str> = BoundedLru::new(2);
        lru.insert(1, "a", Duration::from_secs(60));
        lru.insert(2, "b", Duration::from_secs(60));
        lru.insert(3, "c", Duration::from_secs(60));
        assert!(lru.get(&1).is_none());
        assert!(lru.get(&2).is_some());
        assert!(lru.get(&3).is_some());
    }

    #[test]
    fn expired_entries_are_purged_on_access() {
        let mut lru: BoundedLru<u32, &str> = BoundedLru::new(2);
        lru.insert(1, "a", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(lru.get(&1).is_none());
        assert_eq!(lru.len(), 0);
    }
}
