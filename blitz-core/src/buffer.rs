//! Slab/Buffer Pool (C1, spec §4.1).
//!
//! Two symmetric pools — read and write — each a fixed array of owned byte
//! buffers plus a stack of free indices. `acquire`/`release` are O(1) and the
//! pool never grows after startup: on exhaustion the caller must refuse new
//! work rather than allocate.

use std::fmt;

use tracing::warn;

use crate::error::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Read,
    Write,
}

/// A handle into a [`BufferPool`]. Indices are reused after release, so a
/// handle must never be used after its matching `release` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: u32,
    kind: BufferKind,
}

impl BufferHandle {
    pub fn kind(&self) -> BufferKind {
        self.kind
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.index)
    }
}

struct Slot {
    data: Vec<u8>,
    /// Number of initialized/meaningful bytes currently in `data`.
    filled: usize,
    /// Debug-only double-release guard (spec §4.1 invariant).
    #[cfg(debug_assertions)]
    in_use: bool,
}

/// A fixed-capacity pool of same-sized buffers, handed out and returned in
/// O(1) via a free-index stack.
pub struct BufferPool {
    kind: BufferKind,
    buf_size: usize,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl BufferPool {
    pub fn new(kind: BufferKind, count: usize, buf_size: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        let mut free = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(Slot {
                data: vec![0u8; buf_size],
                filled: 0,
                #[cfg(debug_assertions)]
                in_use: false,
            });
            free.push(i as u32);
        }
        Self {
            kind,
            buf_size,
            slots,
            free,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf_size
    }

    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Hand out a free buffer, or report exhaustion. Never allocates.
    pub fn acquire(&mut self) -> Result<BufferHandle, ResourceError> {
        match self.free.pop() {
            Some(index) => {
                #[cfg(debug_assertions)]
                {
                    self.slots[index as usize].in_use = true;
                }
                self.slots[index as usize].filled = 0;
                Ok(BufferHandle {
                    index,
                    kind: self.kind,
                })
            }
            None => {
                warn!(kind = ?self.kind, "buffer pool exhausted");
                Err(ResourceError::BufferPoolExhausted { kind: self.kind })
            }
        }
    }

    /// Return a buffer to the free stack. Debug-asserts against
    /// double-release, which would otherwise silently hand the same slot to
    /// two connections.
    pub fn release(&mut self, handle: BufferHandle) {
        debug_assert_eq!(handle.kind, self.kind, "buffer released to wrong pool");
        let idx = handle.index as usize;
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                self.slots[idx].in_use,
                "double release of buffer {}",
                handle
            );
            self.slots[idx].in_use = false;
        }
        self.slots[idx].filled = 0;
        self.free.push(handle.index);
    }

    pub fn data(&self, handle: BufferHandle) -> &[u8] {
        let slot = &self.slots[handle.index as usize];
        &slot.data[..slot.filled]
    }

    pub fn data_mut(&mut self, handle: BufferHandle) -> &mut [u8] {
        &mut self.slots[handle.index as usize].data
    }

    pub fn set_filled(&mut self, handle: BufferHandle, filled: usize) {
        debug_assert!(filled <= self.buf_size);
        self.slots[handle.index as usize].filled = filled;
    }

    pub fn filled(&self, handle: BufferHandle) -> usize {
        self.slots[handle.index as usize].filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_is_o1_and_reusable() {
        let mut pool = BufferPool::new(BufferKind::Read, 2, 4096);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_err(), "pool of 2 must exhaust on third acquire");
        pool.release(a);
        let c = pool.acquire().unwrap();
        assert_eq!(pool.free_slots(), 0);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.free_slots(), 2);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn double_release_is_a_debug_assertion() {
        let mut pool = BufferPool::new(BufferKind::Write, 1, 64);
        let h = pool.acquire().unwrap();
        pool.release(h);
        pool.release(h);
    }

    #[test]
    fn exhaustion_does_not_grow_pool() {
        let mut pool = BufferPool::new(BufferKind::Read, 1, 64);
        let total_before = pool.total_slots();
        let _h = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
        assert_eq!(pool.total_slots(), total_before);
    }
}
