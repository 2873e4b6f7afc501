//! In-memory `Read`/`Write` queues standing in for the socket (spec §4.4
//! design rule: "the TLS session is fed through in-memory input and output
//! byte queues, not directly attached to the socket"). This is also what
//! structurally avoids the already-consumed-ClientHello-bytes bug recorded
//! in spec Design Note §9d: the completion loop always appends newly read
//! ciphertext to `input` before `rustls` ever sees it, so no byte can be
//! observed and then lost between a read completion and the TLS engine.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

#[derive(Default)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend(data.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Drains up to `max` bytes into a freshly allocated vector, for handing
    /// to a write-buffer submission.
    pub fn drain_up_to(&mut self, max: usize) -> Vec<u8> {
        let n = self.buf.len().min(max);
        self.buf.drain(..n).collect()
    }
}

impl Read for ByteQueue {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for ByteQueue {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.push(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut q = ByteQueue::new();
        q.write_all(b"hello").unwrap();
        let mut out = [0u8; 5];
        q.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello");
        assert!(q.is_empty());
    }

    #[test]
    fn drain_up_to_respects_cap() {
        let mut q = ByteQueue::new();
        q.push(b"0123456789");
        let first = q.drain_up_to(4);
        assert_eq!(first, b"0123");
        assert_eq!(q.len(), 6);
    }
}
