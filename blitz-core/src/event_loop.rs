//! Completion Event Loop (C3, spec §4.3).
//!
//! A single-threaded cooperative scheduler over `io_uring`'s submission and
//! completion queues. Every submission carries a tagged `user_data` word
//! (socket + operation kind + generation) decoded on completion; there is no
//! reordering within a descriptor and no operation is ever in flight against
//! itself twice (one read, one write, at a time, per descriptor).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use tracing::{trace, warn};

use crate::error::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpKind {
    Accept = 0,
    Read = 1,
    Write = 2,
    RecvMsg = 3,
    SendMsg = 4,
    Timeout = 5,
    Close = 6,
}

impl OpKind {
    fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => OpKind::Accept,
            1 => OpKind::Read,
            2 => OpKind::Write,
            3 => OpKind::RecvMsg,
            4 => OpKind::SendMsg,
            5 => OpKind::Timeout,
            6 => OpKind::Close,
            _ => return None,
        })
    }
}

/// Packed `(fd: u32, op_kind: u16, generation: u16)` tag carried in every
/// SQE's `user_data` and decoded on the matching CQE. `generation` guards
/// against a stale completion for a closed-then-reused fd being mistaken
/// for the new connection's completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData {
    pub fd: RawFd,
    pub op: OpKind,
    pub generation: u16,
}

impl UserData {
    pub fn encode(self) -> u64 {
        ((self.fd as u64) << 32) | ((self.op as u64) << 16) | self.generation as u64
    }

    pub fn decode(raw: u64) -> Option<Self> {
        let fd = (raw >> 32) as RawFd;
        let op = OpKind::from_u16(((raw >> 16) & 0xffff) as u16)?;
        let generation = (raw & 0xffff) as u16;
        Some(UserData { fd, op, generation })
    }
}

/// Dispatch target for decoded completions. Implemented by the gateway's
/// top-level wiring, which owns the buffer pool and connection table this
/// crate does not reach into directly (spec §9 "cyclic ownership": callers
/// re-look-up state by key, never hold a strong back-reference).
pub trait EventHandler {
    fn on_accept(&mut self, listen_fd: RawFd, result: io::Result<RawFd>);
    fn on_read(&mut self, fd: RawFd, generation: u16, result: io::Result<usize>);
    fn on_write(&mut self, fd: RawFd, generation: u16, result: io::Result<usize>);
    fn on_recv_msg(&mut self, fd: RawFd, result: io::Result<usize>);
    fn on_send_msg(&mut self, fd: RawFd, result: io::Result<usize>);
    fn on_timeout_tick(&mut self);
}

/// Thin wrapper over `io_uring::IoUring` providing the tagged submit/
/// dispatch loop described in spec §4.3. Submission-queue exhaustion is
/// handled by returning [`ResourceError::SubmissionQueueFull`] to the
/// caller, which must abort the triggering work cleanly (return buffer,
/// close connection) rather than queue unboundedly.
pub struct EventLoop {
    ring: IoUring,
    housekeeping_user_data: u64,
}

impl EventLoop {
    pub fn new(entries: u32) -> Result<Self, crate::error::PlatformError> {
        let ring = IoUring::new(entries).map_err(crate::error::PlatformError::IoUringInit)?;
        let housekeeping_user_data = UserData {
            fd: -1,
            op: OpKind::Timeout,
            generation: 0,
        }
        .encode();
        Ok(Self {
            ring,
            housekeeping_user_data,
        })
    }

    fn try_push(&mut self, entry: squeue::Entry) -> Result<(), ResourceError> {
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|_| ResourceError::SubmissionQueueFull)
        }
    }

    pub fn submit_accept(&mut self, listen_fd: RawFd) -> Result<(), ResourceError> {
        let ud = UserData {
            fd: listen_fd,
            op: OpKind::Accept,
            generation: 0,
        };
        let entry = opcode::Accept::new(types::Fd(listen_fd), std::ptr::null_mut(), std::ptr::null_mut())
            .build()
            .user_data(ud.encode());
        self.try_push(entry)
    }

    pub fn submit_read(
        &mut self,
        fd: RawFd,
        generation: u16,
        buf: &mut [u8],
    ) -> Result<(), ResourceError> {
        let ud = UserData {
            fd,
            op: OpKind::Read,
            generation,
        };
        let entry = opcode::Read::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
            .build()
            .user_data(ud.encode());
        self.try_push(entry)
    }

    pub fn submit_write(
        &mut self,
        fd: RawFd,
        generation: u16,
        buf: &[u8],
    ) -> Result<(), ResourceError> {
        let ud = UserData {
            fd,
            op: OpKind::Write,
            generation,
        };
        let entry = opcode::Write::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
            .build()
            .user_data(ud.encode());
        self.try_push(entry)
    }

    /// Re-arms the once-per-second housekeeping tick. Called once at
    /// startup and again every time the previous tick's completion fires.
    pub fn submit_housekeeping_timer(&mut self, period: Duration) -> Result<(), ResourceError> {
        // The kernel holds a pointer to this timespec until the completion
        // fires, so it must outlive the submission; leaking one per re-arm
        // keeps this call allocation-cheap and bounded (one tick/second).
        let ts = Box::new(types::Timespec::new().sec(period.as_secs()).nsec(period.subsec_nanos()));
        let ts_ptr: *const types::Timespec = Box::leak(ts);
        let entry = opcode::Timeout::new(ts_ptr)
            .build()
            .user_data(self.housekeeping_user_data);
        self.try_push(entry)
    }

    pub fn submit(&mut self) -> io::Result<usize> {
        self.ring.submit()
    }

    /// Blocks for at least one completion, then dispatches every completion
    /// currently available to `handler`. Returns the number dispatched.
    pub fn run_once(&mut self, handler: &mut dyn EventHandler) -> io::Result<usize> {
        self.ring.submit_and_wait(1)?;
        let mut n = 0;
        let cq = self.ring.completion();
        let entries: Vec<cqueue::Entry> = cq.collect();
        for cqe in entries {
            n += 1;
            self.dispatch_one(cqe, handler);
        }
        Ok(n)
    }

    fn dispatch_one(&mut self, cqe: cqueue::Entry, handler: &mut dyn EventHandler) {
        let raw = cqe.user_data();
        if raw == self.housekeeping_user_data {
            handler.on_timeout_tick();
            return;
        }
        let Some(ud) = UserData::decode(raw) else {
            warn!(raw, "completion with unrecognized user_data, dropping");
            return;
        };
        let res = cqe.result();
        trace!(fd = ud.fd, op = ?ud.op, res, "completion");
        match ud.op {
            OpKind::Accept => {
                let result = if res >= 0 {
                    Ok(res as RawFd)
                } else {
                    Err(io::Error::from_raw_os_error(-res))
                };
                handler.on_accept(ud.fd, result);
            }
            OpKind::Read => {
                let result = if res >= 0 {
                    Ok(res as usize)
                } else {
                    Err(io::Error::from_raw_os_error(-res))
                };
                handler.on_read(ud.fd, ud.generation, result);
            }
            OpKind::Write => {
                let result = if res >= 0 {
                    Ok(res as usize)
                } else {
                    Err(io::Error::from_raw_os_error(-res))
                };
                handler.on_write(ud.fd, ud.generation, result);
            }
            OpKind::RecvMsg => {
                let result = if res >= 0 {
                    Ok(res as usize)
                } else {
                    Err(io::Error::from_raw_os_error(-res))
                };
                handler.on_recv_msg(ud.fd, result);
            }
            OpKind::SendMsg => {
                let result = if res >= 0 {
                    Ok(res as usize)
                } else {
                    Err(io::Error::from_raw_os_error(-res))
                };
                handler.on_send_msg(ud.fd, result);
            }
            OpKind::Timeout | OpKind::Close => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_data_round_trips() {
        let ud = UserData {
            fd: 42,
            op: OpKind::Write,
            generation: 7,
        };
        let raw = ud.encode();
        assert_eq!(UserData::decode(raw), Some(ud));
    }

    #[test]
    fn unrecognized_op_kind_decodes_to_none() {
        let raw = (42u64 << 32) | (99u64 << 16) | 1;
        assert_eq!(UserData::decode(raw), None);
    }
}
