//! Two-level flow control: one window for the connection, one per stream
//! (RFC 7540 §6.9). Windows are signed because a SETTINGS_INITIAL_WINDOW_SIZE
//! change can legally drive an existing stream's window negative.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// Sending would exceed the peer's advertised window, or a WINDOW_UPDATE
    /// increment would overflow it past 2^31-1 (RFC 7540 §6.9.1).
    WouldOverflow,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowWindow {
    available: i64,
}

impl FlowWindow {
    pub fn new(initial: i32) -> Self {
        Self {
            available: initial as i64,
        }
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    /// Consumes `n` bytes of send window; caller must have already checked
    /// `available() >= n`.
    pub fn consume(&mut self, n: u32) {
        self.available -= i64::from(n);
    }

    /// Applies a WINDOW_UPDATE increment.
    pub fn grow(&mut self, increment: u32) -> Result<(), FlowError> {
        let next = self.available + i64::from(increment);
        if next > i64::from(i32::MAX) {
            return Err(FlowError::WouldOverflow);
        }
        self.available = next;
        Ok(())
    }

    /// Applies a change to SETTINGS_INITIAL_WINDOW_SIZE retroactively to an
    /// already-open stream's window (RFC 7540 §6.9.2).
    pub fn adjust_initial(&mut self, delta: i64) {
        self.available += delta;
    }

    pub fn can_send(&self, n: u32) -> bool {
        self.available >= i64::from(n)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlowController {
    pub connection: FlowWindow,
    pub stream: FlowWindow,
}

impl FlowController {
    pub fn new(initial_stream_window: i32) -> Self {
        Self {
            connection: FlowWindow::new(super::frame::DEFAULT_INITIAL_WINDOW_SIZE),
            stream: FlowWindow::new(initial_stream_window),
        }
    }

    /// The amount of DATA payload that may be sent right now, bounded by
    /// both the stream and connection windows plus the peer's max frame size.
    pub fn sendable(&self, desired: u32, max_frame_size: u32) -> u32 {
        let cap = self
            .connection
            .available()
            .min(self.stream.available())
            .max(0) as u64;
        cap.min(u64::from(desired)).min(u64::from(max_frame_size)) as u32
    }

    pub fn consume(&mut self, n: u32) {
        self.connection.consume(n);
        self.stream.consume(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_update_grows_available() {
        let mut w = FlowWindow::new(100);
        w.grow(50).unwrap();
        assert_eq!(w.available(), 150);
    }

    #[test]
    fn overflow_past_max_is_rejected() {
        let mut w = FlowWindow::new(i32::MAX);
        assert_eq!(w.grow(1), Err(FlowError::WouldOverflow));
    }

    #[test]
    fn negative_window_after_settings_shrink_is_allowed() {
        let mut w = FlowWindow::new(100);
        w.adjust_initial(-150);
        assert_eq!(w.available(), -50);
        assert!(!w.can_send(1));
    }

    #[test]
    fn sendable_is_bounded_by_smaller_window_and_frame_size() {
        let mut fc = FlowController::new(1000);
        fc.connection = FlowWindow::new(10);
        fc.stream = FlowWindow::new(1000);
        assert_eq!(fc.sendable(1000, 16_384), 10);
    }

    #[test]
    fn consume_drains_both_windows_together() {
        let mut fc = FlowController::new(1000);
        fc.consume(100);
        assert_eq!(fc.stream.available(), 900);
    }
}
