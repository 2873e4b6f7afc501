//! HTTP/2 stream state machine (RFC 7540 §5.1), tracked per stream id inside
//! the connection's stream table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    AwaitingHeaders,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open { local: Peer, remote: Peer },
    HalfClosedLocal(Peer),
    HalfClosedRemote(Peer),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// A frame arrived that is illegal for the stream's current state
    /// (RFC 7540 §5.1's transition table has no edge for it).
    UnexpectedFrame,
}

impl Default for StreamState {
    fn default() -> Self {
        StreamState::Idle
    }
}

impl StreamState {
    /// Transition on sending a HEADERS (or implied CONTINUATION) frame,
    /// `eos` is the END_STREAM flag.
    pub fn send_headers(&mut self, eos: bool) -> Result<(), StateError> {
        *self = match *self {
            StreamState::Idle => {
                if eos {
                    StreamState::HalfClosedLocal(Peer::AwaitingHeaders)
                } else {
                    StreamState::Open {
                        local: Peer::Streaming,
                        remote: Peer::AwaitingHeaders,
                    }
                }
            }
            StreamState::Open {
                local: Peer::AwaitingHeaders,
                remote,
            } => {
                if eos {
                    StreamState::HalfClosedLocal(remote)
                } else {
                    StreamState::Open {
                        local: Peer::Streaming,
                        remote,
                    }
                }
            }
            StreamState::HalfClosedRemote(Peer::AwaitingHeaders) => {
                if eos {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedRemote(Peer::Streaming)
                }
            }
            _ => return Err(StateError::UnexpectedFrame),
        };
        Ok(())
    }

    /// Transition on receiving a HEADERS frame, `eos` is END_STREAM.
    pub fn recv_headers(&mut self, eos: bool) -> Result<(), StateError> {
        *self = match *self {
            StreamState::Idle => {
                if eos {
                    StreamState::HalfClosedRemote(Peer::AwaitingHeaders)
                } else {
                    StreamState::Open {
                        local: Peer::AwaitingHeaders,
                        remote: Peer::Streaming,
                    }
                }
            }
            StreamState::Open {
                local,
                remote: Peer::AwaitingHeaders,
            } => {
                if eos {
                    StreamState::HalfClosedRemote(local)
                } else {
                    StreamState::Open {
                        local,
                        remote: Peer::Streaming,
                    }
                }
            }
            StreamState::HalfClosedLocal(Peer::AwaitingHeaders) => {
                if eos {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedLocal(Peer::Streaming)
                }
            }
            _ => return Err(StateError::UnexpectedFrame),
        };
        Ok(())
    }

    /// Transition on sending/receiving a DATA frame carrying END_STREAM.
    pub fn end_stream(&mut self, local: bool) {
        *self = match (*self, local) {
            (StreamState::Open { remote, .. }, true) => StreamState::HalfClosedLocal(remote),
            (StreamState::Open { local, .. }, false) => StreamState::HalfClosedRemote(local),
            (StreamState::HalfClosedRemote(_), true) => StreamState::Closed,
            (StreamState::HalfClosedLocal(_), false) => StreamState::Closed,
            (other, _) => other,
        };
    }

    /// RST_STREAM, sent or received, unconditionally closes the stream.
    pub fn reset(&mut self) {
        *self = StreamState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// Whether the connection may still send DATA/HEADERS on this stream.
    pub fn can_send(&self) -> bool {
        matches!(
            self,
            StreamState::Open { .. } | StreamState::HalfClosedRemote(_)
        )
    }

    /// Whether the peer may still send DATA/HEADERS on this stream.
    pub fn can_recv(&self) -> bool {
        matches!(
            self,
            StreamState::Open { .. } | StreamState::HalfClosedLocal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_cycle_closes_both_ends() {
        let mut s = StreamState::default();
        s.recv_headers(false).unwrap();
        assert!(matches!(s, StreamState::Open { .. }));
        s.end_stream(false);
        assert!(matches!(s, StreamState::HalfClosedRemote(_)));
        s.send_headers(true).unwrap();
        assert_eq!(s, StreamState::Closed);
    }

    #[test]
    fn single_frame_request_and_response() {
        let mut s = StreamState::default();
        s.recv_headers(true).unwrap();
        assert_eq!(s, StreamState::HalfClosedRemote(Peer::AwaitingHeaders));
        s.send_headers(true).unwrap();
        assert_eq!(s, StreamState::Closed);
    }

    #[test]
    fn reset_always_closes() {
        let mut s = StreamState::default();
        s.recv_headers(false).unwrap();
        s.reset();
        assert!(s.is_closed());
    }

    #[test]
    fn headers_after_close_is_protocol_error() {
        let mut s = StreamState::default();
        s.recv_headers(true).unwrap();
        s.send_headers(true).unwrap();
        assert_eq!(s.recv_headers(false), Err(StateError::UnexpectedFrame));
    }

    #[test]
    fn closed_stream_cannot_send_or_recv() {
        let s = StreamState::Closed;
        assert!(!s.can_send());
        assert!(!s.can_recv());
    }
}
