//! Connection-level HTTP/2 driver (C7, spec §4.7): preface validation,
//! SETTINGS exchange, PING echo, GOAWAY, and dispatch of per-stream frames
//! into the stream table.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::flow::FlowWindow;
use super::frame::{self, Frame, Reason, StreamId, DEFAULT_MAX_FRAME_SIZE};
use super::hpack::{HeaderCodec, HeaderList, StaticHpackCodec};
use super::settings::PeerSettings;
use super::stream::StreamState;

/// The 24-byte connection preface every HTTP/2 connection starts with
/// (RFC 7540 §3.5), client-to-server only.
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnError {
    BadPreface,
    Frame(frame::Error),
    Protocol(Reason),
}

impl From<frame::Error> for ConnError {
    fn from(e: frame::Error) -> Self {
        ConnError::Frame(e)
    }
}

struct StreamEntry {
    state: StreamState,
    flow: FlowWindow,
    headers: HeaderList,
}

/// What the caller should do with a fully-assembled request after
/// `Connection::poll` observes END_STREAM on it.
#[derive(Debug, PartialEq)]
pub struct CompletedRequest {
    pub stream_id: StreamId,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

pub struct Connection {
    preface_consumed: bool,
    local_settings_acked: bool,
    peer_settings: PeerSettings,
    streams: HashMap<StreamId, StreamEntry>,
    bodies: HashMap<StreamId, Vec<u8>>,
    codec: Box<dyn HeaderCodec>,
    last_stream_id_processed: StreamId,
    goaway_sent: bool,
    outbound: Vec<u8>,
    connection_window: FlowWindow,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            preface_consumed: false,
            local_settings_acked: false,
            peer_settings: PeerSettings::default(),
            streams: HashMap::new(),
            bodies: HashMap::new(),
            codec: Box::new(StaticHpackCodec::new(4096)),
            last_stream_id_processed: 0,
            goaway_sent: false,
            outbound: Vec::new(),
            connection_window: FlowWindow::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
        }
    }

    /// Bytes the caller should write out on the socket, draining the
    /// internal queue.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    fn queue(&mut self, f: &Frame) {
        self.outbound.extend_from_slice(&frame::encode(f));
    }

    /// Sends the initial SETTINGS frame a server emits right after
    /// accepting the connection, before the peer's preface is even
    /// necessarily fully read.
    pub fn send_initial_settings(&mut self) {
        self.queue(&Frame::Settings {
            ack: false,
            params: vec![(0x3, 128), (0x4, 65_535)],
        });
    }

    /// Feeds newly-received bytes; consumes the preface first if not yet
    /// seen, then decodes and dispatches as many complete frames as `buf`
    /// contains. Returns requests that reached END_STREAM this call.
    pub fn feed(&mut self, buf: &mut bytes::BytesMut) -> Result<Vec<CompletedRequest>, ConnError> {
        let mut completed = Vec::new();

        if !self.preface_consumed {
            if buf.len() < CLIENT_PREFACE.len() {
                return Ok(completed);
            }
            if &buf[..CLIENT_PREFACE.len()] != CLIENT_PREFACE {
                return Err(ConnError::BadPreface);
            }
            bytes::Buf::advance(buf, CLIENT_PREFACE.len());
            self.preface_consumed = true;
        }

        loop {
            let max_frame = self.peer_settings.max_frame_size.max(DEFAULT_MAX_FRAME_SIZE);
            let decoded = match frame::decode_and_advance(buf, max_frame) {
                Ok(d) => d,
                Err(frame::Error::PushPromiseRejected) => {
                    self.send_goaway(Reason::ProtocolError);
                    return Err(ConnError::Protocol(Reason::ProtocolError));
                }
                Err(e) => {
                    self.send_goaway(Reason::ProtocolError);
                    return Err(e.into());
                }
            };
            let Some(frame) = decoded else { break };
            if let Some(req) = self.dispatch(frame)? {
                completed.push(req);
            }
        }

        Ok(completed)
    }

    fn send_goaway(&mut self, reason: Reason) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        self.queue(&Frame::GoAway {
            last_stream_id: self.last_stream_id_processed,
            error_code: reason as u32,
            debug_data: bytes::Bytes::new(),
        });
    }

    fn dispatch(&mut self, frame: Frame) -> Result<Option<CompletedRequest>, ConnError> {
        match frame {
            Frame::Settings { ack, params } => {
                if ack {
                    self.local_settings_acked = true;
                } else {
                    self.peer_settings
                        .apply(&params)
                        .map_err(|_| ConnError::Protocol(Reason::ProtocolError))?;
                    self.queue(&Frame::Settings {
                        ack: true,
                        params: vec![],
                    });
                }
                Ok(None)
            }
            Frame::Ping { ack, payload } => {
                if !ack {
                    self.queue(&Frame::Ping { ack: true, payload });
                }
                Ok(None)
            }
            Frame::GoAway { last_stream_id, error_code, .. } => {
                debug!(last_stream_id, error_code, "peer sent GOAWAY");
                Ok(None)
            }
            Frame::WindowUpdate { stream_id, increment } => {
                if stream_id == 0 {
                    self.connection_window
                        .grow(increment)
                        .map_err(|_| ConnError::Protocol(Reason::FlowControlError))?;
                } else if let Some(entry) = self.streams.get_mut(&stream_id) {
                    entry
                        .flow
                        .grow(increment)
                        .map_err(|_| ConnError::Protocol(Reason::FlowControlError))?;
                }
                Ok(None)
            }
            Frame::Priority { .. } => Ok(None),
            Frame::RstStream { stream_id, error_code } => {
                trace!(stream_id, error_code, "peer reset stream");
                if let Some(entry) = self.streams.get_mut(&stream_id) {
                    entry.state.reset();
                }
                Ok(None)
            }
            Frame::Headers {
                stream_id,
                end_stream,
                header_block,
                ..
            } => {
                self.last_stream_id_processed = self.last_stream_id_processed.max(stream_id);
                let headers = self
                    .codec
                    .decode(&header_block)
                    .map_err(|_| ConnError::Protocol(Reason::CompressionError))?;
                let initial_window = self.peer_settings.initial_window_size;
                let entry = self.streams.entry(stream_id).or_insert_with(|| StreamEntry {
                    state: StreamState::default(),
                    flow: FlowWindow::new(initial_window),
                    headers: Vec::new(),
                });
                entry
                    .state
                    .recv_headers(end_stream)
                    .map_err(|_| ConnError::Protocol(Reason::ProtocolError))?;
                entry.headers = headers;
                if end_stream {
                    let headers = self.streams.remove(&stream_id).map(|e| e.headers).unwrap_or_default();
                    let body = self.bodies.remove(&stream_id).unwrap_or_default();
                    return Ok(Some(CompletedRequest {
                        stream_id,
                        headers,
                        body,
                    }));
                }
                Ok(None)
            }
            Frame::Data {
                stream_id,
                end_stream,
                payload,
            } => {
                let entry = self
                    .streams
                    .get_mut(&stream_id)
                    .ok_or(ConnError::Protocol(Reason::StreamClosed))?;
                entry.flow.consume(payload.len() as u32);
                self.connection_window.consume(payload.len() as u32);
                self.bodies.entry(stream_id).or_default().extend_from_slice(&payload);
                if end_stream {
                    entry.state.end_stream(false);
                    let headers = self.streams.remove(&stream_id).map(|e| e.headers).unwrap_or_default();
                    let body = self.bodies.remove(&stream_id).unwrap_or_default();
                    return Ok(Some(CompletedRequest {
                        stream_id,
                        headers,
                        body,
                    }));
                }
                Ok(None)
            }
            Frame::Continuation { .. } => {
                // This codec never splits HEADERS across CONTINUATION on the
                // encode side; on decode, `frame::decode` already merges
                // padding/priority framing per-frame so a standalone
                // CONTINUATION here means the peer split a header block we
                // don't reassemble — reject rather than silently drop data.
                warn!("received standalone CONTINUATION, unsupported");
                Err(ConnError::Protocol(Reason::ProtocolError))
            }
        }
    }

    /// Emits a full response (HEADERS + DATA with END_STREAM) for `stream_id`.
    pub fn send_response(&mut self, stream_id: StreamId, headers: HeaderList, body: &[u8]) {
        let block = self.codec.encode(&headers);
        self.queue(&Frame::Headers {
            stream_id,
            end_stream: body.is_empty(),
            end_headers: true,
            header_block: block.into(),
        });
        if !body.is_empty() {
            self.queue(&Frame::Data {
                stream_id,
                end_stream: true,
                payload: bytes::Bytes::copy_from_slice(body),
            });
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn client_preface_and_settings() -> BytesMut {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(CLIENT_PREFACE);
        buf.extend_from_slice(&frame::encode(&Frame::Settings {
            ack: false,
            params: vec![],
        }));
        buf
    }

    #[test]
    fn rejects_bad_preface() {
        let mut conn = Connection::new();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
        assert_eq!(conn.feed(&mut buf), Err(ConnError::BadPreface));
    }

    #[test]
    fn settings_exchange_acks() {
        let mut conn = Connection::new();
        let mut buf = client_preface_and_settings();
        conn.feed(&mut buf).unwrap();
        let out = conn.take_outbound();
        let (f, _) = frame::decode(&out, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(f, Frame::Settings { ack: true, params: vec![] });
    }

    #[test]
    fn ping_is_echoed() {
        let mut conn = Connection::new();
        let mut buf = client_preface_and_settings();
        buf.extend_from_slice(&frame::encode(&Frame::Ping {
            ack: false,
            payload: *b"12345678",
        }));
        conn.feed(&mut buf).unwrap();
        let out = conn.take_outbound();
        assert!(out.windows(8).any(|w| w == b"12345678"));
    }

    #[test]
    fn single_frame_request_completes() {
        let mut conn = Connection::new();
        let mut buf = client_preface_and_settings();
        let mut codec = StaticHpackCodec::new(4096);
        let block = codec.encode(&vec![(":method".to_string(), "GET".to_string())]);
        buf.extend_from_slice(&frame::encode(&Frame::Headers {
            stream_id: 1,
            end_stream: true,
            end_headers: true,
            header_block: block.into(),
        }));
        let completed = conn.feed(&mut buf).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].stream_id, 1);
    }

    #[test]
    fn push_promise_triggers_goaway() {
        let mut conn = Connection::new();
        let mut buf = client_preface_and_settings();
        // Hand-craft a PUSH_PROMISE header (type 0x5) directly since the
        // encoder deliberately has no `Frame::PushPromise` variant to build.
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0, 0, 4]);
        raw.push(0x5);
        raw.push(0);
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 0, 3]);
        buf.extend_from_slice(&raw);
        assert!(conn.feed(&mut buf).is_err());
        assert!(conn.goaway_sent);
    }
}
