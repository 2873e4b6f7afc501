//! QUIC stream bookkeeping and the HTTP/3 frame types carried on them
//! (spec §4.8, RFC 9114 §7.2). Control streams use even ids, request
//! streams use odd (client-initiated, bidirectional) ids.

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub type StreamId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Http3FrameType {
    Data = 0x00,
    Headers = 0x01,
    Settings = 0x04,
    GoAway = 0x07,
}

impl Http3FrameType {
    fn from_u64(v: u64) -> Option<Self> {
        Some(match v {
            0x00 => Http3FrameType::Data,
            0x01 => Http3FrameType::Headers,
            0x04 => Http3FrameType::Settings,
            0x07 => Http3FrameType::GoAway,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Http3Frame {
    Data(Bytes),
    Headers(Bytes),
    Settings(Vec<(u64, u64)>),
    GoAway(u64),
    /// An unrecognized frame type, which RFC 9114 §7.2.8 requires be
    /// ignored rather than treated as an error.
    Unknown { frame_type: u64, payload: Bytes },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    Truncated,
    BadVarint,
}

fn read_varint(buf: &[u8]) -> Result<(u64, usize), FrameError> {
    if buf.is_empty() {
        return Err(FrameError::Truncated);
    }
    let prefix = buf[0] >> 6;
    let len = 1usize << prefix;
    if buf.len() < len {
        return Err(FrameError::Truncated);
    }
    let mut value = (buf[0] & 0x3f) as u64;
    for &b in &buf[1..len] {
        value = (value << 8) | b as u64;
    }
    Ok((value, len))
}

fn write_varint(out: &mut BytesMut, value: u64) {
    if value <= 0x3f {
        out.put_u8(value as u8);
    } else if value <= 0x3fff {
        out.put_u16((value as u16) | 0x4000);
    } else if value <= 0x3fff_ffff {
        out.put_u32((value as u32) | 0x8000_0000);
    } else {
        out.put_u64(value | 0xc000_0000_0000_0000);
    }
}

/// Decodes one HTTP/3 frame (type + varint length + payload) from the front
/// of `buf`, or `None` if not enough bytes have arrived yet.
pub fn decode(buf: &[u8]) -> Result<Option<(Http3Frame, usize)>, FrameError> {
    let (frame_type, type_len) = read_varint(buf)?;
    let rest = &buf[type_len..];
    let Ok((length, len_len)) = read_varint(rest) else {
        return Ok(None);
    };
    let header_len = type_len + len_len;
    let total = header_len + length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[header_len..total];
    let frame = match Http3FrameType::from_u64(frame_type) {
        Some(Http3FrameType::Data) => Http3Frame::Data(Bytes::copy_from_slice(payload)),
        Some(Http3FrameType::Headers) => Http3Frame::Headers(Bytes::copy_from_slice(payload)),
        Some(Http3FrameType::Settings) => {
            let mut params = Vec::new();
            let mut pos = 0;
            while pos < payload.len() {
                let (id, l1) = read_varint(&payload[pos..])?;
                pos += l1;
                let (val, l2) = read_varint(&payload[pos..])?;
                pos += l2;
                params.push((id, val));
            }
            Http3Frame::Settings(params)
        }
        Some(Http3FrameType::GoAway) => {
            let (id, _) = read_varint(payload)?;
            Http3Frame::GoAway(id)
        }
        None => Http3Frame::Unknown {
            frame_type,
            payload: Bytes::copy_from_slice(payload),
        },
    };
    Ok(Some((frame, total)))
}

pub fn decode_and_advance(buf: &mut BytesMut) -> Result<Option<Http3Frame>, FrameError> {
    match decode(buf)? {
        Some((frame, consumed)) => {
            buf.advance(consumed);
            Ok(Some(frame))
        }
        None => Ok(None),
    }
}

pub fn encode(frame: &Http3Frame) -> BytesMut {
    let mut out = BytesMut::new();
    match frame {
        Http3Frame::Data(payload) => {
            write_varint(&mut out, Http3FrameType::Data as u64);
            write_varint(&mut out, payload.len() as u64);
            out.extend_from_slice(payload);
        }
        Http3Frame::Headers(block) => {
            write_varint(&mut out, Http3FrameType::Headers as u64);
            write_varint(&mut out, block.len() as u64);
            out.extend_from_slice(block);
        }
        Http3Frame::Settings(params) => {
            let mut body = BytesMut::new();
            for (id, val) in params {
                write_varint(&mut body, *id);
                write_varint(&mut body, *val);
            }
            write_varint(&mut out, Http3FrameType::Settings as u64);
            write_varint(&mut out, body.len() as u64);
            out.extend_from_slice(&body);
        }
        Http3Frame::GoAway(id) => {
            let mut body = BytesMut::new();
            write_varint(&mut body, *id);
            write_varint(&mut out, Http3FrameType::GoAway as u64);
            write_varint(&mut out, body.len() as u64);
            out.extend_from_slice(&body);
        }
        Http3Frame::Unknown { frame_type, payload } => {
            write_varint(&mut out, *frame_type);
            write_varint(&mut out, payload.len() as u64);
            out.extend_from_slice(payload);
        }
    }
    out
}

pub fn is_control_stream(id: StreamId) -> bool {
    id % 4 == 2 || id % 4 == 3
}

pub fn is_request_stream(id: StreamId) -> bool {
    id % 4 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_known_frame_types() {
        for frame in [
            Http3Frame::Data(Bytes::from_static(b"abc")),
            Http3Frame::Headers(Bytes::from_static(b"hdrs")),
            Http3Frame::Settings(vec![(0x6, 100)]),
            Http3Frame::GoAway(4),
        ] {
            let encoded = encode(&frame);
            let (decoded, consumed) = decode(&encoded).unwrap().unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn unknown_frame_type_is_preserved_not_rejected() {
        let frame = Http3Frame::Unknown {
            frame_type: 0x21,
            payload: Bytes::from_static(b"x"),
        };
        let encoded = encode(&frame);
        let (decoded, _) = decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn stream_id_parity_classifies_client_bidi_and_control() {
        assert!(is_request_stream(0));
        assert!(is_request_stream(4));
        assert!(!is_control_stream(0));
        assert!(is_control_stream(3));
        assert!(is_control_stream(11));
    }

    #[test]
    fn incomplete_frame_requests_more_bytes() {
        assert_eq!(decode(&[0x01, 0x04, b'h', b'i']), Ok(None));
    }
}
