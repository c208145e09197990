use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::service::{AppError, AppResult};
use crate::transport::{ConnId, LinkId};

const TAG_DIAL: u8 = 0x01;
const TAG_ACCEPT: u8 = 0x02;
const TAG_OPEN: u8 = 0x10;
const TAG_CONN: u8 = 0x11;
const TAG_CLOSE: u8 = 0x12;

const LEN_PREFIX: usize = 4;

/// One unit of the wire protocol: a length-prefixed, tagged payload.
///
/// Layout: `u32 big-endian body length || tag u8 || payload`. The closed set
/// of tags is the whole protocol; a reader that meets a tag it does not know
/// consumes the declared length and carries on (`Frame::Unknown`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client half of the handshake, carrying the dialer's link id.
    Dial { from_id: LinkId },
    /// Server acknowledgement of a dial.
    Accept,
    /// Request to open a logical conn with the given id.
    Open { id: ConnId },
    /// Data on a logical conn.
    Conn { id: ConnId, payload: Bytes },
    /// Best-effort terminator of a logical conn. Loss is tolerated.
    Close { id: ConnId },
    /// Unrecognized tag, already consumed. Receivers drop it silently.
    Unknown { tag: u8 },
}

impl Frame {
    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Dial { from_id } => {
                dst.put_u32(9);
                dst.put_u8(TAG_DIAL);
                dst.put_u64(from_id.as_u64());
            }
            Frame::Accept => {
                dst.put_u32(1);
                dst.put_u8(TAG_ACCEPT);
            }
            Frame::Open { id } => {
                dst.put_u32(9);
                dst.put_u8(TAG_OPEN);
                dst.put_u64(id.as_u64());
            }
            Frame::Conn { id, payload } => {
                dst.put_u32((13 + payload.len()) as u32);
                dst.put_u8(TAG_CONN);
                dst.put_u64(id.as_u64());
                dst.put_u32(payload.len() as u32);
                dst.put_slice(payload);
            }
            Frame::Close { id } => {
                dst.put_u32(9);
                dst.put_u8(TAG_CLOSE);
                dst.put_u64(id.as_u64());
            }
            Frame::Unknown { tag } => {
                dst.put_u32(1);
                dst.put_u8(*tag);
            }
        }
    }

    /// Verify that `buffer` holds one complete frame within the size bound.
    /// `Incomplete` asks the caller to read more bytes first.
    pub fn check(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<()> {
        if buffer.remaining() < LEN_PREFIX {
            return Err(AppError::Incomplete);
        }
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&buffer[..LEN_PREFIX]);
        let body_len = u32::from_be_bytes(len_bytes) as usize;
        if body_len == 0 {
            return Err(AppError::MalformedFrame("zero-length frame body".to_string()));
        }
        if body_len > max_frame_size {
            return Err(AppError::MalformedFrame(format!(
                "frame of length {} is too large",
                body_len
            )));
        }
        if buffer.remaining() < LEN_PREFIX + body_len {
            buffer.reserve(LEN_PREFIX + body_len);
            return Err(AppError::Incomplete);
        }
        Ok(())
    }

    /// Consume one frame from `buffer`, or `Ok(None)` if more bytes are
    /// needed. Structural damage inside a known tag's body is fatal.
    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<Option<Frame>> {
        match Frame::check(buffer, max_frame_size) {
            Ok(()) => {
                let body_len = buffer.get_u32() as usize;
                let mut body = buffer.split_to(body_len);
                Ok(Some(Frame::decode_body(&mut body)?))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_body(body: &mut BytesMut) -> AppResult<Frame> {
        let tag = body.get_u8();
        match tag {
            TAG_DIAL => {
                if body.remaining() != 8 {
                    return Err(AppError::MalformedFrame("dial frame body".to_string()));
                }
                Ok(Frame::Dial {
                    from_id: LinkId::from_u64(body.get_u64()),
                })
            }
            TAG_ACCEPT => {
                if body.has_remaining() {
                    return Err(AppError::MalformedFrame("accept frame body".to_string()));
                }
                Ok(Frame::Accept)
            }
            TAG_OPEN => {
                if body.remaining() != 8 {
                    return Err(AppError::MalformedFrame("open frame body".to_string()));
                }
                Ok(Frame::Open {
                    id: ConnId::from_u64(body.get_u64()),
                })
            }
            TAG_CONN => {
                if body.remaining() < 12 {
                    return Err(AppError::MalformedFrame("conn frame header".to_string()));
                }
                let id = ConnId::from_u64(body.get_u64());
                let payload_len = body.get_u32() as usize;
                if body.remaining() != payload_len {
                    return Err(AppError::MalformedFrame(
                        "conn frame payload length mismatch".to_string(),
                    ));
                }
                let payload = body.split_to(payload_len).freeze();
                Ok(Frame::Conn { id, payload })
            }
            TAG_CLOSE => {
                if body.remaining() != 8 {
                    return Err(AppError::MalformedFrame("close frame body".to_string()));
                }
                Ok(Frame::Close {
                    id: ConnId::from_u64(body.get_u64()),
                })
            }
            // The rest of the body is discarded with `body` itself.
            other => Ok(Frame::Unknown { tag: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 16 * 1024 * 1024;

    fn round_trip(frame: Frame) -> Frame {
        let mut buffer = BytesMut::new();
        frame.encode(&mut buffer);
        Frame::parse(&mut buffer, MAX).unwrap().unwrap()
    }

    #[test]
    fn round_trip_every_known_tag() {
        let id = ConnId::from_u64(0xdead_beef_0102_0304);
        assert_eq!(
            round_trip(Frame::Dial { from_id: LinkId::from_u64(7) }),
            Frame::Dial { from_id: LinkId::from_u64(7) }
        );
        assert_eq!(round_trip(Frame::Accept), Frame::Accept);
        assert_eq!(round_trip(Frame::Open { id }), Frame::Open { id });
        assert_eq!(
            round_trip(Frame::Conn { id, payload: Bytes::from_static(b"payload") }),
            Frame::Conn { id, payload: Bytes::from_static(b"payload") }
        );
        assert_eq!(round_trip(Frame::Close { id }), Frame::Close { id });
    }

    #[test]
    fn parse_waits_for_a_complete_frame() {
        let mut full = BytesMut::new();
        Frame::Open { id: ConnId::from_u64(1) }.encode(&mut full);

        let mut buffer = BytesMut::new();
        for &byte in &full[..full.len() - 1] {
            buffer.put_u8(byte);
            assert!(Frame::parse(&mut buffer, MAX).unwrap().is_none());
        }
        buffer.put_u8(full[full.len() - 1]);
        assert!(Frame::parse(&mut buffer, MAX).unwrap().is_some());
        assert!(buffer.is_empty());
    }

    #[test]
    fn unknown_tag_is_consumed_and_surfaced() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(8);
        buffer.put_u8(0xfe);
        buffer.put_slice(b"opaque!");
        Frame::Open { id: ConnId::from_u64(5) }.encode(&mut buffer);

        assert_eq!(
            Frame::parse(&mut buffer, MAX).unwrap().unwrap(),
            Frame::Unknown { tag: 0xfe }
        );
        assert_eq!(
            Frame::parse(&mut buffer, MAX).unwrap().unwrap(),
            Frame::Open { id: ConnId::from_u64(5) }
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(1024);
        buffer.put_u8(TAG_ACCEPT);
        let err = Frame::parse(&mut buffer, 512).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
    }

    #[test]
    fn zero_length_body_is_rejected() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(0);
        let err = Frame::parse(&mut buffer, MAX).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
    }

    #[test]
    fn conn_payload_length_mismatch_is_fatal() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(13 + 3);
        buffer.put_u8(TAG_CONN);
        buffer.put_u64(9);
        buffer.put_u32(99);
        buffer.put_slice(b"abc");
        let err = Frame::parse(&mut buffer, MAX).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
    }

    #[test]
    fn truncated_known_body_is_fatal() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(5);
        buffer.put_u8(TAG_OPEN);
        buffer.put_u32(1);
        let err = Frame::parse(&mut buffer, MAX).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
    }
}
