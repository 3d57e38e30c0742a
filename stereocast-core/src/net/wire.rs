//! Framed binary wire protocol for the stream channel.
//!
//! Every message is `magic u32 | kind u8 | payload_len u32` (little
//! endian) followed by the payload. Frame payloads carry one complete
//! JPEG bitstream each; ping payloads carry an 8-byte monotonic-millis
//! timestamp that the pong echoes back. Control payloads are opaque to
//! the server. No framing-level compression.
//!
//! The opening handshake is a Hello in each direction carrying the
//! protocol version.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StreamError;

/// `"SCS1"` little-endian.
pub const MAGIC: u32 = u32::from_le_bytes(*b"SCS1");

/// Bytes before the payload: magic + kind + payload length.
pub const HEADER_LENGTH: usize = 9;

/// Upper bound on a single wire frame's payload. Generously above any
/// JPEG the encoder produces at 4K.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Protocol version carried in the Hello payload.
pub const PROTOCOL_VERSION: u8 = 1;

// ── MessageKind ──────────────────────────────────────────────────

/// Discriminant of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Handshake, both directions.
    Hello = 1,
    /// One encoded video frame, server to client.
    Frame = 2,
    /// Latency probe.
    Ping = 3,
    /// Latency probe echo.
    Pong = 4,
    /// Opaque client control payload.
    Control = 5,
    /// Orderly shutdown of one side.
    Close = 6,
}

impl TryFrom<u8> for MessageKind {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self, StreamError> {
        match value {
            1 => Ok(MessageKind::Hello),
            2 => Ok(MessageKind::Frame),
            3 => Ok(MessageKind::Ping),
            4 => Ok(MessageKind::Pong),
            5 => Ok(MessageKind::Control),
            6 => Ok(MessageKind::Close),
            other => Err(StreamError::UnknownKind(other)),
        }
    }
}

// ── Message ──────────────────────────────────────────────────────

/// A single wire message.
///
/// `payload` is refcounted so a broadcast frame can sit in many
/// outbound queues without copying the bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Message {
    /// Handshake message carrying the protocol version.
    pub fn hello() -> Self {
        Self {
            kind: MessageKind::Hello,
            payload: Bytes::from_static(&[PROTOCOL_VERSION]),
        }
    }

    /// Video frame message wrapping an already-shared payload.
    pub fn frame(payload: Bytes) -> Self {
        Self {
            kind: MessageKind::Frame,
            payload,
        }
    }

    /// Latency probe carrying `timestamp_ms`.
    pub fn ping(timestamp_ms: u64) -> Self {
        Self {
            kind: MessageKind::Ping,
            payload: Bytes::copy_from_slice(&timestamp_ms.to_le_bytes()),
        }
    }

    /// Echo of a ping's payload.
    pub fn pong(payload: Bytes) -> Self {
        Self {
            kind: MessageKind::Pong,
            payload,
        }
    }

    /// Orderly close.
    pub fn close() -> Self {
        Self {
            kind: MessageKind::Close,
            payload: Bytes::new(),
        }
    }

    /// The timestamp of a ping/pong payload, if well-formed.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.payload
            .get(..8)
            .map(|b| u64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }
}

// ── StreamCodec ──────────────────────────────────────────────────

/// Length-delimited codec for [`Message`]s.
#[derive(Debug, Default)]
pub struct StreamCodec;

impl Decoder for StreamCodec {
    type Item = Message;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, StreamError> {
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LENGTH];
        let magic = header.get_u32_le();
        if magic != MAGIC {
            return Err(StreamError::InvalidMagic);
        }
        let kind = MessageKind::try_from(header.get_u8())?;
        let payload_len = header.get_u32_le() as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(StreamError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if src.len() < HEADER_LENGTH + payload_len {
            // Reserve for the rest of the frame in one go.
            src.reserve(HEADER_LENGTH + payload_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LENGTH);
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Message { kind, payload }))
    }
}

impl Encoder<Message> for StreamCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), StreamError> {
        if item.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(StreamError::FrameTooLarge {
                size: item.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(HEADER_LENGTH + item.payload.len());
        dst.put_u32_le(MAGIC);
        dst.put_u8(item.kind as u8);
        dst.put_u32_le(item.payload.len() as u32);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) -> Message {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn frame_roundtrip() {
        let payload = Bytes::from(vec![0xAB; 5000]);
        let decoded = roundtrip(Message::frame(payload.clone()));
        assert_eq!(decoded.kind, MessageKind::Frame);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn hello_carries_version() {
        let decoded = roundtrip(Message::hello());
        assert_eq!(decoded.kind, MessageKind::Hello);
        assert_eq!(decoded.payload.as_ref(), &[PROTOCOL_VERSION]);
    }

    #[test]
    fn ping_pong_echo_timestamp() {
        let ping = Message::ping(123_456);
        assert_eq!(ping.timestamp_ms(), Some(123_456));

        let pong = Message::pong(ping.payload.clone());
        let decoded = roundtrip(pong);
        assert_eq!(decoded.kind, MessageKind::Pong);
        assert_eq!(decoded.timestamp_ms(), Some(123_456));
    }

    #[test]
    fn partial_header_waits_for_more() {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::close(), &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..4]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn partial_payload_waits_for_more() {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::frame(Bytes::from(vec![1u8; 100])), &mut buf)
            .unwrap();

        let mut partial = BytesMut::from(&buf[..HEADER_LENGTH + 50]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&buf[HEADER_LENGTH + 50..]);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.payload.len(), 100);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(0xDEADBEEF);
        buf.put_u8(2);
        buf.put_u32_le(0);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StreamError::InvalidMagic)
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAGIC);
        buf.put_u8(99);
        buf.put_u32_le(0);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StreamError::UnknownKind(99))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAGIC);
        buf.put_u8(2);
        buf.put_u32_le((MAX_PAYLOAD_SIZE + 1) as u32);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StreamError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn back_to_back_messages_decode_in_order() {
        let mut codec = StreamCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::ping(1), &mut buf).unwrap();
        codec
            .encode(Message::frame(Bytes::from_static(b"jpeg")), &mut buf)
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind, MessageKind::Ping);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, MessageKind::Frame);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
