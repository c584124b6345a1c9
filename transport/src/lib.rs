//! Typed binary frames carried over a WebSocket connection.
//!
//! A frame is a 5-byte packed header — one byte of [`FrameCode`] followed by a
//! little-endian `u32` cargo length — followed by exactly that many bytes of
//! cargo. [`Parser`] reassembles frames from an arbitrary, possibly fragmented,
//! sequence of byte chunks: it does not assume one WebSocket message carries
//! exactly one frame, nor that one frame arrives in a single message.

#![forbid(unsafe_code)]

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size in bytes of the fixed frame header (1-byte code + 4-byte little-endian length).
pub const HEADER_LEN: usize = 5;

/// The frame type tag. Values are fixed by the wire contract, not renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameCode {
    Ident = 1,
    Log = 2,
    Update = 5,
    AppData = 6,
    Panic = 7,
    Stats = 8,
    Uplink = 9,
    Error = 255,
}

impl FrameCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Ident),
            2 => Some(Self::Log),
            5 => Some(Self::Update),
            6 => Some(Self::AppData),
            7 => Some(Self::Panic),
            8 => Some(Self::Stats),
            9 => Some(Self::Uplink),
            255 => Some(Self::Error),
            _ => None,
        }
    }
}

/// A complete, decoded Transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: FrameCode,
    pub cargo: Vec<u8>,
}

impl Frame {
    pub fn new(code: FrameCode, cargo: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            cargo: cargo.into(),
        }
    }

    /// Serialize header + cargo into a single contiguous buffer ready to hand
    /// to a WebSocket sink as one binary message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.cargo.len());
        buf.put_u8(self.code as u8);
        buf.put_u32_le(self.cargo.len() as u32);
        buf.extend_from_slice(&self.cargo);
        buf
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport frame code {0} is not recognized")]
    UnknownCode(u8),
    #[error("transport cargo length {0} exceeds the configured maximum of {1}")]
    TooLarge(u32, u32),
}

/// Incremental frame reassembler. Feed it chunks of arbitrary size via
/// [`Parser::push`]; it returns every frame that became complete as a result
/// of that push, buffering the remainder (possibly just a partial header)
/// internally.
pub struct Parser {
    buf: BytesMut,
    max_cargo_len: u32,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            max_cargo_len: u32::MAX,
        }
    }

    /// Reject frames whose cargo declares a length above `max`. Guards
    /// against a corrupt or hostile header turning into an unbounded
    /// allocation while frames are buffered.
    pub fn with_max_cargo_len(max: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            max_cargo_len: max,
        }
    }

    /// Feed the next chunk of bytes (one WebSocket message, or a slice of
    /// one) and drain any frames that are now complete.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, TransportError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let code_byte = self.buf[0];
            let length = u32::from_le_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
            if length > self.max_cargo_len {
                log::warn!("transport cargo length {length} exceeds max {}", self.max_cargo_len);
                return Err(TransportError::TooLarge(length, self.max_cargo_len));
            }
            let total = HEADER_LEN + length as usize;
            if self.buf.len() < total {
                break;
            }
            let code = FrameCode::from_u8(code_byte).ok_or_else(|| {
                log::warn!("unrecognized transport frame code {code_byte}");
                TransportError::UnknownCode(code_byte)
            })?;
            let mut raw = self.buf.split_to(total);
            raw.advance(HEADER_LEN);
            log::trace!("decoded {code:?} frame, {length} bytes of cargo");
            frames.push(Frame {
                code,
                cargo: raw.to_vec(),
            });
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame::new(FrameCode::Log, b"hello".to_vec());
        let wire = frame.encode();
        let mut parser = Parser::new();
        let decoded = parser.push(&wire).unwrap();
        assert_eq!(decoded, vec![frame]);
    }

    #[test]
    fn reassembles_a_frame_split_across_two_pushes() {
        // LOG frame carrying "HI!" split mid-header and mid-cargo.
        let mut parser = Parser::new();
        let first = parser.push(&[0x02, 0x03, 0x00, 0x00, 0x00, b'H', b'I']).unwrap();
        assert!(first.is_empty());
        let second = parser.push(&[b'!']).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].code, FrameCode::Log);
        assert_eq!(second[0].cargo, b"HI!");
    }

    #[test]
    fn parses_multiple_frames_delivered_in_one_chunk() {
        let a = Frame::new(FrameCode::Ident, b"a".to_vec());
        let b = Frame::new(FrameCode::Stats, b"bb".to_vec());
        let mut wire = a.encode();
        wire.extend(b.encode());

        let mut parser = Parser::new();
        let frames = parser.push(&wire).unwrap();
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn push_is_idempotent_over_concatenation() {
        let a = Frame::new(FrameCode::Panic, b"oops".to_vec());
        let b = Frame::new(FrameCode::Update, b"blob".to_vec());
        let mut wire = a.encode();
        wire.extend(b.encode());

        let (left, right) = wire.split_at(wire.len() / 2);

        let mut split = Parser::new();
        let mut split_frames = split.push(left).unwrap();
        split_frames.extend(split.push(right).unwrap());

        let mut whole = Parser::new();
        let whole_frames = whole.push(&wire).unwrap();

        assert_eq!(split_frames, whole_frames);
        assert_eq!(whole_frames, vec![a, b]);
    }

    #[test]
    fn unknown_code_is_reported() {
        let mut parser = Parser::new();
        let err = parser.push(&[0x42, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, TransportError::UnknownCode(0x42)));
    }

    #[test]
    fn oversized_cargo_is_rejected_before_buffering_the_body() {
        let mut parser = Parser::with_max_cargo_len(4);
        let err = parser.push(&[0x02, 0x05, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, TransportError::TooLarge(5, 4)));
    }
}
