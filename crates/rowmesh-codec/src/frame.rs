//! The binary frame layout.
//!
//! ```text
//! magic: str | version: i32 | type: str | sender: str | timestamp: i64 |
//! payload_len: i32 | payload: [u8; payload_len]
//! ```
//!
//! `str` is a big-endian `u16` byte length followed by UTF-8. All integers are
//! big-endian. The transport adds its own length prefix in front of this.

use bytes::{Buf, BufMut};
use rowmesh_core::error::CodecError;
use rowmesh_core::traits::Codec;
use rowmesh_core::types::{Frame, MessageType};

pub const DEFAULT_MAX_PAYLOAD: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
    max_frame: usize,
}

impl FrameCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    #[must_use]
    pub const fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    #[must_use]
    pub const fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.max_payload
    }

    #[must_use]
    pub const fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec<Frame> for FrameCodec {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        let payload_len = self.payload_len(frame.payload.len())?;
        let type_name = frame.message_type.as_str();

        let size = 2 + frame.magic.len()
            + 4
            + 2
            + type_name.len()
            + 2
            + frame.sender.len()
            + 8
            + 4
            + frame.payload.len();
        if size > self.max_frame {
            return Err(CodecError::MessageTooLarge {
                size,
                limit: self.max_frame,
            });
        }

        let mut buf = Vec::with_capacity(size);
        put_str(&mut buf, "magic", &frame.magic)?;
        buf.put_i32(frame.version);
        put_str(&mut buf, "type", type_name)?;
        put_str(&mut buf, "sender", &frame.sender)?;
        buf.put_i64(frame.timestamp);
        buf.put_i32(payload_len);
        buf.put_slice(&frame.payload);
        Ok(buf)
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, CodecError> {
        let mut buf = data;

        let magic = get_str(&mut buf, "magic")?;
        ensure(buf, "version", 4)?;
        let version = buf.get_i32();
        let message_type: MessageType = get_str(&mut buf, "type")?.parse()?;
        let sender = get_str(&mut buf, "sender")?;
        ensure(buf, "timestamp", 8)?;
        let timestamp = buf.get_i64();
        ensure(buf, "payload_len", 4)?;
        let raw_len = buf.get_i32();
        let len = usize::try_from(raw_len).map_err(|_| CodecError::NegativeLength(raw_len))?;
        if len > self.max_payload {
            return Err(CodecError::MessageTooLarge {
                size: len,
                limit: self.max_payload,
            });
        }
        ensure(buf, "payload", len)?;
        let payload = buf[..len].to_vec();
        buf.advance(len);

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        Ok(Frame {
            magic,
            version,
            message_type,
            sender,
            timestamp,
            payload,
        })
    }
}

impl FrameCodec {
    fn payload_len(&self, len: usize) -> Result<i32, CodecError> {
        if len > self.max_payload {
            return Err(CodecError::MessageTooLarge {
                size: len,
                limit: self.max_payload,
            });
        }
        i32::try_from(len).map_err(|_| CodecError::MessageTooLarge {
            size: len,
            limit: 0x7fff_ffff,
        })
    }
}

const fn ensure(buf: &[u8], field: &'static str, needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            field,
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, field: &'static str, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| {
        CodecError::EncodeFailed(format!("field '{field}' is {} bytes, limit is {}", s.len(), u16::MAX))
    })?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    ensure(*buf, field, 2)?;
    let len = usize::from(buf.get_u16());
    ensure(*buf, field, len)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| CodecError::InvalidUtf8(field))?
        .to_string();
    buf.advance(len);
    Ok(s)
}
