use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Bytes before every payload: `"CM"` then the payload length as a
/// little-endian u32.
///
/// ```text
///  0    2                6
///  +----+----------------+-------------------+
///  | CM | len (u32 LE)   | payload (len)     |
///  +----+----------------+-------------------+
/// ```
pub const HEADER_SIZE: usize = 6;

pub const MAGIC: [u8; 2] = *b"CM";

/// Largest payload accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 << 20;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    len: usize,
}

impl FrameHeader {
    fn for_payload(payload: &[u8]) -> Result<Self> {
        u32::try_from(payload.len())
            .map(|_| Self { len: payload.len() })
            .map_err(|_| FrameError::MessageTooLarge {
                size: payload.len(),
                max: u32::MAX as usize,
            })
    }

    /// Read a header from the front of `bytes` without consuming it.
    fn peek(bytes: &[u8]) -> Result<Option<Self>> {
        let Some(header) = bytes.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let (magic, len) = header.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(len);
        Ok(Some(Self {
            len: u32::from_le_bytes(len_bytes) as usize,
        }))
    }

    fn put(self, dst: &mut BytesMut) {
        dst.put_slice(&MAGIC);
        dst.put_u32_le(self.len as u32);
    }

    fn frame_len(self) -> usize {
        HEADER_SIZE + self.len
    }
}

/// Append `payload` to `dst` as one frame.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::for_payload(payload)?;
    dst.reserve(header.frame_len());
    header.put(dst);
    dst.extend_from_slice(payload);
    Ok(())
}

/// Split the next complete payload off the front of `src`.
///
/// `Ok(None)` leaves `src` untouched until more bytes arrive. A bad magic or
/// an announced length above `max_payload` is an error, and the stream cannot
/// be resynchronized after it.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    let Some(header) = FrameHeader::peek(src)? else {
        return Ok(None);
    };
    if header.len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: header.len,
            max: max_payload,
        });
    }

    if let Some(missing) = header.frame_len().checked_sub(src.len()).filter(|n| *n > 0) {
        src.reserve(missing);
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(header.len).freeze()))
}

/// Frame size limits shared by readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(buf: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(buf, DEFAULT_MAX_PAYLOAD)
    }

    #[test]
    fn header_layout_is_magic_then_le_length() {
        let mut buf = BytesMut::new();
        encode_frame(b"abc", &mut buf).unwrap();
        assert_eq!(&buf[..], b"CM\x03\x00\x00\x00abc");
    }

    #[test]
    fn partial_input_is_left_in_place() {
        let mut buf = BytesMut::from(&b"CM\x00"[..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);

        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn wrong_magic_desyncs() {
        let mut buf = BytesMut::from(&b"XX\x00\x00\x00\x00"[..]);
        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
        assert!(err.is_desync());
    }

    #[test]
    fn announced_length_over_limit_desyncs() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(64);

        let err = decode_frame(&mut buf, 32).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, max: 32 }));
        assert!(err.is_desync());
    }

    #[test]
    fn consecutive_frames_including_empty() {
        let mut buf = BytesMut::new();
        for payload in [&b"first"[..], b"", b"third"] {
            encode_frame(payload, &mut buf).unwrap();
        }

        let frames: Vec<Bytes> = std::iter::from_fn(|| decode(&mut buf).unwrap()).collect();
        assert_eq!(frames, vec![&b"first"[..], b"", b"third"]);
        assert!(buf.is_empty());
    }
}
