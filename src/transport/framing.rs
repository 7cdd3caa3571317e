//! Framed message codec shared with the host side
//!
//! Host-pushed messages are a sequence of length-prefixed UTF-16LE
//! segments: a `u32` little-endian byte length followed by that many
//! bytes of UTF-16LE text, repeated until the frame is exhausted. The
//! first segment names the command; the remaining segments are its
//! arguments.

use crate::error::{CacheError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Command announcing that the trailing segments are expired cache keys
pub const EXPIRE_COMMAND: &str = "expire";

/// Encode segments into a single frame
pub fn encode_segments<S: AsRef<str>>(segments: &[S]) -> Vec<u8> {
    let mut frame = BytesMut::new();

    for segment in segments {
        let text = segment.as_ref();
        let byte_length = text.encode_utf16().count() * 2;
        frame.put_u32_le(byte_length as u32);
        for unit in text.encode_utf16() {
            frame.put_u16_le(unit);
        }
    }

    frame.to_vec()
}

/// Decode a frame back into its segments
pub fn decode_segments(mut frame: &[u8]) -> Result<Vec<String>> {
    let mut segments = Vec::new();

    while frame.has_remaining() {
        if frame.remaining() < 4 {
            return Err(CacheError::Protocol(
                "truncated segment length prefix".to_string(),
            ));
        }
        let byte_length = frame.get_u32_le() as usize;
        if byte_length % 2 != 0 {
            return Err(CacheError::Protocol(format!(
                "segment length {} is not a whole number of UTF-16 units",
                byte_length
            )));
        }
        if frame.remaining() < byte_length {
            return Err(CacheError::Protocol(format!(
                "segment length {} exceeds remaining frame size {}",
                byte_length,
                frame.remaining()
            )));
        }

        let mut units = Vec::with_capacity(byte_length / 2);
        for _ in 0..byte_length / 2 {
            units.push(frame.get_u16_le());
        }
        segments.push(
            String::from_utf16(&units)
                .map_err(|_| CacheError::Protocol("segment is not valid UTF-16".to_string()))?,
        );
    }

    Ok(segments)
}

/// Encode a bare string as UTF-16LE bytes (discovery beacon format)
pub fn string_to_utf16le(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Decode bare UTF-16LE bytes back into a string
pub fn utf16le_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(CacheError::Protocol(
            "UTF-16 payload has an odd byte length".to_string(),
        ));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units)
        .map_err(|_| CacheError::Protocol("payload is not valid UTF-16".to_string()))
}
