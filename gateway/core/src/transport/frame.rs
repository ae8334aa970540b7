//! Frame Codec
//!
//! Wire format shared by every byte-oriented transport: length-prefixed JSON
//! with a CRC32 checksum over the payload.
//!
//! # Frame Layout
//!
//! ```text
//! +----------------+----------------+-----------------------------------+
//! | Length (4)     | Checksum (4)   | JSON payload (variable)           |
//! | big-endian u32 | CRC32, BE      | one ClientEvent or ServerEvent    |
//! +----------------+----------------+-----------------------------------+
//! ```
//!
//! Length counts payload bytes only. The checksum covers the payload and is
//! verified before deserialization; a mismatch means the stream is corrupt
//! and cannot be resynchronized, so callers drop the connection.
//!
//! The length field is validated against [`MAX_FRAME_SIZE`] before any
//! buffer grows, so a hostile peer cannot force a large allocation with a
//! fabricated header.

use serde::{de::DeserializeOwned, Serialize};

use super::TransportError;

/// Largest accepted frame payload (10 MiB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Length field plus checksum field
pub const HEADER_SIZE: usize = 8;

/// Initial decoder buffer capacity
const MIN_BUFFER_CAPACITY: usize = 4096;

#[inline]
fn checksum_of(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Parsed frame header
#[derive(Clone, Copy, Debug)]
struct Header {
    payload_len: usize,
    checksum: u32,
}

impl Header {
    /// Parse from the first [`HEADER_SIZE`] bytes of `bytes`
    fn parse(bytes: &[u8]) -> Self {
        let payload_len =
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let checksum = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self {
            payload_len,
            checksum,
        }
    }
}

/// Encode one event into a ready-to-write frame
///
/// # Errors
///
/// Returns [`TransportError::Codec`] when serialization fails or when the
/// payload would exceed [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(event: &T) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(event).map_err(|e| TransportError::Codec(e.to_string()))?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Codec(format!(
            "frame payload of {} bytes exceeds maximum {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&checksum_of(&payload).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Stateless encoder handle
#[derive(Debug, Default)]
pub struct FrameEncoder;

impl FrameEncoder {
    /// Create an encoder
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encode one event into a frame
    pub fn encode<T: Serialize>(&self, event: &T) -> Result<Vec<u8>, TransportError> {
        encode(event)
    }
}

/// Streaming frame decoder
///
/// Feed it raw reads with [`push`](Self::push), then drain complete events
/// with [`decode`](Self::decode). Partial frames stay buffered across calls,
/// so arbitrary read fragmentation is fine.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset of the first unconsumed byte
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with default capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append raw bytes from the transport
    pub fn push(&mut self, data: &[u8]) {
        // Reclaim consumed space once it dominates the buffer.
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Unconsumed bytes currently buffered
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next buffered frame
    ///
    /// - `Ok(Some(event))` when a complete, verified frame was consumed
    /// - `Ok(None)` when more bytes are needed
    /// - `Err(TransportError::ChecksumMismatch)` on payload corruption
    /// - `Err(TransportError::Codec)` on an invalid length or payload
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        if self.available() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::parse(&self.buffer[self.read_pos..self.read_pos + HEADER_SIZE]);
        if header.payload_len > MAX_FRAME_SIZE {
            return Err(TransportError::Codec(format!(
                "frame header claims {} bytes, maximum is {MAX_FRAME_SIZE}",
                header.payload_len
            )));
        }

        if self.available() < HEADER_SIZE + header.payload_len {
            return Ok(None);
        }

        let payload_start = self.read_pos + HEADER_SIZE;
        let payload_end = payload_start + header.payload_len;
        let payload = &self.buffer[payload_start..payload_end];

        let actual = checksum_of(payload);
        if actual != header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let event =
            serde_json::from_slice(payload).map_err(|e| TransportError::Codec(e.to_string()))?;
        self.read_pos = payload_end;
        Ok(Some(event))
    }

    /// Discard all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}
