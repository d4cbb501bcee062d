//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol. Everything here is
//! pure except the stream helpers at the bottom, which endpoint clients use
//! over blocking sockets.
//!
//! ## Wire Format
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────┐
//! │ HdrLen (2)   │ JSON header (HdrLen) │ Payload              │
//! │ u16 BE       │ UTF-8                │ content-length bytes │
//! └──────────────┴──────────────────────┴──────────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::Bytes;

use crate::error::{HubError, Result};
use super::{Header, Message};

/// Size of the header-length prefix
pub const HEADER_LENGTH_SIZE: usize = 2;

/// Largest JSON header the u16 prefix can describe
pub const MAX_HEADER_SIZE: usize = u16::MAX as usize;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Result of an incremental decode step
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// The buffer does not hold enough bytes yet. Not an error.
    NeedMore,
    Complete(T),
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a frame: u16 BE header length + JSON header + payload
pub fn encode(header: &Header, payload: &[u8]) -> Result<Vec<u8>> {
    if header.content_length != payload.len() {
        return Err(HubError::Protocol(format!(
            "content-length {} does not match payload of {} bytes",
            header.content_length,
            payload.len()
        )));
    }

    let header_bytes = serde_json::to_vec(header)?;
    if header_bytes.len() > MAX_HEADER_SIZE {
        return Err(HubError::FrameTooLarge(format!(
            "header of {} bytes (max {})",
            header_bytes.len(),
            MAX_HEADER_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LENGTH_SIZE + header_bytes.len() + payload.len());
    frame.extend_from_slice(&(header_bytes.len() as u16).to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);

    Ok(frame)
}

/// Encode a decoded message back into a frame, payload untouched
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    encode(&message.header, message.payload())
}

// =============================================================================
// Incremental Decoding
// =============================================================================

/// Read the header-length prefix.
///
/// Consumes exactly two bytes once they are available and returns the rest.
pub fn decode_header_length(buf: &[u8]) -> Option<(u16, &[u8])> {
    if buf.len() < HEADER_LENGTH_SIZE {
        return None;
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]);
    Some((len, &buf[HEADER_LENGTH_SIZE..]))
}

/// Parse a `len`-byte JSON header from the front of `buf`
pub fn decode_header(buf: &[u8], len: usize) -> Result<Decoded<Header>> {
    if buf.len() < len {
        return Ok(Decoded::NeedMore);
    }

    let text = std::str::from_utf8(&buf[..len])
        .map_err(|e| HubError::Protocol(format!("Header is not UTF-8: {}", e)))?;

    let header: Header = serde_json::from_str(text)
        .map_err(|e| HubError::Protocol(format!("Malformed header: {}", e)))?;

    if header.content_length > MAX_PAYLOAD_SIZE {
        return Err(HubError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            header.content_length, MAX_PAYLOAD_SIZE
        )));
    }

    Ok(Decoded::Complete(header))
}

/// Slice `len` payload bytes from the front of `buf` once all are present
pub fn decode_payload(buf: &[u8], len: usize) -> Decoded<&[u8]> {
    if buf.len() < len {
        Decoded::NeedMore
    } else {
        Decoded::Complete(&buf[..len])
    }
}

/// Decode one whole frame from the front of `buf`.
///
/// Returns the message and the number of bytes it occupied.
pub fn decode_frame(buf: &[u8]) -> Result<Decoded<(Message, usize)>> {
    let (header_len, rest) = match decode_header_length(buf) {
        Some(parsed) => parsed,
        None => return Ok(Decoded::NeedMore),
    };
    let header_len = header_len as usize;

    let header = match decode_header(rest, header_len)? {
        Decoded::Complete(header) => header,
        Decoded::NeedMore => return Ok(Decoded::NeedMore),
    };

    let content_len = header.content_length;
    let payload = match decode_payload(&rest[header_len..], content_len) {
        Decoded::Complete(payload) => Bytes::copy_from_slice(payload),
        Decoded::NeedMore => return Ok(Decoded::NeedMore),
    };

    let consumed = HEADER_LENGTH_SIZE + header_len + content_len;
    Ok(Decoded::Complete((Message::from_parts(header, payload)?, consumed)))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete message from a blocking stream
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message> {
    let mut prefix = [0u8; HEADER_LENGTH_SIZE];
    reader.read_exact(&mut prefix)?;
    let header_len = u16::from_be_bytes(prefix) as usize;

    let mut header_bytes = vec![0u8; header_len];
    reader.read_exact(&mut header_bytes)?;
    let header = match decode_header(&header_bytes, header_len)? {
        Decoded::Complete(header) => header,
        Decoded::NeedMore => {
            return Err(HubError::Protocol("Truncated header".to_string()));
        }
    };

    let mut payload = vec![0u8; header.content_length];
    if !payload.is_empty() {
        reader.read_exact(&mut payload)?;
    }

    Message::from_parts(header, Bytes::from(payload))
}

/// Write a message to a blocking stream
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode_message(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
