//! Framing for write-ahead log records.
//!
//! Each record is a JSON payload wrapped in a checksummed frame:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! A log file starts with [`MAGIC`] followed by the frame version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Frame format version.
const FRAME_VERSION: u8 = 1;

/// Upper bound on a single payload. Entity snapshots are small; anything larger is corruption.
const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Magic bytes identifying an entity log file.
pub const MAGIC: [u8; 4] = *b"ECNL";

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Serializes `value` into a checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n as usize <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| invalid(format!("payload of {} bytes is too large", payload.len())))?;

    let mut frame = Vec::with_capacity(payload.len() + 9);
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(frame)
}

/// Reads one frame and deserializes its payload.
///
/// # Errors
/// - `UnexpectedEof` if the frame is cut short (a torn tail write)
/// - `InvalidData` on version mismatch, oversize length, checksum mismatch or bad JSON
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut head = [0u8; 5];
    reader.read_exact(&mut head)?;
    if head[0] != FRAME_VERSION {
        return Err(invalid(format!(
            "unsupported frame version {} (expected {FRAME_VERSION})",
            head[0]
        )));
    }

    let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(invalid(format!(
            "frame length {len} exceeds maximum {MAX_PAYLOAD_LEN}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let mut crc = [0u8; 4];
    reader.read_exact(&mut crc)?;

    let stored = u32::from_le_bytes(crc);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&payload).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Writes the log file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])
}

/// Reads and validates the log file header, returning its frame version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {:?}",
            &header[..4]
        )));
    }
    Ok(header[4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_decodes_payload() {
        let frame = encode(&"hello".to_string()).unwrap();
        assert_eq!(frame[0], FRAME_VERSION);

        let decoded: String = decode(&mut Cursor::new(frame)).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn test_detects_corruption() {
        let mut frame = encode(&"test data".to_string()).unwrap();
        frame[7] ^= 0xFF;

        let err = decode::<String>(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut bad = vec![FRAME_VERSION];
        bad.extend_from_slice(&(20_000_000u32).to_le_bytes());

        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_truncated_frame_is_unexpected_eof() {
        let frame = encode(&"partial".to_string()).unwrap();
        let mut cursor = Cursor::new(frame[..frame.len() - 2].to_vec());
        let err = decode::<String>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), FRAME_VERSION);

        let err = read_header(&mut Cursor::new(b"KYRO\x01".to_vec())).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }
}
