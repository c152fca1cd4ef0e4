//! Framed transport (C2): a fixed 15-byte header followed by an opaque
//! payload, as specified in §3/§4.2.
//!
//! ```text
//! magic:         4 bytes, little-endian, constant 0x534F4C41 ("SOLA")
//! version:       2 bytes, little-endian, currently 1
//! msg_type:      1 byte
//! payload_size:  4 bytes, little-endian, MUST be <= MAX_PAYLOAD_SIZE
//! checksum:      4 bytes, little-endian, first 4 bytes of SHA-256(payload)
//! payload:       <payload_size> bytes
//! ```

use crate::hash::sha256;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC: u32 = 0x534F_4C41;
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 4 + 2 + 1 + 4 + 4;
pub const MAX_PAYLOAD_SIZE: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    BadMagic,
    UnsupportedVersion(u16),
    PayloadTooLarge(u32),
    ChecksumMismatch,
    Io(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::BadMagic => write!(f, "invalid frame magic"),
            FrameError::UnsupportedVersion(v) => write!(f, "unsupported frame version {v}"),
            FrameError::PayloadTooLarge(n) => write!(f, "payload size {n} exceeds the 4096-byte cap"),
            FrameError::ChecksumMismatch => write!(f, "frame checksum mismatch"),
            FrameError::Io(e) => write!(f, "frame io error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        FrameError::Io(e.to_string())
    }
}

impl From<FrameError> for crate::error::NodeError {
    fn from(e: FrameError) -> Self {
        crate::error::NodeError::Decode(e.to_string())
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = sha256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Build the 15-byte header + payload for `msg_type`/`payload`. Returns
/// `PayloadTooLarge` if `payload.len() > MAX_PAYLOAD_SIZE`.
pub fn encode(msg_type: u8, payload: &[u8]) -> Result<BytesMut, FrameError> {
    if payload.len() as u64 > MAX_PAYLOAD_SIZE as u64 {
        return Err(FrameError::PayloadTooLarge(payload.len() as u32));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u8(msg_type);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&checksum(payload));
    buf.put_slice(payload);
    Ok(buf)
}

/// Read one frame from `stream`: 15-byte header, validate magic/version/size,
/// read the payload, recompute and compare the checksum.
pub async fn decode<S>(stream: &mut S) -> Result<(u8, Vec<u8>), FrameError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    let mut cursor: &[u8] = &header;
    let magic = cursor.get_u32_le();
    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let version = cursor.get_u16_le();
    if version != VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    let msg_type = cursor.get_u8();
    let payload_size = cursor.get_u32_le();
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload_size));
    }
    let mut header_checksum = [0u8; 4];
    header_checksum.copy_from_slice(cursor);

    let mut payload = vec![0u8; payload_size as usize];
    stream.read_exact(&mut payload).await?;

    if checksum(&payload) != header_checksum {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok((msg_type, payload))
}

/// Encode and write a frame to `sink` in one call.
pub async fn write_frame<S>(sink: &mut S, msg_type: u8, payload: &[u8]) -> Result<(), FrameError>
where
    S: AsyncWrite + Unpin,
{
    let buf = encode(msg_type, payload)?;
    sink.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip() {
        let encoded = encode(7, b"hello").unwrap();
        let mut cursor = std::io::Cursor::new(encoded.to_vec());
        let (msg_type, payload) = decode(&mut cursor).await.unwrap();
        assert_eq!(msg_type, 7);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn payload_at_cap_is_accepted() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE as usize];
        assert!(encode(1, &payload).is_ok());
    }

    #[test]
    fn payload_over_cap_is_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE as usize + 1];
        assert!(matches!(encode(1, &payload), Err(FrameError::PayloadTooLarge(_))));
    }

    #[test]
    fn empty_payload_is_accepted() {
        assert!(encode(1, &[]).is_ok());
    }

    #[tokio::test]
    async fn corrupted_checksum_is_rejected() {
        let mut encoded = encode(1, b"hello").unwrap().to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let mut cursor = std::io::Cursor::new(encoded);
        assert!(matches!(decode(&mut cursor).await, Err(FrameError::ChecksumMismatch)));
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let mut encoded = encode(1, b"hello").unwrap().to_vec();
        encoded[0] ^= 0xFF;
        let mut cursor = std::io::Cursor::new(encoded);
        assert!(matches!(decode(&mut cursor).await, Err(FrameError::BadMagic)));
    }
}
