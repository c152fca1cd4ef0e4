//! Bootstrap wire format (§4.7): a length-prefixed sender address/port
//! followed by an opaque, length-prefixed payload.
//!
//! ```text
//! msg_type:               1 byte (20-24)
//! request_id:             16 bytes
//! sender_address_length:  2 bytes, little-endian
//! sender_address:         UTF-8, <sender_address_length> bytes
//! sender_port:            2 bytes, little-endian
//! payload_length:         4 bytes, little-endian
//! payload:                <payload_length> bytes
//! ```

use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMessageType {
    BootstrapRequest = 20,
    BootstrapResponse = 21,
    PeerListRequest = 22,
    PeerListResponse = 23,
    NodeAnnouncement = 24,
}

impl BootstrapMessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            20 => Some(Self::BootstrapRequest),
            21 => Some(Self::BootstrapResponse),
            22 => Some(Self::PeerListRequest),
            23 => Some(Self::PeerListResponse),
            24 => Some(Self::NodeAnnouncement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMessage {
    pub msg_type: BootstrapMessageType,
    pub request_id: [u8; 16],
    pub sender_address: String,
    pub sender_port: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapCodecError {
    Truncated,
    UnknownMessageType(u8),
    InvalidUtf8,
}

impl fmt::Display for BootstrapCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapCodecError::Truncated => write!(f, "bootstrap message truncated"),
            BootstrapCodecError::UnknownMessageType(b) => write!(f, "unknown bootstrap msg_type {b}"),
            BootstrapCodecError::InvalidUtf8 => write!(f, "sender_address is not valid utf-8"),
        }
    }
}

impl std::error::Error for BootstrapCodecError {}

impl BootstrapMessage {
    pub fn new(
        msg_type: BootstrapMessageType,
        sender_address: impl Into<String>,
        sender_port: u16,
        payload: Vec<u8>,
    ) -> Self {
        let mut request_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut request_id);
        Self {
            msg_type,
            request_id,
            sender_address: sender_address.into(),
            sender_port,
            payload,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let addr_bytes = self.sender_address.as_bytes();
        let mut buf = BytesMut::with_capacity(1 + 16 + 2 + addr_bytes.len() + 2 + 4 + self.payload.len());
        buf.put_u8(self.msg_type as u8);
        buf.put_slice(&self.request_id);
        buf.put_u16_le(addr_bytes.len() as u16);
        buf.put_slice(addr_bytes);
        buf.put_u16_le(self.sender_port);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, BootstrapCodecError> {
        if bytes.len() < 1 + 16 + 2 {
            return Err(BootstrapCodecError::Truncated);
        }
        let msg_type_byte = bytes.get_u8();
        let msg_type = BootstrapMessageType::from_u8(msg_type_byte)
            .ok_or(BootstrapCodecError::UnknownMessageType(msg_type_byte))?;

        let mut request_id = [0u8; 16];
        bytes.copy_to_slice(&mut request_id);

        let addr_len = bytes.get_u16_le() as usize;
        if bytes.remaining() < addr_len + 2 + 4 {
            return Err(BootstrapCodecError::Truncated);
        }
        let sender_address =
            String::from_utf8(bytes[..addr_len].to_vec()).map_err(|_| BootstrapCodecError::InvalidUtf8)?;
        bytes.advance(addr_len);

        let sender_port = bytes.get_u16_le();
        let payload_len = bytes.get_u32_le() as usize;
        if bytes.remaining() < payload_len {
            return Err(BootstrapCodecError::Truncated);
        }
        let payload = bytes[..payload_len].to_vec();

        Ok(Self {
            msg_type,
            request_id,
            sender_address,
            sender_port,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let msg = BootstrapMessage::new(
            BootstrapMessageType::NodeAnnouncement,
            "198.51.100.7",
            9000,
            b"198.51.100.7:9000".to_vec(),
        );
        let encoded = msg.encode();
        let decoded = BootstrapMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn truncated_is_rejected() {
        let msg = BootstrapMessage::new(BootstrapMessageType::BootstrapRequest, "h", 1, vec![]);
        let encoded = msg.encode();
        assert!(BootstrapMessage::decode(&encoded[..encoded.len() - 1]).is_err());
    }
}
