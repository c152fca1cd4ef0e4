//! DHT message codec (§4.6): a fixed-size, little-endian prefix followed by
//! a variable payload.
//!
//! ```text
//! msg_type:        1 byte
//! request_id:      16 bytes, random
//! sender_id:       32 bytes
//! payload_length:  4 bytes, little-endian
//! payload:         <payload_length> bytes
//! ```

use super::node_id::NodeId;
use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtMessageType {
    Ping = 10,
    Pong = 11,
    FindNode = 12,
    FindNodeResponse = 13,
    /// Reserved, unimplemented — see the spec's open design points.
    Store = 14,
    /// Reserved, unimplemented — see the spec's open design points.
    StoreResponse = 15,
}

impl DhtMessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            10 => Some(Self::Ping),
            11 => Some(Self::Pong),
            12 => Some(Self::FindNode),
            13 => Some(Self::FindNodeResponse),
            14 => Some(Self::Store),
            15 => Some(Self::StoreResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub msg_type: DhtMessageType,
    pub request_id: [u8; 16],
    pub sender_id: NodeId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtCodecError {
    Truncated,
    UnknownMessageType(u8),
}

impl std::fmt::Display for DhtCodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DhtCodecError::Truncated => write!(f, "dht message truncated"),
            DhtCodecError::UnknownMessageType(b) => write!(f, "unknown dht msg_type {b}"),
        }
    }
}

impl std::error::Error for DhtCodecError {}

impl DhtMessage {
    pub fn new(msg_type: DhtMessageType, sender_id: NodeId, payload: Vec<u8>) -> Self {
        let mut request_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut request_id);
        Self {
            msg_type,
            request_id,
            sender_id,
            payload,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1 + 16 + 32 + 4 + self.payload.len());
        buf.put_u8(self.msg_type as u8);
        buf.put_slice(&self.request_id);
        buf.put_slice(self.sender_id.as_bytes());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, DhtCodecError> {
        if bytes.len() < 1 + 16 + 32 + 4 {
            return Err(DhtCodecError::Truncated);
        }
        let msg_type_byte = bytes.get_u8();
        let msg_type =
            DhtMessageType::from_u8(msg_type_byte).ok_or(DhtCodecError::UnknownMessageType(msg_type_byte))?;

        let mut request_id = [0u8; 16];
        bytes.copy_to_slice(&mut request_id);

        let mut sender_id_bytes = [0u8; 32];
        bytes.copy_to_slice(&mut sender_id_bytes);

        let payload_len = bytes.get_u32_le() as usize;
        if bytes.remaining() < payload_len {
            return Err(DhtCodecError::Truncated);
        }
        let payload = bytes[..payload_len].to_vec();

        Ok(Self {
            msg_type,
            request_id,
            sender_id: NodeId(sender_id_bytes),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let msg = DhtMessage::new(DhtMessageType::FindNode, NodeId::random(), b"target".to_vec());
        let encoded = msg.encode();
        let decoded = DhtMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn truncated_is_rejected() {
        let msg = DhtMessage::new(DhtMessageType::Ping, NodeId::random(), vec![]);
        let encoded = msg.encode();
        assert!(DhtMessage::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut bytes = vec![99u8];
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            DhtMessage::decode(&bytes),
            Err(DhtCodecError::UnknownMessageType(99))
        ));
    }
}
