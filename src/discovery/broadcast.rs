//! UDP broadcast announcement (§4.8): a fixed-layout packet (magic, version,
//! message type, node id, listen port, services, timestamp, checksum — 59
//! bytes total) sent every 30 s and aged out after 120 s of silence.

use crate::dht::NodeId;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;

pub const MAGIC: &[u8; 4] = b"EAST";
pub const VERSION: u32 = 1;
pub const PACKET_SIZE: usize = 4 + 4 + 1 + 32 + 2 + 4 + 8 + 4;
pub const SEND_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_AGE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMessageType {
    Announce = 1,
    Response = 2,
    Goodbye = 3,
}

impl BroadcastMessageType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Announce),
            2 => Some(Self::Response),
            3 => Some(Self::Goodbye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    WrongSize(usize),
    BadMagic,
    BadVersion(u32),
    UnknownMessageType(u8),
    ChecksumMismatch,
}

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastError::WrongSize(n) => write!(f, "expected {PACKET_SIZE} bytes, got {n}"),
            BroadcastError::BadMagic => write!(f, "bad magic"),
            BroadcastError::BadVersion(v) => write!(f, "unsupported version {v}"),
            BroadcastError::UnknownMessageType(b) => write!(f, "unknown broadcast msg_type {b}"),
            BroadcastError::ChecksumMismatch => write!(f, "checksum mismatch"),
        }
    }
}

impl std::error::Error for BroadcastError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncePacket {
    pub message_type: BroadcastMessageType,
    pub node_id: NodeId,
    pub listen_port: u16,
    pub services: u32,
    pub timestamp_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl AnnouncePacket {
    pub fn announce(node_id: NodeId, listen_port: u16, services: u32) -> Self {
        Self {
            message_type: BroadcastMessageType::Announce,
            node_id,
            listen_port,
            services,
            timestamp_ms: now_ms(),
        }
    }

    pub fn goodbye(node_id: NodeId, listen_port: u16) -> Self {
        Self {
            message_type: BroadcastMessageType::Goodbye,
            node_id,
            listen_port,
            services: 0,
            timestamp_ms: now_ms(),
        }
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u8(self.message_type as u8);
        buf.put_slice(self.node_id.as_bytes());
        buf.put_u16_le(self.listen_port);
        buf.put_u32_le(self.services);
        buf.put_u64_le(self.timestamp_ms);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        let mut out = [0u8; PACKET_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BroadcastError> {
        if bytes.len() != PACKET_SIZE {
            return Err(BroadcastError::WrongSize(bytes.len()));
        }

        let (body, checksum_bytes) = bytes.split_at(PACKET_SIZE - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(BroadcastError::ChecksumMismatch);
        }

        let mut cursor = body;
        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(BroadcastError::BadMagic);
        }

        let version = cursor.get_u32_le();
        if version != VERSION {
            return Err(BroadcastError::BadVersion(version));
        }

        let message_type_byte = cursor.get_u8();
        let message_type = BroadcastMessageType::from_u8(message_type_byte)
            .ok_or(BroadcastError::UnknownMessageType(message_type_byte))?;

        let mut node_id_bytes = [0u8; 32];
        cursor.copy_to_slice(&mut node_id_bytes);

        let listen_port = cursor.get_u16_le();
        let services = cursor.get_u32_le();
        let timestamp_ms = cursor.get_u64_le();

        Ok(Self {
            message_type,
            node_id: NodeId(node_id_bytes),
            listen_port,
            services,
            timestamp_ms,
        })
    }
}

struct SeenPeer {
    addr: SocketAddr,
    last_seen_ms: u64,
}

/// Tracks announcements seen over the LAN broadcast channel, aging entries
/// out after [`MAX_AGE`].
pub struct BroadcastDiscovery {
    socket: UdpSocket,
    seen: Mutex<HashMap<NodeId, SeenPeer>>,
}

impl BroadcastDiscovery {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            seen: Mutex::new(HashMap::new()),
        })
    }

    pub async fn send_to(&self, packet: &AnnouncePacket, target: SocketAddr) -> std::io::Result<()> {
        self.socket.send_to(&packet.encode(), target).await?;
        Ok(())
    }

    /// Receive one packet, validate it, and record the sender unless it was
    /// a GOODBYE (which instead removes the sender immediately).
    pub async fn recv_one(&self) -> std::io::Result<Option<(AnnouncePacket, SocketAddr)>> {
        let mut buf = [0u8; PACKET_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        if len != PACKET_SIZE {
            return Ok(None);
        }
        let Ok(packet) = AnnouncePacket::decode(&buf) else {
            return Ok(None);
        };

        match packet.message_type {
            BroadcastMessageType::Goodbye => {
                self.seen.lock().remove(&packet.node_id);
            }
            _ => {
                self.seen.lock().insert(
                    packet.node_id,
                    SeenPeer {
                        addr: from,
                        last_seen_ms: now_ms(),
                    },
                );
            }
        }

        Ok(Some((packet, from)))
    }

    /// Snapshot of currently-live peers, aged out at [`MAX_AGE`].
    pub fn live_peers(&self) -> Vec<(NodeId, SocketAddr)> {
        let now = now_ms();
        self.seen
            .lock()
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.last_seen_ms) < MAX_AGE.as_millis() as u64)
            .map(|(id, p)| (*id, p.addr))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let packet = AnnouncePacket::announce(NodeId::random(), 9000, 0b1);
        let encoded = packet.encode();
        assert_eq!(encoded.len(), PACKET_SIZE);
        let decoded = AnnouncePacket::decode(&encoded).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn wrong_size_is_rejected() {
        let packet = AnnouncePacket::announce(NodeId::random(), 9000, 0);
        let encoded = packet.encode();
        assert!(AnnouncePacket::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let packet = AnnouncePacket::announce(NodeId::random(), 9000, 0);
        let mut encoded = packet.encode();
        encoded[10] ^= 0xFF;
        assert_eq!(
            AnnouncePacket::decode(&encoded),
            Err(BroadcastError::ChecksumMismatch)
        );
    }

    #[tokio::test]
    async fn send_recv_over_loopback() {
        let a = BroadcastDiscovery::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = BroadcastDiscovery::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();

        let id = NodeId::random();
        let packet = AnnouncePacket::announce(id, 9000, 0);
        a.send_to(&packet, b_addr).await.unwrap();

        let (received, _) = b.recv_one().await.unwrap().unwrap();
        assert_eq!(received.node_id, id);
        assert_eq!(b.live_peers().len(), 1);
    }

    #[tokio::test]
    async fn goodbye_removes_peer() {
        let a = BroadcastDiscovery::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = BroadcastDiscovery::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();

        let id = NodeId::random();
        a.send_to(&AnnouncePacket::announce(id, 9000, 0), b_addr).await.unwrap();
        b.recv_one().await.unwrap();
        assert_eq!(b.live_peers().len(), 1);

        a.send_to(&AnnouncePacket::goodbye(id, 9000), b_addr).await.unwrap();
        b.recv_one().await.unwrap();
        assert_eq!(b.live_peers().len(), 0);
    }
}
