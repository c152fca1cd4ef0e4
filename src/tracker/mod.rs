//! Tracker (C10): a centralized fallback registry. A lightweight TCP server,
//! one request handled per connection, backed by a bounded, timeout-evicted
//! peer set.

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const HEADER_SIZE: usize = 37;
pub const PEER_ENTRY_SIZE: usize = 46;
pub const DEFAULT_MAX_PEERS: usize = 1000;
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMessageType {
    Announce = 1,
    GetPeers = 2,
    PeerList = 3,
    Heartbeat = 4,
    Error = 255,
}

impl TrackerMessageType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Announce),
            2 => Some(Self::GetPeers),
            3 => Some(Self::PeerList),
            4 => Some(Self::Heartbeat),
            255 => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerPeerEntry {
    pub ipv4: Ipv4Addr,
    pub port: u16,
    pub node_id: [u8; 32],
    pub last_seen: u64,
}

impl TrackerPeerEntry {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.ipv4.octets());
        buf.put_u16_le(self.port);
        buf.put_slice(&self.node_id);
        buf.put_u64_le(self.last_seen);
    }

    fn decode(bytes: &mut &[u8]) -> Option<Self> {
        if bytes.len() < PEER_ENTRY_SIZE {
            return None;
        }
        let mut ip_bytes = [0u8; 4];
        bytes.copy_to_slice(&mut ip_bytes);
        let port = bytes.get_u16_le();
        let mut node_id = [0u8; 32];
        bytes.copy_to_slice(&mut node_id);
        let last_seen = bytes.get_u64_le();
        Some(Self {
            ipv4: Ipv4Addr::from(ip_bytes),
            port,
            node_id,
            last_seen,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerMessage {
    pub message_type: TrackerMessageType,
    pub node_id: [u8; 32],
    pub port: u16,
    pub peers: Vec<TrackerPeerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCodecError {
    Truncated,
    UnknownMessageType(u8),
}

impl std::fmt::Display for TrackerCodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerCodecError::Truncated => write!(f, "tracker message truncated"),
            TrackerCodecError::UnknownMessageType(b) => write!(f, "unknown tracker message_type {b}"),
        }
    }
}

impl std::error::Error for TrackerCodecError {}

impl TrackerMessage {
    pub fn new(message_type: TrackerMessageType, node_id: [u8; 32], port: u16, peers: Vec<TrackerPeerEntry>) -> Self {
        Self {
            message_type,
            node_id,
            port,
            peers,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.peers.len() * PEER_ENTRY_SIZE);
        buf.put_u8(self.message_type as u8);
        buf.put_slice(&self.node_id);
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.peers.len() as u16);
        for peer in &self.peers {
            peer.encode(&mut buf);
        }
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, TrackerCodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(TrackerCodecError::Truncated);
        }
        let message_type_byte = bytes.get_u8();
        let message_type = TrackerMessageType::from_u8(message_type_byte)
            .ok_or(TrackerCodecError::UnknownMessageType(message_type_byte))?;

        let mut node_id = [0u8; 32];
        bytes.copy_to_slice(&mut node_id);
        let port = bytes.get_u16_le();
        let peer_count = bytes.get_u16_le() as usize;

        if bytes.remaining() < peer_count * PEER_ENTRY_SIZE {
            return Err(TrackerCodecError::Truncated);
        }
        let mut peers = Vec::with_capacity(peer_count);
        for _ in 0..peer_count {
            peers.push(TrackerPeerEntry::decode(&mut bytes).ok_or(TrackerCodecError::Truncated)?);
        }

        Ok(Self {
            message_type,
            node_id,
            port,
            peers,
        })
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct TrackedPeer {
    entry: TrackerPeerEntry,
}

/// The tracker's registry of known peers, bounded at `max_peers` and
/// periodically swept for entries older than `timeout`.
pub struct TrackerRegistry {
    max_peers: usize,
    timeout: Duration,
    peers: Mutex<HashMap<[u8; 32], TrackedPeer>>,
}

impl TrackerRegistry {
    pub fn new(max_peers: usize, timeout: Duration) -> Self {
        Self {
            max_peers,
            timeout,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_PEERS, DEFAULT_PEER_TIMEOUT)
    }

    /// Insert or refresh `node_id`'s entry. Rejected (no-op) if the
    /// registry is at capacity and `node_id` is not already present.
    pub fn announce(&self, node_id: [u8; 32], remote_ip: Ipv4Addr, port: u16) {
        let mut peers = self.peers.lock();
        if !peers.contains_key(&node_id) && peers.len() >= self.max_peers {
            log::warn!("tracker: max_peers reached, rejecting announce from {remote_ip}");
            return;
        }
        peers.insert(
            node_id,
            TrackedPeer {
                entry: TrackerPeerEntry {
                    ipv4: remote_ip,
                    port,
                    node_id,
                    last_seen: now_secs(),
                },
            },
        );
    }

    pub fn heartbeat(&self, node_id: &[u8; 32]) {
        if let Some(peer) = self.peers.lock().get_mut(node_id) {
            peer.entry.last_seen = now_secs();
        }
    }

    /// All peers whose `last_seen` is within `timeout`.
    pub fn get_peers(&self) -> Vec<TrackerPeerEntry> {
        let now = now_secs();
        self.peers
            .lock()
            .values()
            .filter(|p| now.saturating_sub(p.entry.last_seen) < self.timeout.as_secs())
            .map(|p| p.entry)
            .collect()
    }

    /// Remove every peer whose `last_seen` has exceeded `timeout`.
    pub fn evict_expired(&self) {
        let now = now_secs();
        let timeout = self.timeout.as_secs();
        self.peers.lock().retain(|_, p| now.saturating_sub(p.entry.last_seen) < timeout);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

/// Handle one request on `stream`: read exactly one message, dispatch, reply.
pub async fn handle_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    registry: &TrackerRegistry,
) -> std::io::Result<()> {
    let SocketAddr::V4(remote_v4) = remote else {
        return Ok(());
    };

    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let peer_count = u16::from_le_bytes([header[35], header[36]]) as usize;

    let mut body = vec![0u8; peer_count * PEER_ENTRY_SIZE];
    if peer_count > 0 {
        stream.read_exact(&mut body).await?;
    }

    let mut full = Vec::with_capacity(HEADER_SIZE + body.len());
    full.extend_from_slice(&header);
    full.extend_from_slice(&body);

    let response = match TrackerMessage::decode(&full) {
        Ok(msg) => dispatch(msg, remote_v4.ip().octets().into(), registry),
        Err(e) => {
            log::warn!("tracker: decode error from {remote}: {e}");
            TrackerMessage::new(TrackerMessageType::Error, [0u8; 32], 0, Vec::new())
        }
    };

    stream.write_all(&response.encode()).await?;
    Ok(())
}

fn dispatch(msg: TrackerMessage, remote_ip: Ipv4Addr, registry: &TrackerRegistry) -> TrackerMessage {
    match msg.message_type {
        TrackerMessageType::Announce => {
            registry.announce(msg.node_id, remote_ip, msg.port);
            TrackerMessage::new(TrackerMessageType::PeerList, msg.node_id, msg.port, Vec::new())
        }
        TrackerMessageType::GetPeers => {
            let peers = registry.get_peers();
            TrackerMessage::new(TrackerMessageType::PeerList, msg.node_id, msg.port, peers)
        }
        TrackerMessageType::Heartbeat => {
            registry.heartbeat(&msg.node_id);
            TrackerMessage::new(TrackerMessageType::PeerList, msg.node_id, msg.port, Vec::new())
        }
        TrackerMessageType::PeerList | TrackerMessageType::Error => {
            TrackerMessage::new(TrackerMessageType::Error, msg.node_id, msg.port, Vec::new())
        }
    }
}

/// Accept connections on `addr` indefinitely, handling one request per
/// connection against `registry`.
pub async fn run(addr: SocketAddr, registry: std::sync::Arc<TrackerRegistry>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("tracker listening on {addr}");
    loop {
        let (stream, remote) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, remote, &registry).await {
                log::debug!("tracker: connection from {remote} ended: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_peers() {
        let peer = TrackerPeerEntry {
            ipv4: Ipv4Addr::new(198, 51, 100, 7),
            port: 9000,
            node_id: [3u8; 32],
            last_seen: 1234,
        };
        let msg = TrackerMessage::new(TrackerMessageType::PeerList, [1u8; 32], 9001, vec![peer]);
        let encoded = msg.encode();
        let decoded = TrackerMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert_eq!(TrackerMessage::decode(&[0u8; 10]), Err(TrackerCodecError::Truncated));
    }

    #[test]
    fn announce_then_get_peers() {
        let registry = TrackerRegistry::with_defaults();
        registry.announce([1u8; 32], Ipv4Addr::new(10, 0, 0, 1), 9000);
        let peers = registry.get_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_id, [1u8; 32]);
    }

    #[test]
    fn announce_rejected_when_full() {
        let registry = TrackerRegistry::new(1, DEFAULT_PEER_TIMEOUT);
        registry.announce([1u8; 32], Ipv4Addr::new(10, 0, 0, 1), 9000);
        registry.announce([2u8; 32], Ipv4Addr::new(10, 0, 0, 2), 9001);
        assert_eq!(registry.peer_count(), 1);
        assert!(registry.get_peers().iter().any(|p| p.node_id == [1u8; 32]));
    }

    #[test]
    fn evict_expired_removes_stale_entries() {
        let registry = TrackerRegistry::new(10, Duration::from_secs(0));
        registry.announce([1u8; 32], Ipv4Addr::new(10, 0, 0, 1), 9000);
        registry.evict_expired();
        assert_eq!(registry.peer_count(), 0);
    }

    #[tokio::test]
    async fn announce_over_the_wire_returns_empty_peer_list() {
        let registry = std::sync::Arc::new(TrackerRegistry::with_defaults());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registry_clone = registry.clone();
        tokio::spawn(async move {
            let (stream, remote) = listener.accept().await.unwrap();
            handle_connection(stream, remote, &registry_clone).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = TrackerMessage::new(TrackerMessageType::Announce, [9u8; 32], 9500, Vec::new());
        stream.write_all(&request.encode()).await.unwrap();

        let mut response = vec![0u8; HEADER_SIZE];
        stream.read_exact(&mut response).await.unwrap();
        let decoded = TrackerMessage::decode(&response).unwrap();
        assert_eq!(decoded.message_type, TrackerMessageType::PeerList);
        assert!(decoded.peers.is_empty());
    }
}
