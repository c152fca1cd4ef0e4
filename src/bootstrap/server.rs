//! Bootstrap server role (§4.7): answers `peer_list_request` with a bounded,
//! oldest-evicted set of known peers, and reacts to `node_announcement` by
//! connecting to the announcer.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_MAX_PEERS: usize = 1000;

#[derive(Debug, Clone)]
struct KnownPeer {
    address: String,
    port: u16,
    last_seen: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The server-side known-peer set: keyed by `"address:port"`, bounded at
/// `max_peers`, evicting the oldest-by-`last_seen` entry on overflow.
pub struct BootstrapServer {
    max_peers: usize,
    peers: Mutex<HashMap<String, KnownPeer>>,
}

impl BootstrapServer {
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_MAX_PEERS)
    }

    pub fn note_peer(&self, address: impl Into<String>, port: u16) {
        let address = address.into();
        let key = format!("{address}:{port}");
        let mut peers = self.peers.lock();

        if !peers.contains_key(&key) && peers.len() >= self.max_peers {
            if let Some(oldest_key) = peers
                .iter()
                .min_by_key(|(_, p)| p.last_seen)
                .map(|(k, _)| k.clone())
            {
                peers.remove(&oldest_key);
            }
        }

        peers.insert(
            key,
            KnownPeer {
                address,
                port,
                last_seen: now_secs(),
            },
        );
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// `{count:u32, [addr_len:u16, addr, port:u16]*}`, little-endian.
    pub fn encode_peer_list(&self) -> BytesMut {
        let peers = self.peers.lock();
        let mut buf = BytesMut::new();
        buf.put_u32_le(peers.len() as u32);
        for peer in peers.values() {
            let addr_bytes = peer.address.as_bytes();
            buf.put_u16_le(addr_bytes.len() as u16);
            buf.put_slice(addr_bytes);
            buf.put_u16_le(peer.port);
        }
        buf
    }

    /// Parse `"sender_address:sender_port"` and report it if well-formed, so
    /// the caller can connect to the announcer.
    pub fn parse_announcement(payload: &[u8]) -> Option<SocketAddr> {
        let text = std::str::from_utf8(payload).ok()?;
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_peer_is_bounded_and_evicts_oldest() {
        let server = BootstrapServer::new(2);
        server.note_peer("10.0.0.1", 9000);
        std::thread::sleep(std::time::Duration::from_millis(10));
        server.note_peer("10.0.0.2", 9000);
        std::thread::sleep(std::time::Duration::from_millis(10));
        server.note_peer("10.0.0.3", 9000);

        assert_eq!(server.peer_count(), 2);
    }

    #[test]
    fn peer_list_roundtrips_count() {
        let server = BootstrapServer::with_default_capacity();
        server.note_peer("10.0.0.1", 9000);
        server.note_peer("10.0.0.2", 9001);
        let encoded = server.encode_peer_list();
        let count = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(count, 2);
    }

    #[test]
    fn parse_announcement_accepts_host_port() {
        let addr = BootstrapServer::parse_announcement(b"127.0.0.1:9000").unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
