//! Auto-discovery controller (C11): orchestrates the DHT, bootstrap,
//! broadcast, and port-scanner sources behind the per-address state machine
//! `discovered -> connecting -> connected`, keeping the three sets disjoint.

use crate::dht::{DhtOverlay, NodeId};
use crate::discovery::BroadcastDiscovery;
use crate::network::hub::NodeHub;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const DEFAULT_MAX_PEERS: usize = 10;
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);
pub const CONNECTION_INTERVAL: Duration = Duration::from_secs(1);
pub const PORT_SCAN_EVERY_NTH_TICK: u64 = 10;
pub const HANDSHAKE_PROBE: &[u8] = b"EASTSEA_HANDSHAKE";
pub const HANDSHAKE_ACK: &[u8] = b"EASTSEA_ACK";
pub const PING_PROBE: &[u8] = b"PING";
pub const PONG_ACK: &[u8] = b"PONG";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// The three pairwise-disjoint sets of addresses tracked by the controller.
#[derive(Default)]
struct Sets {
    discovered: HashSet<SocketAddr>,
    connecting: HashSet<SocketAddr>,
    connected: HashSet<SocketAddr>,
}

impl Sets {
    /// Add `addr` to `discovered` iff it is not already present in any of
    /// the three sets. Returns whether it was newly added.
    fn add_discovered(&mut self, addr: SocketAddr) -> bool {
        if self.discovered.contains(&addr) || self.connecting.contains(&addr) || self.connected.contains(&addr) {
            return false;
        }
        self.discovered.insert(addr)
    }

    fn move_to_connecting(&mut self, addr: SocketAddr) {
        if self.discovered.remove(&addr) {
            self.connecting.insert(addr);
        }
    }

    fn move_to_connected(&mut self, addr: SocketAddr) {
        if self.connecting.remove(&addr) {
            self.connected.insert(addr);
        }
    }

    fn connect_failed(&mut self, addr: SocketAddr) {
        self.connecting.remove(&addr);
    }

    fn liveness_lost(&mut self, addr: SocketAddr) {
        self.connected.remove(&addr);
    }
}

/// Sources the discovery loop gathers candidate addresses from.
pub struct DiscoverySources {
    pub hub: NodeHub,
    pub dht: Arc<DhtOverlay>,
    pub bootstrap_seeds: Vec<SocketAddr>,
    pub broadcast: Option<Arc<BroadcastDiscovery>>,
    pub port_scan_base: Option<Ipv4Addr>,
    pub port_scan_ports: Vec<u16>,
}

/// Orchestrates peer discovery and connection across all sources, enforcing
/// `max_peers` and the disjointness invariant over `discovered`/`connecting`/
/// `connected`.
pub struct AutoDiscoveryController {
    sets: Mutex<Sets>,
    sources: DiscoverySources,
    max_peers: usize,
    tick: AtomicU64,
}

impl AutoDiscoveryController {
    pub fn new(sources: DiscoverySources) -> Self {
        Self::with_max_peers(sources, DEFAULT_MAX_PEERS)
    }

    pub fn with_max_peers(sources: DiscoverySources, max_peers: usize) -> Self {
        Self {
            sets: Mutex::new(Sets::default()),
            sources,
            max_peers,
            tick: AtomicU64::new(0),
        }
    }

    pub fn discovered_count(&self) -> usize {
        self.sets.lock().discovered.len()
    }

    pub fn connecting_count(&self) -> usize {
        self.sets.lock().connecting.len()
    }

    pub fn connected_count(&self) -> usize {
        self.sets.lock().connected.len()
    }

    /// Manually offer an address, as if a discovery source had surfaced it.
    /// Exposed directly so the disjointness invariant can be exercised
    /// without a live network.
    pub fn offer(&self, addr: SocketAddr) -> bool {
        let mut sets = self.sets.lock();
        let added = sets.add_discovered(addr);
        if added && sets.connected.len() < self.max_peers {
            sets.move_to_connecting(addr);
        }
        added
    }

    /// One iteration of the discovery loop: gather candidates from every
    /// source, dedupe, and promote to `connecting` while under `max_peers`.
    pub async fn discovery_tick(&self) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let mut candidates = Vec::new();

        let local_id = self.sources.dht.local_id();
        for peer in self.sources.dht.find_node(&local_id) {
            if let Ok(ip) = peer.address.parse() {
                candidates.push(SocketAddr::new(ip, peer.port));
            }
        }

        candidates.extend(self.sources.bootstrap_seeds.iter().copied());

        if tick % PORT_SCAN_EVERY_NTH_TICK == 0 {
            if let Some(base) = self.sources.port_scan_base {
                let targets = crate::discovery::build_targets(base, &self.sources.port_scan_ports);
                candidates.extend(crate::discovery::scan(targets).await);
            }
        }

        if let Some(broadcast) = &self.sources.broadcast {
            candidates.extend(broadcast.live_peers().into_iter().map(|(_, addr)| addr));
        }

        let mut sets = self.sets.lock();
        for addr in candidates {
            let added = sets.add_discovered(addr);
            if added && sets.connected.len() < self.max_peers {
                sets.move_to_connecting(addr);
            }
        }
    }

    /// One iteration of the connection loop: attempt the handshake for
    /// every `connecting` address, and liveness-probe every `connected`
    /// address.
    pub async fn connection_tick(&self) {
        let (connecting, connected) = {
            let sets = self.sets.lock();
            (
                sets.connecting.iter().copied().collect::<Vec<_>>(),
                sets.connected.iter().copied().collect::<Vec<_>>(),
            )
        };

        for addr in connecting {
            if handshake(addr).await {
                let _ = self.sources.hub.connect(addr).await;
                self.sets.lock().move_to_connected(addr);
            } else {
                self.sets.lock().connect_failed(addr);
            }
        }

        for addr in connected {
            if !ping(addr).await {
                self.sets.lock().liveness_lost(addr);
            }
        }
    }
}

async fn exchange(addr: SocketAddr, probe: &[u8], expect: &[u8]) -> bool {
    let Ok(Ok(mut stream)) = tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await else {
        return false;
    };
    if stream.write_all(probe).await.is_err() {
        return false;
    }
    let mut buf = vec![0u8; expect.len()];
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, stream.read_exact(&mut buf)).await,
        Ok(Ok(_))
    ) && buf == expect
}

async fn handshake(addr: SocketAddr) -> bool {
    exchange(addr, HANDSHAKE_PROBE, HANDSHAKE_ACK).await
}

async fn ping(addr: SocketAddr) -> bool {
    exchange(addr, PING_PROBE, PONG_ACK).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::NodeId;

    fn test_controller() -> AutoDiscoveryController {
        let hub = NodeHub::new(NodeId::random());
        let dht = Arc::new(DhtOverlay::new(NodeId::random()));
        AutoDiscoveryController::new(DiscoverySources {
            hub,
            dht,
            bootstrap_seeds: Vec::new(),
            broadcast: None,
            port_scan_base: None,
            port_scan_ports: Vec::new(),
        })
    }

    #[test]
    fn offer_adds_once_from_two_sources() {
        let controller = test_controller();
        let addr: SocketAddr = "198.51.100.7:9000".parse().unwrap();

        assert!(controller.offer(addr));
        assert!(!controller.offer(addr));
        assert_eq!(controller.discovered_count() + controller.connecting_count(), 1);
    }

    #[test]
    fn offer_moves_to_connecting_under_max_peers() {
        let controller = test_controller();
        let addr: SocketAddr = "198.51.100.7:9000".parse().unwrap();
        controller.offer(addr);
        assert_eq!(controller.connecting_count(), 1);
        assert_eq!(controller.discovered_count(), 0);
    }

    #[tokio::test]
    async fn connection_tick_promotes_on_successful_handshake() {
        let controller = test_controller();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; HANDSHAKE_PROBE.len()];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(HANDSHAKE_ACK).await.unwrap();
        });

        controller.offer(addr);
        controller.connection_tick().await;
        assert_eq!(controller.connected_count(), 1);
        assert_eq!(controller.connecting_count(), 0);
    }

    #[tokio::test]
    async fn connection_tick_drops_on_failed_handshake() {
        let controller = test_controller();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        controller.offer(addr);
        controller.connection_tick().await;
        assert_eq!(controller.connected_count(), 0);
        assert_eq!(controller.connecting_count(), 0);
    }
}
