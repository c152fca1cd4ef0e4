//! DHT overlay (C6): wraps the routing table with the operations a node
//! actually calls — find_node, and the bootstrap walk that seeds buckets
//! from a list of known peers.
//!
//! The network-recursive (iterative, α=3) lookup specified by Kademlia is
//! not implemented here: per §4.6 and §9's open design point, `find_node`
//! resolves purely from the local routing table. This matches the spec's
//! recommended behavior for the DHT message handler (serializing
//! `routing_table.closest(target, k)`), in contrast to the source's stub
//! that only echoes currently-connected peers.

use super::node_id::NodeId;
use super::routing_table::{AddOutcome, PeerRecord, RoutingTable, BUCKET_SIZE};
use parking_lot::Mutex;

pub struct DhtOverlay {
    table: Mutex<RoutingTable>,
}

impl DhtOverlay {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            table: Mutex::new(RoutingTable::new(local_id)),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.table.lock().local_id()
    }

    pub fn add_peer(&self, peer: PeerRecord) -> AddOutcome {
        self.table.lock().add(peer)
    }

    pub fn remove_peer(&self, id: &NodeId) {
        self.table.lock().remove(id);
    }

    /// Local-only find_node: the `k` routing-table peers closest to `target`.
    pub fn find_node(&self, target: &NodeId) -> Vec<PeerRecord> {
        self.table.lock().closest(target, BUCKET_SIZE)
    }

    pub fn total(&self) -> usize {
        self.table.lock().total()
    }

    pub fn active_buckets(&self) -> usize {
        self.table.lock().active_buckets()
    }

    /// Seed the table with `seeds`, then run `find_node(local_id)` to
    /// populate nearby buckets, per §4.6's bootstrap procedure.
    pub fn bootstrap(&self, seeds: &[PeerRecord]) -> Vec<PeerRecord> {
        for seed in seeds {
            self.add_peer(seed.clone());
        }
        let local_id = self.local_id();
        self.find_node(&local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_seeds_then_finds_nearby() {
        let local = NodeId::zero();
        let overlay = DhtOverlay::new(local);

        let mut seed_id = [0u8; 32];
        seed_id[0] = 0x80;
        let seeds = vec![PeerRecord::new(NodeId(seed_id), "198.51.100.1", 9001)];

        let nearby = overlay.bootstrap(&seeds);
        assert_eq!(overlay.total(), 1);
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, NodeId(seed_id));
    }
}
