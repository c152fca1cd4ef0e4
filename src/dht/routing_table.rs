//! Kademlia-style routing table: 256 XOR-distance buckets of capacity k=20,
//! with the spec's simplified replacement policy (staleness as the sole
//! admission signal — no separate probe of the least-recently-seen peer).

use super::node_id::{bucket_index, NodeId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const BUCKET_SIZE: usize = 20;
pub const NUM_BUCKETS: usize = 256;
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(300);

/// A peer record held in the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
    pub last_seen: u64,
    /// Scratch field recomputed per lookup; not part of identity/equality.
    pub distance: Option<u32>,
}

impl PeerRecord {
    pub fn new(id: NodeId, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            last_seen: now_secs(),
            distance: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = now_secs();
    }

    pub fn is_alive(&self) -> bool {
        now_secs().saturating_sub(self.last_seen) < LIVENESS_WINDOW.as_secs()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// An ordered, at-most-`BUCKET_SIZE` sequence of peer records for one bucket
/// index. Insertion order is preserved; no duplicate id is ever held.
#[derive(Debug, Default, Clone)]
pub struct KBucket {
    peers: Vec<PeerRecord>,
}

impl KBucket {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.peers.iter().position(|p| &p.id == id)
    }
}

/// Outcome of a routing-table `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The id was already present; `last_seen` was refreshed.
    Updated,
    /// The id was inserted, either into free capacity or by replacing a
    /// stale peer.
    Added,
    /// The bucket is full of peers that are all still alive.
    Rejected,
}

/// 256 XOR-distance buckets, indexed 0..255, owned by a single local id.
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: (0..NUM_BUCKETS).map(|_| KBucket::new()).collect(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Insert or refresh `peer`. A no-op (returns `Updated` trivially against
    /// nothing) if `peer.id == local_id` — the local id is never bucketed.
    pub fn add(&mut self, peer: PeerRecord) -> AddOutcome {
        let Some(idx) = bucket_index(&self.local_id, &peer.id) else {
            return AddOutcome::Updated;
        };
        let bucket = &mut self.buckets[idx as usize];

        if let Some(pos) = bucket.position(&peer.id) {
            bucket.peers[pos].touch();
            bucket.peers[pos].address = peer.address;
            bucket.peers[pos].port = peer.port;
            return AddOutcome::Updated;
        }

        if bucket.peers.len() < BUCKET_SIZE {
            bucket.peers.push(peer);
            return AddOutcome::Added;
        }

        if let Some(stale_pos) = bucket.peers.iter().position(|p| !p.is_alive()) {
            bucket.peers[stale_pos] = peer;
            return AddOutcome::Added;
        }

        AddOutcome::Rejected
    }

    /// Remove `id` if present. A no-op if absent.
    pub fn remove(&mut self, id: &NodeId) {
        let Some(idx) = bucket_index(&self.local_id, id) else {
            return;
        };
        let bucket = &mut self.buckets[idx as usize];
        if let Some(pos) = bucket.position(id) {
            bucket.peers.swap_remove(pos);
        }
    }

    /// Up to `n` peers closest to `target`, starting in `target`'s own
    /// bucket and expanding outward by radius, then sorted ascending by XOR
    /// distance with ties broken by insertion order (stable sort).
    pub fn closest(&self, target: &NodeId, n: usize) -> Vec<PeerRecord> {
        if n == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<PeerRecord> = Vec::new();
        let home = bucket_index(&self.local_id, target);

        match home {
            Some(home_idx) => {
                let home_idx = home_idx as i32;
                candidates.extend(self.buckets[home_idx as usize].iter().cloned());

                let mut radius = 1i32;
                while candidates.len() < n
                    && (home_idx - radius >= 0 || home_idx + radius < NUM_BUCKETS as i32)
                {
                    if home_idx - radius >= 0 {
                        candidates.extend(self.buckets[(home_idx - radius) as usize].iter().cloned());
                    }
                    if home_idx + radius < NUM_BUCKETS as i32 {
                        candidates.extend(self.buckets[(home_idx + radius) as usize].iter().cloned());
                    }
                    radius += 1;
                }
            }
            None => {
                // target == local_id: there is no home bucket; gather everything.
                for bucket in &self.buckets {
                    candidates.extend(bucket.iter().cloned());
                }
            }
        }

        // Smaller highest-differing-bit position means the id agrees with
        // `target` on more high-order bits, i.e. is closer in the XOR
        // metric; `None` (identical id) sorts first as the closest match.
        for peer in &mut candidates {
            peer.distance = peer.id.xor_distance_bit(target);
        }
        candidates.sort_by(|a, b| a.distance.cmp(&b.distance));
        candidates.truncate(n);
        candidates
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn active_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| !b.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_at(idx: u32, local: &NodeId) -> PeerRecord {
        // Construct an id that differs from `local` at exactly bit `idx`.
        let mut id_bytes = local.as_bytes().to_owned();
        let byte = 31 - (idx / 8);
        let bit = idx % 8;
        id_bytes[byte as usize] ^= 1 << bit;
        PeerRecord::new(NodeId(id_bytes), "127.0.0.1", 9000)
    }

    #[test]
    fn add_is_idempotent_except_last_seen() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let peer = peer_at(10, &local);

        assert_eq!(table.add(peer.clone()), AddOutcome::Added);
        assert_eq!(table.add(peer), AddOutcome::Updated);
        assert_eq!(table.total(), 1);
    }

    #[test]
    fn remove_twice_is_a_noop() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let peer = peer_at(5, &local);
        table.add(peer.clone());
        table.remove(&peer.id);
        table.remove(&peer.id);
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn local_id_insertion_is_a_noop() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let outcome = table.add(PeerRecord::new(local, "127.0.0.1", 9000));
        assert_eq!(outcome, AddOutcome::Updated);
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn bucket_rejects_when_full_of_alive_peers() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);

        // Fill bucket 100 with 20 distinct, alive peers (vary a low bit that
        // doesn't affect the bucket-defining high bit).
        let mut ids = Vec::new();
        for i in 0..BUCKET_SIZE {
            let mut id_bytes = [0u8; 32];
            // bucket 100 => bit position 100 => byte 31 - 100/8 = 31-12=19, bit 100%8=4
            id_bytes[19] = 1 << 4;
            id_bytes[31] = i as u8; // vary low-order byte to get distinct ids
            ids.push(NodeId(id_bytes));
        }
        for id in &ids {
            assert_eq!(table.add(PeerRecord::new(*id, "127.0.0.1", 9000)), AddOutcome::Added);
        }
        assert_eq!(table.total(), BUCKET_SIZE);

        let mut extra_bytes = [0u8; 32];
        extra_bytes[19] = 1 << 4;
        extra_bytes[31] = 200;
        let outcome = table.add(PeerRecord::new(NodeId(extra_bytes), "127.0.0.1", 9000));
        assert_eq!(outcome, AddOutcome::Rejected);
        assert_eq!(table.total(), BUCKET_SIZE);
    }

    #[test]
    fn bucket_replaces_stale_peer_when_full() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);

        let mut ids = Vec::new();
        for i in 0..BUCKET_SIZE {
            let mut id_bytes = [0u8; 32];
            id_bytes[19] = 1 << 4;
            id_bytes[31] = i as u8;
            ids.push(NodeId(id_bytes));
        }
        for id in &ids {
            table.add(PeerRecord::new(*id, "127.0.0.1", 9000));
        }

        // Backdate the first peer by 400s.
        {
            let idx = bucket_index(&local, &ids[0]).unwrap() as usize;
            let bucket = &mut table.buckets[idx];
            let pos = bucket.position(&ids[0]).unwrap();
            bucket.peers[pos].last_seen = now_secs() - 400;
        }

        let mut extra_bytes = [0u8; 32];
        extra_bytes[19] = 1 << 4;
        extra_bytes[31] = 200;
        let outcome = table.add(PeerRecord::new(NodeId(extra_bytes), "127.0.0.1", 9000));
        assert_eq!(outcome, AddOutcome::Added);
        assert_eq!(table.total(), BUCKET_SIZE);

        let idx = bucket_index(&local, &ids[0]).unwrap() as usize;
        assert!(table.buckets[idx].position(&ids[0]).is_none());
    }

    #[test]
    fn closest_zero_returns_empty() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        table.add(peer_at(10, &local));
        assert!(table.closest(&NodeId::zero(), 0).is_empty());
    }

    #[test]
    fn closest_returns_all_when_table_smaller_than_n() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        table.add(peer_at(10, &local));
        table.add(peer_at(20, &local));
        let result = table.closest(&NodeId::zero(), 50);
        assert_eq!(result.len(), 2);
    }
}
