//! 256-bit node identifiers and the Kademlia XOR metric.

use crate::hash::sha256;
use rand::RngCore;
use std::fmt;

/// A 256-bit node identifier. Equality is byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Deterministic id for a DHT peer: `SHA-256("<address>:<port>")`, so a
    /// peer rejoining the network is assigned the same id.
    pub fn from_address(address: &str, port: u16) -> Self {
        let s = format!("{}:{}", address, port);
        NodeId(sha256(s.as_bytes()))
    }

    /// Random 256-bit id, used for the local node hub's own identity.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    pub fn zero() -> Self {
        NodeId([0u8; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(NodeId(arr))
    }

    /// XOR distance to `other` as a position: the zero-based index of the
    /// highest bit of `self ^ other`, counting bit 0 as the LSB of the last
    /// byte and bit 255 as the MSB of the first (most significant) byte.
    /// `None` when the two ids are equal (no differing bit).
    pub fn xor_distance_bit(&self, other: &NodeId) -> Option<u32> {
        for i in 0..32 {
            let x = self.0[i] ^ other.0[i];
            if x != 0 {
                let bit_in_byte = 7 - x.leading_zeros(); // 0..=7, MSB of the byte is 7
                let byte_index_from_msb = i as u32;
                return Some(((31 - byte_index_from_msb) * 8) + bit_in_byte);
            }
        }
        None
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}…)", &self.to_hex()[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Bucket index for `target` in a routing table owned by `local`: the
/// highest differing bit position of `local ^ target`. Bucket `i` holds
/// peers sharing the first `255 - i` bits with `local`. `None` iff
/// `target == local` (never bucketed — the local id is never inserted).
pub fn bucket_index(local: &NodeId, target: &NodeId) -> Option<u32> {
    local.xor_distance_bit(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_id_is_stable() {
        let a = NodeId::from_address("127.0.0.1", 9000);
        let b = NodeId::from_address("127.0.0.1", 9000);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_differ() {
        let a = NodeId::from_address("127.0.0.1", 9000);
        let b = NodeId::from_address("127.0.0.1", 9001);
        assert_ne!(a, b);
    }

    #[test]
    fn equal_ids_have_no_distance() {
        let a = NodeId([1u8; 32]);
        let b = NodeId([1u8; 32]);
        assert_eq!(a.xor_distance_bit(&b), None);
    }

    #[test]
    fn bucket_indices_match_spec_example() {
        let local = NodeId::zero();

        let mut top_bit = [0u8; 32];
        top_bit[0] = 0x80;
        assert_eq!(bucket_index(&local, &NodeId(top_bit)), Some(255));

        let mut second_bit = [0u8; 32];
        second_bit[0] = 0x40;
        assert_eq!(bucket_index(&local, &NodeId(second_bit)), Some(254));

        let mut low_bit_of_top_byte = [0u8; 32];
        low_bit_of_top_byte[0] = 0x01;
        assert_eq!(bucket_index(&local, &NodeId(low_bit_of_top_byte)), Some(248));
    }
}
