//! SHA-256 hashing and the Merkle root used by the DHT's node-id derivation
//! and the frame checksum.

use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashError {
    EmptyInput,
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashError::EmptyInput => write!(f, "merkle_root requires at least one leaf"),
        }
    }
}

impl std::error::Error for HashError {}

/// SHA-256 of `bytes`.
#[inline]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 of `bytes`, lowercase hex.
#[inline]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Merkle root over `leaves`. Parents are `SHA256(hex(left) || hex(right))`
/// — the spec concatenates the *hex encoding* of each child hash before
/// re-hashing, not the raw bytes. The last node is duplicated at odd levels.
/// An empty `leaves` is a caller error: there is no well-defined root.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Result<[u8; 32], HashError> {
    if leaves.is_empty() {
        return Err(HashError::EmptyInput);
    }

    let mut level: Vec<[u8; 32]> = leaves.iter().map(|leaf| sha256(leaf)).collect();
    if level.len() == 1 {
        return Ok(level[0]);
    }

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("non-empty");
            level.push(last);
        }

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let mut concat = String::with_capacity(128);
            concat.push_str(&hex::encode(pair[0]));
            concat.push_str(&hex::encode(pair[1]));
            next.push(sha256(concat.as_bytes()));
        }
        level = next;
    }

    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_64_chars() {
        let h = sha256_hex(b"eastsea");
        assert_eq!(h.len(), 64);
    }

    #[test]
    fn merkle_root_single_leaf() {
        let leaves = vec![b"a".to_vec()];
        let root = merkle_root(&leaves).unwrap();
        assert_eq!(root, sha256(b"a"));
    }

    #[test]
    fn merkle_root_two_leaves() {
        let leaves = vec![b"a".to_vec(), b"b".to_vec()];
        let root = merkle_root(&leaves).unwrap();
        let ha = hex::encode(sha256(b"a"));
        let hb = hex::encode(sha256(b"b"));
        let expected = sha256(format!("{}{}", ha, hb).as_bytes());
        assert_eq!(root, expected);
    }

    #[test]
    fn merkle_root_odd_duplicates_last() {
        let leaves = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let r1 = merkle_root(&leaves).unwrap();
        let r2 = merkle_root(&leaves).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn merkle_root_empty_errors() {
        let leaves: Vec<Vec<u8>> = vec![];
        assert!(merkle_root(&leaves).is_err());
    }
}
