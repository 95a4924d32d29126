//! Deterministic hashing for transactions and blocks.
//!
//! Everything content-addressed on the chain goes through SHA-256 and is
//! rendered as lowercase hex. The Merkle root over a block's transaction ids
//! pair-hashes with duplication of the last leaf when a level is odd.

use sha2::{Digest, Sha256};

/// Hash of "nothing", used as the previous-hash of the genesis block.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 of the input, as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Merkle root over an ordered list of transaction ids.
///
/// An empty list yields the empty string. A level with an odd number of
/// nodes duplicates its last node before pairing.
pub fn merkle_root(ids: &[String]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let mut level: Vec<String> = ids.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut combined = String::with_capacity(left.len() + right.len());
            combined.push_str(left);
            combined.push_str(right);
            next.push(sha256_hex(combined.as_bytes()));
        }
        level = next;
    }
    level.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn merkle_empty_is_empty() {
        assert_eq!(merkle_root(&[]), "");
    }

    #[test]
    fn merkle_single_leaf_hashes_itself() {
        let leaf = sha256_hex(b"tx-1");
        assert_eq!(merkle_root(&[leaf.clone()]), leaf);
    }

    #[test]
    fn merkle_odd_level_duplicates_last() {
        let a = sha256_hex(b"a");
        let b = sha256_hex(b"b");
        let c = sha256_hex(b"c");
        let ab = sha256_hex(format!("{}{}", a, b).as_bytes());
        let cc = sha256_hex(format!("{}{}", c, c).as_bytes());
        let root = sha256_hex(format!("{}{}", ab, cc).as_bytes());
        assert_eq!(merkle_root(&[a, b, c]), root);
    }

    #[test]
    fn merkle_is_order_sensitive() {
        let a = sha256_hex(b"a");
        let b = sha256_hex(b"b");
        assert_ne!(
            merkle_root(&[a.clone(), b.clone()]),
            merkle_root(&[b, a])
        );
    }
}
