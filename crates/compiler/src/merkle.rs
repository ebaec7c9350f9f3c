//! Binary Merkle tree over proof-entry hashes (§4.6, §4.7 "proof_root").
//!
//! Domain-separated leaf/node hashing (0x00-prefixed leaves, 0x01-prefixed
//! interior nodes) follows the standard second-preimage-resistant
//! construction; an odd node at any level is promoted unchanged rather than
//! duplicated, since duplication is the construction that actually enables
//! the CVE-2012-2459-style forgery this scheme is meant to avoid.

use sha2::{Digest, Sha256};

pub type Hash32 = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

fn node_hash(lhs: &Hash32, rhs: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(lhs);
    hasher.update(rhs);
    hasher.finalize().into()
}

/// Root of the binary tree over `leaves` (already leaf-hashed). Empty input
/// yields the all-zero root (§4.8 "Empty proof table ⇒ all-zero root").
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut pair = level.chunks_exact(2);
        for chunk in &mut pair {
            next.push(node_hash(&chunk[0], &chunk[1]));
        }
        if let [odd] = pair.remainder() {
            next.push(*odd);
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_leaves_produce_all_zero_root() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn single_leaf_root_is_its_own_hash() {
        let leaf = leaf_hash(b"one");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn odd_leaf_count_promotes_the_last_leaf_unduplicated() {
        let a = leaf_hash(b"a");
        let b = leaf_hash(b"b");
        let c = leaf_hash(b"c");
        let root = merkle_root(&[a, b, c]);
        let expected = node_hash(&node_hash(&a, &b), &c);
        assert_eq!(root, expected);
    }

    #[test]
    fn root_changes_when_any_leaf_changes() {
        let a = leaf_hash(b"a");
        let b = leaf_hash(b"b");
        let b2 = leaf_hash(b"b-modified");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[a, b2]));
    }
}
