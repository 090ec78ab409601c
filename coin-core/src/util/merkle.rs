//! Merkle root computation over transaction hashes

use crate::hash::{hash256, Hash256, ZERO_HASH};

/// Compute the merkle root of a list of leaf hashes.
///
/// Odd levels duplicate their last node. An empty list has the zero root.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return ZERO_HASH;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            let left = chunk[0];
            let right = chunk.get(1).copied().unwrap_or(left);

            let mut buffer = [0u8; 64];
            buffer[..32].copy_from_slice(&left);
            buffer[32..].copy_from_slice(&right);
            next_level.push(hash256(&buffer));
        }
        level = next_level;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = [3u8; 32];
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(merkle_root(&[]), ZERO_HASH);
    }
}
