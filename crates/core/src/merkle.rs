//! Binary merkle roots for transaction, receipt and state commitments.

use crate::hash::{hash, hash_concat, Hash};
use serde::Serialize;

/// Compute the merkle root of a list of hashes.
///
/// Returns the zero hash if the list is empty.
/// Uses a binary merkle tree with pair-wise hashing.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|chunk| {
                // Odd number of elements: hash the last one with itself
                let right = chunk.get(1).unwrap_or(&chunk[0]);
                hash_concat(&[chunk[0].as_ref(), right.as_ref()])
            })
            .collect();
    }

    current_level[0]
}

/// Merkle root over the bincode encodings of `items`, in order.
pub fn ordered_root<T: Serialize>(items: &[T]) -> Hash {
    let leaves: Vec<Hash> = items
        .iter()
        .map(|item| hash(&bincode::serialize(item).expect("serialization should not fail")))
        .collect();
    merkle_root(&leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash(&[i as u8])).collect()
    }

    #[test]
    fn test_merkle_root_small_inputs() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);

        let one = make_hashes(1);
        assert_eq!(merkle_root(&one), one[0]);

        let two = make_hashes(2);
        assert_eq!(
            merkle_root(&two),
            hash_concat(&[two[0].as_ref(), two[1].as_ref()])
        );
    }

    #[test]
    fn test_merkle_root_odd_leaf_pairs_with_itself() {
        let three = make_hashes(3);
        let left = hash_concat(&[three[0].as_ref(), three[1].as_ref()]);
        let right = hash_concat(&[three[2].as_ref(), three[2].as_ref()]);
        assert_eq!(
            merkle_root(&three),
            hash_concat(&[left.as_ref(), right.as_ref()])
        );
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let hashes = make_hashes(4);
        let mut reversed = hashes.clone();
        reversed.reverse();
        assert_ne!(merkle_root(&hashes), merkle_root(&reversed));
    }

    #[test]
    fn test_ordered_root_empty_is_zero() {
        let empty: Vec<u64> = Vec::new();
        assert_eq!(ordered_root(&empty), Hash::ZERO);
        assert_ne!(ordered_root(&[1u64, 2]), ordered_root(&[2u64, 1]));
    }
}
