//! 2048-bit header blooms.
//!
//! Every receipt carries a bloom over the sender and recipient of its
//! transaction; the header bloom is the union over the block. The bloom
//! indexer rotates header blooms into per-bit section vectors.

use crate::hash::hash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Bloom width in bytes.
pub const BLOOM_BYTE_LENGTH: usize = 256;

/// Bloom width in bits.
pub const BLOOM_BIT_LENGTH: usize = BLOOM_BYTE_LENGTH * 8;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Bloom(pub [u8; BLOOM_BYTE_LENGTH]);

impl Bloom {
    pub const EMPTY: Self = Self([0u8; BLOOM_BYTE_LENGTH]);

    /// The three bit positions `data` maps to.
    pub fn bit_positions(data: &[u8]) -> [usize; 3] {
        let digest = hash(data);
        let mut positions = [0usize; 3];
        for (i, pos) in positions.iter_mut().enumerate() {
            let word = u16::from_be_bytes([digest.0[2 * i], digest.0[2 * i + 1]]);
            *pos = word as usize % BLOOM_BIT_LENGTH;
        }
        positions
    }

    pub fn add(&mut self, data: &[u8]) {
        for bit in Self::bit_positions(data) {
            self.set_bit(bit);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        Self::bit_positions(data).iter().all(|bit| self.bit(*bit))
    }

    /// Bit `index`, counting from the most significant bit of byte 0.
    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Fold every bit of `other` into this bloom.
    pub fn accrue(&mut self, other: &Bloom) {
        for (byte, extra) in self.0.iter_mut().zip(other.0.iter()) {
            *byte |= extra;
        }
    }

    fn set_bit(&mut self, index: usize) {
        self.0[index / 8] |= 0x80 >> (index % 8);
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = (0..BLOOM_BIT_LENGTH).filter(|i| self.bit(*i)).count();
        write!(f, "Bloom({} bits set)", set)
    }
}

impl Serialize for Bloom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let arr: [u8; BLOOM_BYTE_LENGTH] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("bloom must be 256 bytes"))?;
        Ok(Bloom(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_item_is_contained() {
        let mut bloom = Bloom::default();
        assert!(bloom.is_empty());
        bloom.add(b"coinbase");
        assert!(bloom.contains(b"coinbase"));
        assert!(!bloom.is_empty());
    }

    #[test]
    fn test_bit_ordering() {
        let mut bloom = Bloom::default();
        bloom.set_bit(0);
        bloom.set_bit(9);
        assert_eq!(bloom.0[0], 0x80);
        assert_eq!(bloom.0[1], 0x40);
        assert!(bloom.bit(0) && bloom.bit(9) && !bloom.bit(1));
    }

    #[test]
    fn test_accrue_is_union() {
        let mut block = Bloom::default();
        let mut receipt = Bloom::default();
        receipt.add(b"sender");
        block.add(b"coinbase");
        block.accrue(&receipt);
        assert!(block.contains(b"sender") && block.contains(b"coinbase"));
    }

    #[test]
    fn test_bincode_roundtrip_keeps_bits() {
        let mut bloom = Bloom::default();
        bloom.add(b"recipient");
        let bytes = bincode::serialize(&bloom).unwrap();
        let decoded: Bloom = bincode::deserialize(&bytes).unwrap();
        assert!(decoded.contains(b"recipient"));
    }
}
