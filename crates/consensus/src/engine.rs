//! The proof-of-work capability contract.

use forgechain_core::{Block, Hash, Header};
use std::sync::atomic::AtomicBool;

/// A proof-of-work solution for one header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Seal {
    pub nonce: u64,
    pub mix_digest: Hash,
}

/// What the node needs from a consensus engine.
///
/// Engines are shared between the blockchain, the miner and the node, so
/// every method takes `&self`.
pub trait PowEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Check the nonce and mix digest of `header` against its difficulty.
    fn verify_seal(&self, header: &Header) -> bool;

    /// Look for a seal for `block`. Returns `None` when `stop` is raised or
    /// local searching is disabled.
    fn search(&self, block: &Block, stop: &AtomicBool) -> Option<Seal>;

    /// Hashes per second measured over recent searches.
    fn hashrate(&self) -> f64;

    fn set_search_enabled(&self, enabled: bool);

    fn search_enabled(&self) -> bool;

    /// Search and apply the seal to `block`.
    fn seal(&self, block: Block, stop: &AtomicBool) -> Option<Block> {
        let seal = self.search(&block, stop)?;
        Some(block.with_seal(seal.nonce, seal.mix_digest))
    }
}

/// Largest leading word a result may have to meet `difficulty`.
pub fn pow_target(difficulty: u64) -> u64 {
    u64::MAX / difficulty.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_target() {
        assert_eq!(pow_target(0), u64::MAX);
        assert_eq!(pow_target(1), u64::MAX);
        assert_eq!(pow_target(2), u64::MAX / 2);
        assert!(pow_target(131_072) < pow_target(131_071));
    }
}
