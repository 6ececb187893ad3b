//! Engines that accept every seal, for tests and development chains.

use crate::engine::{PowEngine, Seal};
use crate::hashimoto::{pow_hash, EpochCache};
use forgechain_core::{Block, Header};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Accepts every seal and "finds" an empty one instantly.
#[derive(Debug, Default)]
pub struct Faker {
    search_enabled: AtomicBool,
}

impl Faker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PowEngine for Faker {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn verify_seal(&self, _header: &Header) -> bool {
        true
    }

    fn search(&self, _block: &Block, _stop: &AtomicBool) -> Option<Seal> {
        Some(Seal::default())
    }

    fn hashrate(&self) -> f64 {
        0.0
    }

    fn set_search_enabled(&self, enabled: bool) {
        self.search_enabled.store(enabled, Ordering::Release);
    }

    fn search_enabled(&self) -> bool {
        self.search_enabled.load(Ordering::Acquire)
    }
}

/// Items in the tester's fixed cache.
const TEST_CACHE_ITEMS: usize = 16;

/// Accepts every seal; searching runs the real hash function against a tiny
/// cache at difficulty one, so the first nonce always wins.
#[derive(Debug, Default)]
pub struct Tester {
    search_enabled: AtomicBool,
}

impl Tester {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache() -> &'static EpochCache {
        static CACHE: OnceLock<EpochCache> = OnceLock::new();
        CACHE.get_or_init(|| EpochCache::generate(0, TEST_CACHE_ITEMS))
    }
}

impl PowEngine for Tester {
    fn name(&self) -> &'static str {
        "test"
    }

    fn verify_seal(&self, _header: &Header) -> bool {
        true
    }

    fn search(&self, block: &Block, stop: &AtomicBool) -> Option<Seal> {
        if stop.load(Ordering::Acquire) {
            return None;
        }
        let (mix_digest, _) = pow_hash(Self::cache(), &block.header.seal_hash(), 0);
        Some(Seal {
            nonce: 0,
            mix_digest,
        })
    }

    fn hashrate(&self) -> f64 {
        0.0
    }

    fn set_search_enabled(&self, enabled: bool) {
        self.search_enabled.store(enabled, Ordering::Release);
    }

    fn search_enabled(&self) -> bool {
        self.search_enabled.load(Ordering::Acquire)
    }
}
