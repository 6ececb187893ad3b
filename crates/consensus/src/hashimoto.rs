//! The real proof-of-work engine.
//!
//! Each epoch of [`EPOCH_LENGTH`] blocks derives a seed by repeated hashing
//! and expands it into a cache of hashes. A seal is valid when mixing the
//! seal hash and nonce through pseudo-randomly chosen cache items yields a
//! result under the difficulty target. Caches are kept in a small in-memory
//! LRU and, when a cache directory is configured, written to disk.

use crate::engine::{pow_target, PowEngine, Seal};
use forgechain_core::params::EPOCH_LENGTH;
use forgechain_core::{hash, hash_concat, Block, Hash, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Items per epoch cache.
pub const CACHE_ITEMS: usize = 1024;

/// Cache lookups per hash.
const MIX_ROUNDS: usize = 16;

/// On-disk cache format revision, part of the file name.
const CACHE_REVISION: u32 = 1;

/// Address of an external sealer the node hands work to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSealer {
    pub port: u16,
    pub get_port: u16,
}

/// Cache and dataset settings for [`Hashimoto`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowConfig {
    pub cache_dir: Option<PathBuf>,
    pub caches_in_mem: usize,
    pub caches_on_disk: usize,
    pub dataset_dir: Option<PathBuf>,
    pub datasets_in_mem: usize,
    pub datasets_on_disk: usize,
    pub gpu: Option<RemoteSealer>,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            caches_in_mem: 2,
            caches_on_disk: 3,
            dataset_dir: None,
            datasets_in_mem: 1,
            datasets_on_disk: 2,
            gpu: None,
        }
    }
}

/// Seed of `epoch`: the zero hash hashed `epoch` times.
pub fn seed_hash(epoch: u64) -> Hash {
    (0..epoch).fold(Hash::ZERO, |seed, _| hash(seed.as_ref()))
}

/// The expanded cache of one epoch.
#[derive(Debug, Clone)]
pub struct EpochCache {
    pub epoch: u64,
    items: Vec<Hash>,
}

impl EpochCache {
    /// Expand the seed of `epoch` into `size` items: a sequential hash chain
    /// followed by one round of mixing with pseudo-random neighbours.
    pub fn generate(epoch: u64, size: usize) -> Self {
        let size = size.max(1);
        let mut items = Vec::with_capacity(size);
        let mut current = hash(seed_hash(epoch).as_ref());
        for _ in 0..size {
            items.push(current);
            current = hash(current.as_ref());
        }
        for i in 0..size {
            let prev = items[(i + size - 1) % size];
            let other = items[(items[i].leading_u64() % size as u64) as usize];
            items[i] = hash_concat(&[prev.as_ref(), other.as_ref()]);
        }
        Self { epoch, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Mix `seal_hash` and `nonce` through `cache`. Returns `(mix_digest, result)`.
pub fn pow_hash(cache: &EpochCache, seal_hash: &Hash, nonce: u64) -> (Hash, Hash) {
    let len = cache.items.len().max(1) as u64;
    let mut mix = hash_concat(&[seal_hash.as_ref(), &nonce.to_le_bytes()]);
    for _ in 0..MIX_ROUNDS {
        let item = cache.items[(mix.leading_u64() % len) as usize];
        mix = hash_concat(&[mix.as_ref(), item.as_ref()]);
    }
    let result = hash_concat(&[seal_hash.as_ref(), mix.as_ref()]);
    (mix, result)
}

struct Meter {
    hashes: u64,
    since: Instant,
}

/// The real proof-of-work engine.
pub struct Hashimoto {
    config: PowConfig,
    caches: Mutex<VecDeque<Arc<EpochCache>>>,
    search_enabled: AtomicBool,
    meter: Mutex<Meter>,
}

impl Hashimoto {
    /// Build an engine. Local searching starts disabled.
    pub fn new(config: PowConfig) -> Self {
        if let Some(sealer) = &config.gpu {
            info!(
                port = sealer.port,
                get_port = sealer.get_port,
                "Remote sealer configured"
            );
        }
        if config.datasets_in_mem > 0 || config.datasets_on_disk > 0 {
            debug!(
                dir = ?config.dataset_dir,
                in_mem = config.datasets_in_mem,
                on_disk = config.datasets_on_disk,
                "Dataset limits recorded"
            );
        }
        Self {
            config,
            caches: Mutex::new(VecDeque::new()),
            search_enabled: AtomicBool::new(false),
            meter: Mutex::new(Meter {
                hashes: 0,
                since: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &PowConfig {
        &self.config
    }

    pub fn remote_sealer(&self) -> Option<&RemoteSealer> {
        self.config.gpu.as_ref()
    }

    /// Epochs currently cached in memory, most recently used first.
    pub fn cached_epochs(&self) -> Vec<u64> {
        self.caches.lock().iter().map(|c| c.epoch).collect()
    }

    /// The cache for the epoch containing `number`.
    pub fn cache(&self, number: u64) -> Arc<EpochCache> {
        let epoch = number / EPOCH_LENGTH;
        let mut caches = self.caches.lock();
        if let Some(pos) = caches.iter().position(|c| c.epoch == epoch) {
            if let Some(cache) = caches.remove(pos) {
                caches.push_front(cache.clone());
                return cache;
            }
        }

        let cache = Arc::new(self.load_or_generate(epoch));
        caches.push_front(cache.clone());
        caches.truncate(self.config.caches_in_mem.max(1));
        cache
    }

    fn load_or_generate(&self, epoch: u64) -> EpochCache {
        let dir = match &self.config.cache_dir {
            Some(dir) if self.config.caches_on_disk > 0 => dir,
            _ => return EpochCache::generate(epoch, CACHE_ITEMS),
        };
        let path = cache_path(dir, epoch);

        if let Ok(bytes) = fs::read(&path) {
            match bincode::deserialize::<Vec<Hash>>(&bytes) {
                Ok(items) if items.len() == CACHE_ITEMS => {
                    debug!(epoch, path = %path.display(), "Loaded pow cache");
                    return EpochCache { epoch, items };
                }
                _ => warn!(epoch, path = %path.display(), "Discarding corrupt pow cache"),
            }
        }

        let cache = EpochCache::generate(epoch, CACHE_ITEMS);
        if let Err(err) = self.store(dir, &path, &cache) {
            warn!(epoch, %err, "Failed to write pow cache");
        }
        cache
    }

    fn store(&self, dir: &Path, path: &Path, cache: &EpochCache) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let bytes = bincode::serialize(&cache.items)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, bytes)?;

        // Only the newest `caches_on_disk` epochs stay on disk.
        if let Some(oldest) = (cache.epoch + 1).checked_sub(self.config.caches_on_disk as u64) {
            for stale in 0..oldest {
                let stale_path = cache_path(dir, stale);
                if stale_path.exists() {
                    fs::remove_file(&stale_path)?;
                }
            }
        }
        Ok(())
    }

    fn record_hashes(&self, count: u64) {
        let mut meter = self.meter.lock();
        meter.hashes += count;
    }
}

fn cache_path(dir: &Path, epoch: u64) -> PathBuf {
    let seed = seed_hash(epoch).to_hex();
    dir.join(format!("cache-R{}-{}", CACHE_REVISION, &seed[..16]))
}

impl PowEngine for Hashimoto {
    fn name(&self) -> &'static str {
        "hashimoto"
    }

    fn verify_seal(&self, header: &Header) -> bool {
        if header.difficulty == 0 {
            return false;
        }
        let cache = self.cache(header.number);
        let (mix, result) = pow_hash(&cache, &header.seal_hash(), header.nonce);
        mix == header.mix_digest && result.leading_u64() <= pow_target(header.difficulty)
    }

    fn search(&self, block: &Block, stop: &AtomicBool) -> Option<Seal> {
        if !self.search_enabled() {
            return None;
        }
        let cache = self.cache(block.number());
        let seal_hash = block.header.seal_hash();
        let target = pow_target(block.difficulty());

        let mut nonce: u64 = rand::random();
        let mut attempts = 0u64;
        let found = loop {
            if stop.load(Ordering::Acquire) {
                break None;
            }
            let (mix_digest, result) = pow_hash(&cache, &seal_hash, nonce);
            attempts += 1;
            if result.leading_u64() <= target {
                break Some(Seal { nonce, mix_digest });
            }
            nonce = nonce.wrapping_add(1);
        };
        self.record_hashes(attempts);
        if let Some(seal) = &found {
            debug!(number = block.number(), nonce = seal.nonce, attempts, "Seal found");
        }
        found
    }

    fn hashrate(&self) -> f64 {
        let meter = self.meter.lock();
        let elapsed = meter.since.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        meter.hashes as f64 / elapsed
    }

    fn set_search_enabled(&self, enabled: bool) {
        self.search_enabled.store(enabled, Ordering::Release);
    }

    fn search_enabled(&self) -> bool {
        self.search_enabled.load(Ordering::Acquire)
    }
}

/// A [`Hashimoto`] engine shared between every component that is handed a
/// clone of the same handle.
#[derive(Clone)]
pub struct SharedEngine(Arc<Hashimoto>);

impl SharedEngine {
    /// An in-memory engine with default limits.
    pub fn new() -> Self {
        Self(Arc::new(Hashimoto::new(PowConfig::default())))
    }

    pub fn inner(&self) -> &Hashimoto {
        &self.0
    }

    /// True when both handles point at the same engine.
    pub fn same_as(&self, other: &SharedEngine) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for SharedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PowEngine for SharedEngine {
    fn name(&self) -> &'static str {
        "shared"
    }

    fn verify_seal(&self, header: &Header) -> bool {
        self.0.verify_seal(header)
    }

    fn search(&self, block: &Block, stop: &AtomicBool) -> Option<Seal> {
        self.0.search(block, stop)
    }

    fn hashrate(&self) -> f64 {
        self.0.hashrate()
    }

    fn set_search_enabled(&self, enabled: bool) {
        self.0.set_search_enabled(enabled)
    }

    fn search_enabled(&self) -> bool {
        self.0.search_enabled()
    }
}
