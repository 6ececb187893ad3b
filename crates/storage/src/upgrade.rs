//! Background migration of the legacy block layout.
//!
//! Older databases stored full blocks under `block:height:{n}`. The current
//! layout stores the block once by hash and keeps a `block:number:` pointer.
//! The migration runs on its own thread, one entry per batch, and can be
//! interrupted at any point; an interrupted run resumes on the next start.

use crate::db::{BatchOp, Result, Storage};
use forgechain_core::Block;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

const LEGACY_PREFIX: &[u8] = b"block:height:";

/// Handle to a running migration.
pub struct UpgradeHandle {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<usize>>>,
}

impl UpgradeHandle {
    /// Interrupt the migration and wait for the worker to exit.
    ///
    /// Returns how many entries were migrated. Subsequent calls return 0.
    pub fn stop(&mut self) -> usize {
        self.stop.store(true, Ordering::Release);
        match self.worker.take().map(|w| w.join()) {
            Some(Ok(Ok(migrated))) => migrated,
            Some(Ok(Err(err))) => {
                warn!(%err, "legacy block migration failed");
                0
            }
            Some(Err(_)) => {
                warn!("legacy block migration panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for UpgradeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start migrating legacy entries. Returns `None` when there is nothing to do.
pub fn upgrade_legacy_blocks(storage: Arc<Storage>) -> Result<Option<UpgradeHandle>> {
    if storage.scan_prefix(LEGACY_PREFIX)?.is_empty() {
        return Ok(None);
    }
    info!("Upgrading chain database to hash-indexed blocks");

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let worker = thread::Builder::new()
        .name("db-upgrade".into())
        .spawn(move || migrate(&storage, &flag))?;

    Ok(Some(UpgradeHandle {
        stop,
        worker: Some(worker),
    }))
}

fn migrate(storage: &Storage, stop: &AtomicBool) -> Result<usize> {
    let mut migrated = 0;
    for (key, value) in storage.scan_prefix(LEGACY_PREFIX)? {
        if stop.load(Ordering::Acquire) {
            info!(migrated, "Legacy block migration interrupted");
            return Ok(migrated);
        }
        let block: Block = bincode::deserialize(&value)?;
        let hash = block.hash();
        storage.batch(vec![
            BatchOp::put(Storage::block_hash_key(&hash), &block)?,
            BatchOp::put(Storage::td_key(&hash), &block.total_difficulty)?,
            BatchOp::put(Storage::canonical_key(block.number()), &hash)?,
            BatchOp::Remove { key },
        ])?;
        migrated += 1;
    }
    info!(migrated, "Legacy block migration complete");
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainStore;
    use forgechain_core::{Address, Bloom, Hash, Header};

    fn legacy_block(number: u64) -> Block {
        let header = Header {
            parent_hash: Hash::from_low_u64(number),
            uncle_hash: Hash::ZERO,
            coinbase: Address::ZERO,
            state_root: Hash::ZERO,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            bloom: Bloom::default(),
            difficulty: 1,
            number,
            gas_limit: 5000,
            gas_used: 0,
            timestamp: number,
            extra_data: Vec::new(),
            mix_digest: Hash::ZERO,
            nonce: 0,
        };
        Block::new(header, vec![], vec![], vec![])
    }

    #[test]
    fn test_nothing_to_upgrade() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        assert!(upgrade_legacy_blocks(storage).unwrap().is_none());
    }

    #[test]
    fn test_upgrade_moves_blocks() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let blocks: Vec<Block> = (1..=3).map(legacy_block).collect();
        for block in &blocks {
            storage
                .put(Storage::legacy_height_key(block.number()), block)
                .unwrap();
        }

        let mut handle = upgrade_legacy_blocks(storage.clone()).unwrap().unwrap();
        // Wait for completion: stop only interrupts between entries.
        while !storage.scan_prefix(LEGACY_PREFIX).unwrap().is_empty() {
            std::thread::yield_now();
        }
        handle.stop();

        let chain = ChainStore::new(&storage);
        for block in &blocks {
            let stored = chain.get_block_by_number(block.number()).unwrap().unwrap();
            assert_eq!(stored.hash(), block.hash());
        }
        assert_eq!(handle.stop(), 0);
    }
}
