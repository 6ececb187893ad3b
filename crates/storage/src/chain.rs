//! Block storage and canonical chain indexes.

use crate::db::{BatchOp, Result, Storage};
use forgechain_core::{Block, Hash};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Keys for chain metadata.
const HEAD_BLOCK_KEY: &[u8] = b"chain:head";
const SCHEMA_VERSION_KEY: &[u8] = b"chain:version";

/// Schema version of the on-disk layout this build reads and writes.
pub const BLOCKCHAIN_VERSION: u32 = 3;

/// Manages block storage and the canonical chain.
pub struct ChainStore<'a> {
    storage: &'a Storage,
}

impl<'a> ChainStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Block Storage
    // =========================================================================

    /// Store a block and its total difficulty, without touching the canonical
    /// indexes.
    ///
    /// - Primary: `block:hash:{hash}` → full block data (immutable)
    /// - `td:{hash}` → total difficulty
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let hash = block.hash();
        self.storage.batch(vec![
            BatchOp::put(Storage::block_hash_key(&hash), block)?,
            BatchOp::put(Storage::td_key(&hash), &block.total_difficulty)?,
        ])
    }

    /// Store `block`, make it canonical at its number and move the head to it,
    /// all in one atomic batch.
    pub fn write_head_block(&self, block: &Block) -> Result<()> {
        let hash = block.hash();
        self.storage.batch(vec![
            BatchOp::put(Storage::block_hash_key(&hash), block)?,
            BatchOp::put(Storage::td_key(&hash), &block.total_difficulty)?,
            BatchOp::put(Storage::canonical_key(block.number()), &hash)?,
            BatchOp::put(HEAD_BLOCK_KEY.to_vec(), &hash)?,
        ])
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        self.storage.get(Storage::block_hash_key(hash))
    }

    /// Get the canonical block at `number`.
    ///
    /// Two lookups: number → hash (canonical index), then hash → block.
    pub fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        match self.get_canonical_hash(number)? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool> {
        self.storage.contains(Storage::block_hash_key(hash))
    }

    pub fn get_td(&self, hash: &Hash) -> Result<Option<u128>> {
        self.storage.get(Storage::td_key(hash))
    }

    // =========================================================================
    // Canonical Index
    // =========================================================================

    pub fn get_canonical_hash(&self, number: u64) -> Result<Option<Hash>> {
        self.storage.get(Storage::canonical_key(number))
    }

    pub fn write_canonical_hash(&self, number: u64, hash: &Hash) -> Result<()> {
        self.storage.put(Storage::canonical_key(number), hash)
    }

    pub fn delete_canonical_hash(&self, number: u64) -> Result<()> {
        self.storage.delete(Storage::canonical_key(number))
    }

    // =========================================================================
    // Head Tracking
    // =========================================================================

    pub fn get_head_hash(&self) -> Result<Option<Hash>> {
        self.storage.get(HEAD_BLOCK_KEY)
    }

    pub fn write_head_hash(&self, hash: &Hash) -> Result<()> {
        self.storage.put(HEAD_BLOCK_KEY, hash)
    }

    pub fn get_head_block(&self) -> Result<Option<Block>> {
        match self.get_head_hash()? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Hash of the canonical genesis block, if the chain was ever initialised.
    pub fn get_genesis_hash(&self) -> Result<Option<Hash>> {
        self.get_canonical_hash(0)
    }

    /// Canonical blocks in `[from, to]`, stopping at the first gap.
    pub fn get_blocks_range(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for number in from..=to {
            match self.get_block_by_number(number)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    // =========================================================================
    // Chain Configuration & Schema
    // =========================================================================

    pub fn read_chain_config<C: DeserializeOwned>(&self, genesis: &Hash) -> Result<Option<C>> {
        self.storage.get(Storage::chain_config_key(genesis))
    }

    pub fn write_chain_config<C: Serialize>(&self, genesis: &Hash, config: &C) -> Result<()> {
        self.storage.put(Storage::chain_config_key(genesis), config)
    }

    /// The persisted schema version, 0 when the database has none yet.
    pub fn get_blockchain_version(&self) -> Result<u32> {
        Ok(self.storage.get(SCHEMA_VERSION_KEY)?.unwrap_or(0))
    }

    pub fn write_blockchain_version(&self, version: u32) -> Result<()> {
        self.storage.put(SCHEMA_VERSION_KEY, &version)
    }
}
