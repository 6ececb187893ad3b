//! Deterministic chain extension.
//!
//! Builds well-shaped blocks on top of a parent (difficulty, gas limit,
//! reward and post-state root filled in, seal left empty) and assembles them
//! into a canonical chain through the regular import pipeline.

use crate::blockchain::{BlockChain, Result};
use crate::event::EventHub;
use crate::executor::Executor;
use crate::genesis::setup_genesis_block;
use forgechain_consensus::{calc_difficulty, calc_gas_limit, PowEngine};
use forgechain_core::params::BLOCK_REWARD;
use forgechain_core::{Address, Block, Bloom, Hash, Header, Transaction};
use forgechain_storage::{StateDb, Storage};
use std::sync::Arc;
use tracing::debug;

/// Seconds between generated blocks.
pub const BLOCK_INTERVAL: u64 = 10;

/// Timestamp of a generated child of `parent` at wall-clock time `now`.
///
/// Blocks on an old parent are spaced [`BLOCK_INTERVAL`] apart. Once that
/// would run ahead of `now` the child takes `now`, and never less than one
/// second after its parent.
pub fn next_timestamp(parent: &Header, now: u64) -> u64 {
    let steady = parent.timestamp + BLOCK_INTERVAL;
    steady.min(now).max(parent.timestamp + 1)
}

/// An empty block on top of `parent`, paying `beneficiary`.
///
/// The state root is still the parent's; [`make_block`] fills in the
/// post-state.
pub fn new_block_from_parent(beneficiary: Address, parent: &Block) -> Block {
    let timestamp = next_timestamp(&parent.header, Header::current_timestamp());
    let header = Header {
        parent_hash: parent.hash(),
        uncle_hash: Hash::ZERO,
        coinbase: beneficiary,
        state_root: parent.state_root(),
        tx_root: Hash::ZERO,
        receipt_root: Hash::ZERO,
        bloom: Bloom::default(),
        difficulty: calc_difficulty(timestamp, &parent.header),
        number: parent.number() + 1,
        gas_limit: calc_gas_limit(&parent.header),
        gas_used: 0,
        timestamp,
        extra_data: Vec::new(),
        mix_digest: Hash::ZERO,
        nonce: 0,
    };
    let mut block = Block::new(header, vec![], vec![], vec![]);
    block.total_difficulty = parent.total_difficulty;
    block
}

/// Build block `i` after `parent`: the beneficiary is the byte `i`
/// left-padded to an address, and the block reward is applied and committed.
pub fn make_block(storage: &Storage, parent: &Block, i: usize) -> Result<Block> {
    let beneficiary = Address::left_padded(&[i as u8]);
    let mut block = new_block_from_parent(beneficiary, parent);

    let mut state = StateDb::open(storage, block.state_root())?;
    let coinbase = state.get_or_new_state_object(&beneficiary);
    coinbase.set_gas_pool(block.header.gas_limit);
    coinbase.add_balance(BLOCK_REWARD);
    let root = state.commit()?;
    block.set_root(root);
    Ok(block)
}

/// A block after `parent` paying `beneficiary` that carries `txs`.
///
/// The transactions are executed in order against the parent state; the
/// receipts, gas used, bloom and post-state root come from that run.
pub fn make_block_with_txs(
    storage: &Storage,
    parent: &Block,
    beneficiary: Address,
    txs: Vec<Transaction>,
) -> Result<Block> {
    let mut block = new_block_from_parent(beneficiary, parent);
    block.set_transactions(txs);

    let mut state = StateDb::open(storage, block.state_root())?;
    let result = Executor::new(&mut state).execute_block(&block)?;
    block.header.gas_used = result.gas_used;
    block.header.bloom = result.bloom;
    block.set_receipts(result.receipts);
    block.set_root(result.state_root);
    Ok(block)
}

/// Build and validate `n` blocks on top of `parent`.
///
/// Each block is re-executed by `chain` against its parent before the next
/// one is built; the first failure aborts the whole run. Nothing is
/// imported.
///
/// Validation runs on the generator's clock: a block is never treated as
/// coming from the future relative to itself, so a run of any length
/// succeeds from a parent stamped just now. Importing such a run still
/// checks the wall clock.
pub fn make_chain(chain: &BlockChain, parent: &Block, n: usize) -> Result<Vec<Block>> {
    let mut blocks = Vec::with_capacity(n);
    let mut parent = parent.clone();
    for i in 0..n {
        let mut block = make_block(chain.storage(), &parent, i)?;
        let now = Header::current_timestamp().max(block.header.timestamp);
        block.total_difficulty = chain.process_with_parent_at(&block, &parent, now)?;
        debug!(number = block.number(), td = block.total_difficulty, "Generated block");
        blocks.push(block.clone());
        parent = block;
    }
    Ok(blocks)
}

/// A chain at the default genesis extended by `n` generated blocks.
pub fn new_canonical(
    storage: Arc<Storage>,
    engine: Arc<dyn PowEngine>,
    n: usize,
) -> Result<BlockChain> {
    let (config, _, _) = setup_genesis_block(&storage, None)?;
    let chain = BlockChain::new(storage, config, engine, Arc::new(EventHub::new()))?;
    if n > 0 {
        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, n)?;
        chain.insert_chain(&blocks)?;
    }
    Ok(chain)
}
