//! Block production.
//!
//! The miner builds a block from the pending pool on top of the current
//! head, asks the engine to seal it and imports the sealed block through
//! the regular chain pipeline. Work runs on one background thread between
//! [`Miner::start`] and [`Miner::stop`].

use forgechain_chain::{
    new_block_from_parent, BlockChain, BlockchainError, Event, EventHub, ExecutionError,
    Executor, NewMinedBlockEvent, TxPool,
};
use forgechain_consensus::{calc_difficulty, PowEngine};
use forgechain_core::params::MAXIMUM_EXTRA_DATA_SIZE;
use forgechain_core::{Address, Block, Bloom, Hash, Header};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on transactions considered per block.
const MAX_BLOCK_TXS: usize = 1024;

/// Pause before retrying when no seal was found or the head is too young.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("extra data too long ({len} > {max})")]
    ExtraDataTooLong { len: usize, max: usize },

    #[error("chain error: {0}")]
    Chain(#[from] BlockchainError),

    #[error("failed to spawn miner thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MinerError>;

struct Shared {
    chain: Arc<BlockChain>,
    tx_pool: Arc<TxPool>,
    engine: Arc<dyn PowEngine>,
    events: Arc<EventHub>,
    coinbase: RwLock<Address>,
    extra: RwLock<Vec<u8>>,
    mining: AtomicBool,
    /// Aborts an in-flight seal search.
    abort: AtomicBool,
}

pub struct Miner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(
        chain: Arc<BlockChain>,
        tx_pool: Arc<TxPool>,
        engine: Arc<dyn PowEngine>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain,
                tx_pool,
                engine,
                events,
                coinbase: RwLock::new(Address::ZERO),
                extra: RwLock::new(Vec::new()),
                mining: AtomicBool::new(false),
                abort: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start producing blocks for `coinbase`. A running miner only switches
    /// its coinbase.
    pub fn start(&self, coinbase: Address) -> Result<()> {
        self.set_etherbase(coinbase);
        let mut worker = self.worker.lock();
        if self.shared.mining.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.abort.store(false, Ordering::Release);

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("miner".into())
            .spawn(move || shared.run());
        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                info!(%coinbase, engine = self.shared.engine.name(), "Starting mining operation");
                Ok(())
            }
            Err(err) => {
                self.shared.mining.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stop mining and wait for the worker. Idempotent.
    pub fn stop(&self) {
        self.shared.mining.store(false, Ordering::Release);
        self.shared.abort.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Miner thread panicked");
            }
            info!("Mining stopped");
        }
    }

    pub fn mining(&self) -> bool {
        self.shared.mining.load(Ordering::Acquire)
    }

    pub fn etherbase(&self) -> Address {
        *self.shared.coinbase.read()
    }

    pub fn set_etherbase(&self, coinbase: Address) {
        *self.shared.coinbase.write() = coinbase;
    }

    pub fn extra(&self) -> Vec<u8> {
        self.shared.extra.read().clone()
    }

    pub fn set_extra(&self, extra: Vec<u8>) -> Result<()> {
        if extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(MinerError::ExtraDataTooLong {
                len: extra.len(),
                max: MAXIMUM_EXTRA_DATA_SIZE,
            });
        }
        *self.shared.extra.write() = extra;
        Ok(())
    }

    pub fn hashrate(&self) -> f64 {
        self.shared.engine.hashrate()
    }

    /// The block the miner would seal right now.
    pub fn pending_block(&self) -> Result<Block> {
        self.shared.build_block(Header::current_timestamp())
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(&self) {
        while self.mining.load(Ordering::Acquire) {
            let now = Header::current_timestamp();
            if now <= self.chain.current_header().timestamp {
                thread::sleep(RETRY_INTERVAL);
                continue;
            }
            match self.mine_one(now) {
                Ok(true) => {}
                Ok(false) => thread::sleep(RETRY_INTERVAL),
                Err(MinerError::Chain(BlockchainError::Stopped)) => {
                    debug!("Chain stopped, miner exiting");
                    self.mining.store(false, Ordering::Release);
                    break;
                }
                Err(err) => {
                    warn!(%err, "Failed to produce block");
                    thread::sleep(RETRY_INTERVAL);
                }
            }
        }
    }

    /// Build, seal and import one block. `Ok(false)` when no seal was found.
    fn mine_one(&self, now: u64) -> Result<bool> {
        let block = self.build_block(now)?;
        let Some(sealed) = self.engine.seal(block, &self.abort) else {
            return Ok(false);
        };

        self.chain.insert_chain(std::slice::from_ref(&sealed))?;
        let included: Vec<Hash> = sealed.transactions.iter().map(|tx| tx.hash()).collect();
        self.tx_pool.remove_batch(&included);
        info!(
            number = sealed.number(),
            hash = %sealed.hash(),
            txs = included.len(),
            "Successfully sealed new block"
        );
        self.events
            .post(Event::NewMinedBlock(NewMinedBlockEvent { block: sealed }));
        Ok(true)
    }

    /// Assemble an unsealed block at `timestamp` from pending transactions.
    ///
    /// Transactions that would fail are left out, and packing stops when
    /// the block gas pool runs dry.
    fn build_block(&self, timestamp: u64) -> Result<Block> {
        let parent = self.chain.current_block();
        let coinbase = *self.coinbase.read();
        let mut block = new_block_from_parent(coinbase, &parent);
        let timestamp = timestamp.max(parent.header.timestamp + 1);
        block.header.timestamp = timestamp;
        block.header.difficulty = calc_difficulty(timestamp, &parent.header);
        block.header.extra_data = self.extra.read().clone();

        let mut state = self.chain.state_at(parent.state_root())?;
        state
            .get_or_new_state_object(&coinbase)
            .set_gas_pool(block.header.gas_limit);

        let mut txs = Vec::new();
        let mut receipts = Vec::new();
        let mut gas_used = 0;
        let mut bloom = Bloom::default();
        {
            let mut executor = Executor::new(&mut state);
            for tx in self.tx_pool.pending(MAX_BLOCK_TXS) {
                match executor.execute_transaction(&tx, &coinbase, gas_used) {
                    Ok(receipt) if receipt.success => {
                        gas_used = receipt.cumulative_gas_used;
                        bloom.accrue(&receipt.bloom);
                        receipts.push(receipt);
                        txs.push(tx);
                    }
                    Ok(_) => debug!(hash = %tx.hash(), "Skipping failing transaction"),
                    Err(ExecutionError::GasLimitReached { .. }) => break,
                    Err(err) => return Err(BlockchainError::from(err).into()),
                }
            }
            executor.accumulate_rewards(&block.header, &[]);
        }
        let root = state.commit().map_err(BlockchainError::from)?;

        block.header.gas_used = gas_used;
        block.header.bloom = bloom;
        block.set_transactions(txs);
        block.set_receipts(receipts);
        block.set_root(root);
        Ok(block)
    }
}
