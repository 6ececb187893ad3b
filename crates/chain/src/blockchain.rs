//! Block import pipeline and canonical head management.
//!
//! [`BlockChain`] validates blocks against their parent (header rules, seal,
//! body commitments), re-executes them to check the post-state, stores them
//! with their total difficulty and advances the head when the total
//! difficulty strictly increases.

use crate::event::{ChainEvent, ChainHeadEvent, Event, EventHub, Subscription};
use crate::executor::{ExecutionError, Executor};
use crate::genesis::ChainConfig;
use forgechain_consensus::{verify_header, ConsensusError, PowEngine};
use forgechain_core::{ordered_root, Block, Hash, Header, TransactionError};
use forgechain_storage::{ChainStore, StateDb, Storage, StorageError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("genesis error: {0}")]
    Genesis(#[from] crate::genesis::GenesisError),

    #[error("genesis block not found")]
    MissingGenesis,

    #[error("unknown parent {0}")]
    UnknownParent(Hash),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("non-contiguous insert: block {number} does not extend {parent}")]
    NonContiguous { number: u64, parent: Hash },

    #[error("invalid proof-of-work in block {0}")]
    InvalidSeal(u64),

    #[error("body does not match header commitments in block {0}")]
    InvalidBody(u64),

    #[error("invalid transaction {hash} in block {number}: {reason}")]
    InvalidTransaction {
        number: u64,
        hash: Hash,
        reason: TransactionError,
    },

    #[error("state root mismatch: header {header}, computed {computed}")]
    StateRootMismatch { header: Hash, computed: Hash },

    #[error("receipt root mismatch: header {header}, computed {computed}")]
    ReceiptRootMismatch { header: Hash, computed: Hash },

    #[error("gas used mismatch: header {header}, computed {computed}")]
    GasUsedMismatch { header: u64, computed: u64 },

    #[error("blockchain is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Blockchain statistics.
#[derive(Debug, Clone)]
pub struct BlockchainStats {
    pub height: u64,
    pub head_hash: Hash,
    pub total_difficulty: u128,
    pub head_timestamp: u64,
}

/// The canonical chain on top of a shared database.
pub struct BlockChain {
    storage: Arc<Storage>,
    config: ChainConfig,
    engine: Arc<dyn PowEngine>,
    events: Arc<EventHub>,
    genesis: RwLock<Block>,
    current: RwLock<Block>,
    /// Serialises head changes.
    import_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl BlockChain {
    /// Open the chain stored in `storage`. The genesis block must already be
    /// committed.
    pub fn new(
        storage: Arc<Storage>,
        config: ChainConfig,
        engine: Arc<dyn PowEngine>,
        events: Arc<EventHub>,
    ) -> Result<Self> {
        let (genesis, current) = {
            let chain = ChainStore::new(&storage);
            let genesis = chain
                .get_block_by_number(0)?
                .ok_or(BlockchainError::MissingGenesis)?;
            let current = match chain.get_head_block()? {
                Some(head) => head,
                None => genesis.clone(),
            };
            (genesis, current)
        };
        info!(
            number = current.number(),
            hash = %current.hash(),
            td = current.total_difficulty,
            engine = engine.name(),
            "Loaded most recent local block"
        );

        Ok(Self {
            storage,
            config,
            engine,
            events,
            genesis: RwLock::new(genesis),
            current: RwLock::new(current),
            import_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        })
    }

    fn store(&self) -> ChainStore<'_> {
        ChainStore::new(&self.storage)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BlockchainError::Stopped);
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn PowEngine> {
        &self.engine
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn genesis(&self) -> Block {
        self.genesis.read().clone()
    }

    pub fn current_block(&self) -> Block {
        self.current.read().clone()
    }

    pub fn current_header(&self) -> Header {
        self.current.read().header.clone()
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self.store().get_block_by_hash(hash)?)
    }

    /// The canonical block at `number`.
    pub fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        Ok(self.store().get_block_by_number(number)?)
    }

    pub fn get_td(&self, hash: &Hash) -> Result<Option<u128>> {
        Ok(self.store().get_td(hash)?)
    }

    /// World state at `root`.
    pub fn state_at(&self, root: Hash) -> Result<StateDb<'_>> {
        Ok(StateDb::open(&self.storage, root)?)
    }

    pub fn stats(&self) -> BlockchainStats {
        let head = self.current.read();
        BlockchainStats {
            height: head.number(),
            head_hash: head.hash(),
            total_difficulty: head.total_difficulty,
            head_timestamp: head.header.timestamp,
        }
    }

    /// Chain and head events posted by this chain.
    pub fn subscribe_chain_events(&self) -> Subscription {
        self.events.subscribe()
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Validate and re-execute `block` on top of `parent`.
    ///
    /// Nothing but the post-state snapshot is written. Returns the total
    /// difficulty of the chain ending in `block`.
    pub fn process_with_parent(&self, block: &Block, parent: &Block) -> Result<u128> {
        self.process_with_parent_at(block, parent, Header::current_timestamp())
    }

    /// [`Self::process_with_parent`] with the future-block check made
    /// against `now` instead of the wall clock.
    pub fn process_with_parent_at(&self, block: &Block, parent: &Block, now: u64) -> Result<u128> {
        self.ensure_running()?;
        if block.parent_hash() != parent.hash() {
            return Err(BlockchainError::UnknownParent(block.parent_hash()));
        }

        verify_header(&block.header, &parent.header, now)?;
        if !self.engine.verify_seal(&block.header) {
            return Err(BlockchainError::InvalidSeal(block.number()));
        }
        if !block.verify_body_roots() {
            return Err(BlockchainError::InvalidBody(block.number()));
        }
        for tx in &block.transactions {
            tx.verify()
                .map_err(|reason| BlockchainError::InvalidTransaction {
                    number: block.number(),
                    hash: tx.hash(),
                    reason,
                })?;
        }

        let mut state = StateDb::open(&self.storage, parent.state_root())?;
        let result = Executor::new(&mut state).execute_block(block)?;

        if result.gas_used != block.header.gas_used {
            return Err(BlockchainError::GasUsedMismatch {
                header: block.header.gas_used,
                computed: result.gas_used,
            });
        }
        let receipt_root = ordered_root(&result.receipts);
        if receipt_root != block.header.receipt_root {
            return Err(BlockchainError::ReceiptRootMismatch {
                header: block.header.receipt_root,
                computed: receipt_root,
            });
        }
        if result.state_root != block.state_root() {
            return Err(BlockchainError::StateRootMismatch {
                header: block.state_root(),
                computed: result.state_root,
            });
        }

        Ok(parent.total_difficulty + block.difficulty() as u128)
    }

    /// Import a contiguous run of blocks.
    ///
    /// Every block is validated before anything is written, so a bad block
    /// leaves the chain untouched. The head moves to the last block whose
    /// total difficulty beats the current head. Returns the number of blocks
    /// written.
    pub fn insert_chain(&self, blocks: &[Block]) -> Result<usize> {
        let _guard = self.import_lock.lock();
        self.ensure_running()?;
        let Some(first) = blocks.first() else {
            return Ok(0);
        };

        let mut parent = self
            .store()
            .get_block_by_hash(&first.parent_hash())?
            .ok_or(BlockchainError::UnknownParent(first.parent_hash()))?;

        let mut validated = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.parent_hash() != parent.hash() {
                return Err(BlockchainError::NonContiguous {
                    number: block.number(),
                    parent: parent.hash(),
                });
            }
            let td = self.process_with_parent(block, &parent)?;
            let mut block = block.clone();
            block.total_difficulty = td;
            parent = block.clone();
            validated.push(block);
        }

        let store = self.store();
        let mut new_head = None;
        for block in &validated {
            store.put_block(block)?;
            let head_td = self.current.read().total_difficulty;
            if block.total_difficulty > head_td {
                self.write_canonical_head(&store, block)?;
                new_head = Some(block.clone());
            }
            self.events.post(Event::Chain(ChainEvent {
                block: block.clone(),
                hash: block.hash(),
            }));
        }

        if let Some(head) = new_head {
            debug!(number = head.number(), hash = %head.hash(), "Chain head advanced");
            self.events.post(Event::ChainHead(ChainHeadEvent { block: head }));
        }
        info!(count = validated.len(), "Imported new chain segment");
        Ok(validated.len())
    }

    /// Make `block` the head, re-pointing the canonical index along its
    /// ancestry and dropping entries above it.
    fn write_canonical_head(&self, store: &ChainStore<'_>, block: &Block) -> Result<()> {
        let old_number = self.current.read().number();
        for number in (block.number() + 1)..=old_number {
            store.delete_canonical_hash(number)?;
        }

        let mut number = block.number();
        let mut ancestor = block.parent_hash();
        while number > 0 {
            number -= 1;
            if store.get_canonical_hash(number)? == Some(ancestor) {
                break;
            }
            store.write_canonical_hash(number, &ancestor)?;
            ancestor = store
                .get_block_by_hash(&ancestor)?
                .ok_or(BlockchainError::BlockNotFound(number))?
                .parent_hash();
        }

        store.write_head_block(block)?;
        *self.current.write() = block.clone();
        Ok(())
    }

    // =========================================================================
    // Head Rewinds
    // =========================================================================

    /// Rewind the canonical head to block `number`.
    ///
    /// Used after a chain config change. The blocks up to `number` are
    /// trusted as they are: they were valid under the old config and are
    /// not re-validated under the new one.
    pub fn set_head(&self, number: u64) -> Result<()> {
        let _guard = self.import_lock.lock();
        let store = self.store();
        let old = self.current.read().number();
        if number >= old {
            return Ok(());
        }

        let head = store
            .get_block_by_number(number)?
            .ok_or(BlockchainError::BlockNotFound(number))?;
        for n in (number + 1)..=old {
            store.delete_canonical_hash(n)?;
        }
        store.write_head_hash(&head.hash())?;
        warn!(from = old, to = number, hash = %head.hash(), "Rewound blockchain");
        *self.current.write() = head;
        Ok(())
    }

    /// Drop the whole chain and restart it from `genesis`.
    pub fn reset_with_genesis_block(&self, genesis: &Block) -> Result<()> {
        let _guard = self.import_lock.lock();
        let store = self.store();
        let old = self.current.read().number();
        for n in 1..=old {
            store.delete_canonical_hash(n)?;
        }

        let mut genesis = genesis.clone();
        genesis.total_difficulty = genesis.difficulty() as u128;
        store.write_head_block(&genesis)?;
        info!(hash = %genesis.hash(), "Reset chain to genesis");

        *self.genesis.write() = genesis.clone();
        *self.current.write() = genesis;
        Ok(())
    }

    /// Refuse further imports. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.import_lock.lock();
        info!("Blockchain manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_makers::{make_block, make_chain, new_canonical};
    use crate::genesis::{setup_genesis_block, Genesis};
    use forgechain_consensus::Faker;
    use forgechain_core::params::BLOCK_REWARD;
    use forgechain_core::{Keypair, Transaction};

    fn setup() -> BlockChain {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        new_canonical(storage, Arc::new(Faker::new()), 0).unwrap()
    }

    #[test]
    fn test_opens_at_genesis() {
        let chain = setup();
        let head = chain.current_block();
        assert!(head.is_genesis());
        assert_eq!(head.hash(), chain.genesis().hash());
        assert_eq!(chain.stats().height, 0);
    }

    #[test]
    fn test_missing_genesis() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let result = BlockChain::new(
            storage,
            ChainConfig::default(),
            Arc::new(Faker::new()),
            Arc::new(EventHub::new()),
        );
        assert!(matches!(result, Err(BlockchainError::MissingGenesis)));
    }

    #[test]
    fn test_insert_advances_head_and_posts_events() {
        let chain = setup();
        let events = chain.subscribe_chain_events();
        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, 3).unwrap();

        assert_eq!(chain.insert_chain(&blocks).unwrap(), 3);
        assert_eq!(chain.current_block().hash(), blocks[2].hash());
        assert_eq!(
            chain.get_block_by_number(2).unwrap().unwrap().hash(),
            blocks[1].hash()
        );

        let mut chain_events = 0;
        let mut head_events = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Chain(_) => chain_events += 1,
                Event::ChainHead(_) => head_events += 1,
                _ => {}
            }
        }
        assert_eq!((chain_events, head_events), (3, 1));
    }

    #[test]
    fn test_reward_reaches_state() {
        let chain = setup();
        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, 1).unwrap();
        chain.insert_chain(&blocks).unwrap();

        let head = chain.current_block();
        let state = chain.state_at(head.state_root()).unwrap();
        assert_eq!(state.get_balance(&head.header.coinbase), BLOCK_REWARD);
    }

    #[test]
    fn test_rejects_bad_blocks() {
        let chain = setup();
        let genesis = chain.genesis();

        let mut wrong_root = make_block(chain.storage(), &genesis, 0).unwrap();
        wrong_root.set_root(Hash([1; 32]));
        assert!(matches!(
            chain.process_with_parent(&wrong_root, &genesis),
            Err(BlockchainError::StateRootMismatch { .. })
        ));

        let mut wrong_difficulty = make_block(chain.storage(), &genesis, 0).unwrap();
        wrong_difficulty.header.difficulty += 1;
        assert!(matches!(
            chain.process_with_parent(&wrong_difficulty, &genesis),
            Err(BlockchainError::Consensus(ConsensusError::InvalidDifficulty { .. }))
        ));

        let detached = make_block(chain.storage(), &genesis, 1).unwrap();
        let orphan = make_block(chain.storage(), &detached, 2).unwrap();
        assert!(matches!(
            chain.insert_chain(&[orphan]),
            Err(BlockchainError::UnknownParent(_))
        ));
        assert!(chain.current_block().is_genesis());
    }

    #[test]
    fn test_rejects_forged_sender() {
        let chain = setup();
        let genesis = chain.genesis();
        let victim = Keypair::generate();
        let thief = Keypair::generate();

        let forged = Transaction::transfer(victim.address(), thief.address(), 10, 0, 1)
            .signed(&thief);
        let mut block = make_block(chain.storage(), &genesis, 0).unwrap();
        block.set_transactions(vec![forged]);
        assert!(matches!(
            chain.process_with_parent(&block, &genesis),
            Err(BlockchainError::InvalidTransaction {
                reason: TransactionError::SenderMismatch { .. },
                ..
            })
        ));

        let unsigned = Transaction::transfer(victim.address(), thief.address(), 10, 0, 1);
        block.set_transactions(vec![unsigned]);
        assert!(matches!(
            chain.process_with_parent(&block, &genesis),
            Err(BlockchainError::InvalidTransaction { .. })
        ));
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let chain = setup();
        let genesis = chain.genesis();
        let mut blocks = make_chain(&chain, &genesis, 3).unwrap();
        blocks[2].header.gas_used = 1;

        assert!(chain.insert_chain(&blocks).is_err());
        assert!(chain.current_block().is_genesis());
        assert!(!chain
            .storage()
            .contains(Storage::block_hash_key(&blocks[0].hash()))
            .unwrap());
    }

    #[test]
    fn test_heavier_fork_takes_over() {
        let chain = setup();
        let genesis = chain.genesis();
        let short = make_chain(&chain, &genesis, 2).unwrap();
        chain.insert_chain(&short).unwrap();

        // A different first block starts a fork that ends up longer.
        let fork_root = make_block(chain.storage(), &genesis, 9).unwrap();
        let mut fork = vec![fork_root.clone()];
        let mut fork_root = fork_root;
        fork_root.total_difficulty = chain.process_with_parent(&fork_root, &genesis).unwrap();
        fork.extend(make_chain(&chain, &fork_root, 2).unwrap());

        chain.insert_chain(&fork).unwrap();
        assert_eq!(chain.current_block().hash(), fork[2].hash());
        assert_eq!(
            chain.get_block_by_number(1).unwrap().unwrap().hash(),
            fork[0].hash()
        );
    }

    #[test]
    fn test_set_head_rewinds() {
        let chain = setup();
        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, 4).unwrap();
        chain.insert_chain(&blocks).unwrap();

        chain.set_head(1).unwrap();
        assert_eq!(chain.current_block().hash(), blocks[0].hash());
        assert!(chain.get_block_by_number(2).unwrap().is_none());
        // Rewound blocks stay retrievable by hash.
        assert!(chain.get_block_by_hash(&blocks[3].hash()).unwrap().is_some());
    }

    #[test]
    fn test_reset_with_genesis() {
        let chain = setup();
        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, 2).unwrap();
        chain.insert_chain(&blocks).unwrap();

        let fresh = Genesis {
            timestamp: 5,
            ..Default::default()
        }
        .to_block(chain.storage())
        .unwrap();
        chain.reset_with_genesis_block(&fresh).unwrap();

        assert_eq!(chain.current_block().hash(), fresh.hash());
        assert_eq!(chain.genesis().hash(), fresh.hash());
        assert!(chain.get_block_by_number(1).unwrap().is_none());
    }

    #[test]
    fn test_stop_rejects_imports() {
        let chain = setup();
        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, 1).unwrap();

        chain.stop();
        chain.stop();
        assert!(matches!(
            chain.insert_chain(&blocks),
            Err(BlockchainError::Stopped)
        ));
    }

    #[test]
    fn test_reopen_keeps_head() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let head = {
            let chain = new_canonical(storage.clone(), Arc::new(Faker::new()), 2).unwrap();
            chain.current_block().hash()
        };
        let (config, _, _) = setup_genesis_block(&storage, None).unwrap();
        let reopened = BlockChain::new(
            storage,
            config,
            Arc::new(Faker::new()),
            Arc::new(EventHub::new()),
        )
        .unwrap();
        assert_eq!(reopened.current_block().hash(), head);
    }
}
