//! Chain management for forgechain.
//!
//! This crate turns the storage and consensus layers into a working chain:
//! - **Events**: publish/subscribe hub for chain, mining and pool events
//! - **Executor**: value transfers, gas accounting and block rewards
//! - **BlockChain**: validated import, canonical head and rewinds
//! - **Genesis**: block zero, chain config and compatibility checks
//! - **Chain makers**: deterministic extension of a chain with empty blocks
//! - **TxPool**: pending transactions for the miner
//! - **Bloom bits**: section indexer and retrieval workers
//!
//! # Example
//!
//! ```rust,no_run
//! use forgechain_chain::chain_makers::new_canonical;
//! use forgechain_consensus::Faker;
//! use forgechain_storage::Storage;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(Storage::open_temporary().unwrap());
//! let chain = new_canonical(storage, Arc::new(Faker::new()), 8).unwrap();
//! assert_eq!(chain.current_block().number(), 8);
//! ```

pub mod bloombits;
pub mod blockchain;
pub mod chain_makers;
pub mod event;
pub mod executor;
pub mod genesis;
pub mod txpool;

// Re-export commonly used types
pub use bloombits::{start_bloom_handlers, BloomHandlers, ChainIndexer, Retrieval};
pub use blockchain::{BlockChain, BlockchainError, BlockchainStats};
pub use chain_makers::{
    make_block, make_block_with_txs, make_chain, new_block_from_parent, new_canonical,
    next_timestamp,
};
pub use event::{
    ChainEvent, ChainHeadEvent, Event, EventHub, NewMinedBlockEvent, Subscription, TxPreEvent,
};
pub use executor::{ExecutionError, ExecutionResult, Executor};
pub use genesis::{setup_genesis_block, ChainConfig, ConfigCompatError, Genesis, GenesisError};
pub use txpool::{TxPool, TxPoolConfig, TxPoolError};
