//! Persistent storage layer for forgechain.
//!
//! This crate provides the storage backend for the node:
//! - The raw key/value contract the chain relies on ([`KeyValueStore`])
//! - Root-addressed world state ([`StateDb`])
//! - Blocks, canonical indexes, total difficulty, chain config and schema
//!   version ([`ChainStore`])
//! - Migration of the legacy height-keyed block layout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! │        (BlockChain, chain makers, miner, indexer)        │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                   Storage Layer                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │ StateDb     │  │ ChainStore  │  │ Storage (DB)    │  │
//! │  │  - Accounts │  │  - Blocks   │  │  - sled wrapper │  │
//! │  │  - Roots    │  │  - Head/TD  │  │  - serialization│  │
//! │  │  - Commit   │  │  - Config   │  │  - key helpers  │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                    sled Database                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use forgechain_storage::{Storage, StateDb};
//! use forgechain_core::{Address, Hash};
//!
//! let storage = Storage::open("./chaindata").unwrap();
//! let mut state = StateDb::open(&storage, Hash::ZERO).unwrap();
//! state.add_balance(&Address([0xAA; 20]), 1_000_000);
//! let root = state.commit().unwrap();
//! ```

pub mod chain;
pub mod db;
pub mod state;
pub mod upgrade;

// Re-export commonly used types
pub use chain::{ChainStore, BLOCKCHAIN_VERSION};
pub use db::{BatchOp, KeyValueStore, Result, Storage, StorageError};
pub use state::{StateDb, StateObject};
pub use upgrade::{upgrade_legacy_blocks, UpgradeHandle};
