//! Core proof-of-work chain primitives for forgechain.
//!
//! This crate provides the fundamental types used throughout the node:
//! - Cryptographic primitives (hashing, signing, addresses)
//! - Account state
//! - Transactions and receipts
//! - Block headers, blocks and total difficulty
//! - Header blooms and merkle roots
//! - Protocol parameters (block reward, gas limit bounds, difficulty bounds)

pub mod account;
pub mod block;
pub mod bloom;
pub mod crypto;
pub mod hash;
pub mod merkle;
pub mod params;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use account::Account;
pub use block::{Block, Header, Receipt};
pub use bloom::Bloom;
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use hash::{hash, hash_concat, Hash, H256};
pub use merkle::{merkle_root, ordered_root};
pub use transaction::{Transaction, TransactionError};
