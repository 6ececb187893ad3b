//! Block headers, blocks and receipts.

use crate::bloom::Bloom;
use crate::crypto::Address;
use crate::hash::{hash, Hash};
use crate::merkle::ordered_root;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The header of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the parent block's header.
    pub parent_hash: Hash,
    /// Hash of the uncle list.
    pub uncle_hash: Hash,
    /// Beneficiary of the block reward.
    pub coinbase: Address,
    /// Root of the world state after this block.
    pub state_root: Hash,
    /// Merkle root of the transactions.
    pub tx_root: Hash,
    /// Merkle root of the receipts.
    pub receipt_root: Hash,
    /// Bloom over every address touched by the block.
    pub bloom: Bloom,
    pub difficulty: u64,
    /// Block number (0 for genesis).
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Free-form miner data, at most `MAXIMUM_EXTRA_DATA_SIZE` bytes.
    pub extra_data: Vec<u8>,
    /// Proof-of-work mix digest.
    pub mix_digest: Hash,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

/// The header fields committed to by the proof of work.
#[derive(Serialize)]
struct SealFields<'a> {
    parent_hash: &'a Hash,
    uncle_hash: &'a Hash,
    coinbase: &'a Address,
    state_root: &'a Hash,
    tx_root: &'a Hash,
    receipt_root: &'a Hash,
    bloom: &'a Bloom,
    difficulty: u64,
    number: u64,
    gas_limit: u64,
    gas_used: u64,
    timestamp: u64,
    extra_data: &'a [u8],
}

impl Header {
    /// Hash of the full header, seal included.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Hash of the header without the seal, the input to the proof of work.
    pub fn seal_hash(&self) -> Hash {
        let fields = SealFields {
            parent_hash: &self.parent_hash,
            uncle_hash: &self.uncle_hash,
            coinbase: &self.coinbase,
            state_root: &self.state_root,
            tx_root: &self.tx_root,
            receipt_root: &self.receipt_root,
            bloom: &self.bloom,
            difficulty: self.difficulty,
            number: self.number,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            timestamp: self.timestamp,
            extra_data: &self.extra_data,
        };
        let encoded = bincode::serialize(&fields).expect("serialization should not fail");
        hash(&encoded)
    }

    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Outcome of one executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub success: bool,
    pub gas_used: u64,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    pub bloom: Bloom,
}

/// A block with its body and the total difficulty of the chain it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
    pub receipts: Vec<Receipt>,
    /// Sum of difficulties from genesis up to this block. Computed relative
    /// to the parent and stored alongside the block.
    pub total_difficulty: u128,
}

impl Block {
    /// Build a block from a header and body, filling in the body commitments.
    pub fn new(
        mut header: Header,
        transactions: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: Vec<Receipt>,
    ) -> Self {
        header.tx_root = ordered_root(&transactions);
        header.uncle_hash = ordered_root(&uncles);
        header.receipt_root = ordered_root(&receipts);
        Self {
            header,
            transactions,
            uncles,
            receipts,
            total_difficulty: 0,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn state_root(&self) -> Hash {
        self.header.state_root
    }

    pub fn difficulty(&self) -> u64 {
        self.header.difficulty
    }

    pub fn is_genesis(&self) -> bool {
        self.header.number == 0 && self.header.parent_hash == Hash::ZERO
    }

    pub fn set_root(&mut self, root: Hash) {
        self.header.state_root = root;
    }

    pub fn set_transactions(&mut self, transactions: Vec<Transaction>) {
        self.header.tx_root = ordered_root(&transactions);
        self.transactions = transactions;
    }

    pub fn set_uncles(&mut self, uncles: Vec<Header>) {
        self.header.uncle_hash = ordered_root(&uncles);
        self.uncles = uncles;
    }

    pub fn set_receipts(&mut self, receipts: Vec<Receipt>) {
        self.header.receipt_root = ordered_root(&receipts);
        self.receipts = receipts;
    }

    /// Replace the seal fields after a successful search.
    pub fn with_seal(mut self, nonce: u64, mix_digest: Hash) -> Self {
        self.header.nonce = nonce;
        self.header.mix_digest = mix_digest;
        self
    }

    /// Check the body against the header commitments.
    pub fn verify_body_roots(&self) -> bool {
        self.header.tx_root == ordered_root(&self.transactions)
            && self.header.uncle_hash == ordered_root(&self.uncles)
    }
}
