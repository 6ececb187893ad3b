//! Block execution engine.
//!
//! Applies a block's value transfers to a [`StateDb`], charges gas against
//! the coinbase gas pool, credits fees and rewards, and commits the result.

use forgechain_core::params::BLOCK_REWARD;
use forgechain_core::{Address, Block, Bloom, Hash, Header, Receipt, Transaction};
use forgechain_storage::StateDb;
use thiserror::Error;

/// Errors that can occur during execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("storage error: {0}")]
    Storage(#[from] forgechain_storage::StorageError),

    #[error("block gas limit reached (available {available}, required {required})")]
    GasLimitReached { available: u64, required: u64 },
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Result of executing a block.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
    /// Union of the receipt blooms.
    pub bloom: Bloom,
    /// Post-state root after rewards.
    pub state_root: Hash,
}

/// Block executor over one state transition.
pub struct Executor<'s, 'a> {
    state: &'s mut StateDb<'a>,
}

impl<'s, 'a> Executor<'s, 'a> {
    pub fn new(state: &'s mut StateDb<'a>) -> Self {
        Self { state }
    }

    /// Execute a single transaction mined by `coinbase`.
    ///
    /// Transactions with a wrong nonce, too little gas or too little balance
    /// produce a failed receipt and leave the state untouched. Running out
    /// of block gas fails the whole block.
    pub fn execute_transaction(
        &mut self,
        tx: &Transaction,
        coinbase: &Address,
        cumulative_gas_used: u64,
    ) -> Result<Receipt> {
        let failed = |gas_used| Receipt {
            tx_hash: tx.hash(),
            success: false,
            gas_used,
            cumulative_gas_used: cumulative_gas_used + gas_used,
            bloom: Bloom::default(),
        };

        let sender = self.state.get_account(&tx.from);
        if tx.nonce != sender.nonce {
            return Ok(failed(0));
        }
        if tx.gas_limit < tx.intrinsic_gas() {
            return Ok(failed(0));
        }
        let max_cost = tx.max_cost();
        if sender.balance < max_cost {
            return Ok(failed(0));
        }

        let available = self.state.gas_pool(coinbase);
        if available < tx.gas_limit {
            return Err(ExecutionError::GasLimitReached {
                available,
                required: tx.gas_limit,
            });
        }

        // Buy the full allowance up front, refund what is left afterwards.
        self.state.increment_nonce(&tx.from);
        self.state.sub_balance(&tx.from, max_cost)?;
        self.state.add_balance(&tx.to, tx.value);

        let gas_used = tx.intrinsic_gas();
        let refund = (tx.gas_limit - gas_used) as u128 * tx.gas_price as u128;
        self.state.add_balance(&tx.from, refund);

        let fee = gas_used as u128 * tx.gas_price as u128;
        let miner = self.state.get_or_new_state_object(coinbase);
        miner.add_balance(fee);
        miner.set_gas_pool(available - gas_used);

        let mut bloom = Bloom::default();
        bloom.add(tx.from.as_ref());
        bloom.add(tx.to.as_ref());

        Ok(Receipt {
            tx_hash: tx.hash(),
            success: true,
            gas_used,
            cumulative_gas_used: cumulative_gas_used + gas_used,
            bloom,
        })
    }

    /// Credit the block reward to the coinbase and uncle rewards to each
    /// uncle's coinbase.
    ///
    /// An uncle at depth `d` earns `(8 - d) / 8` of the reward and the
    /// including miner earns an extra `1/32` per uncle.
    pub fn accumulate_rewards(&mut self, header: &Header, uncles: &[Header]) {
        let mut reward = BLOCK_REWARD;
        for uncle in uncles {
            let depth_factor = (uncle.number + 8).saturating_sub(header.number) as u128;
            self.state
                .add_balance(&uncle.coinbase, depth_factor * BLOCK_REWARD / 8);
            reward += BLOCK_REWARD / 32;
        }
        self.state.add_balance(&header.coinbase, reward);
    }

    /// Execute every transaction of `block`, pay rewards and commit.
    pub fn execute_block(mut self, block: &Block) -> Result<ExecutionResult> {
        let coinbase = block.header.coinbase;
        self.state
            .get_or_new_state_object(&coinbase)
            .set_gas_pool(block.header.gas_limit);

        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut gas_used = 0;
        let mut bloom = Bloom::default();
        for tx in &block.transactions {
            let receipt = self.execute_transaction(tx, &coinbase, gas_used)?;
            gas_used = receipt.cumulative_gas_used;
            bloom.accrue(&receipt.bloom);
            receipts.push(receipt);
        }

        self.accumulate_rewards(&block.header, &block.uncles);
        let state_root = self.state.commit()?;

        Ok(ExecutionResult {
            receipts,
            gas_used,
            bloom,
            state_root,
        })
    }
}
