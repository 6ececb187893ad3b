//! Pending transaction pool.
//!
//! [`Mempool`] is the plain indexed store; [`TxPool`] wraps it in a mutex,
//! enforces the price floor and signatures, announces new transactions on
//! the event hub and refuses work once stopped.
//!
//! Once attached to a chain with [`TxPool::start`], admission also checks
//! the sender's nonce and balance at the head, and every head change
//! evicts transactions that can no longer be included.

use crate::blockchain::BlockChain;
use crate::event::{Event, EventHub, TxPreEvent};
use crossbeam_channel::{bounded, select, Sender};
use forgechain_core::{Address, Hash, Transaction, TransactionError};
use forgechain_storage::StateDb;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during pool operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxPoolError {
    #[error("transaction already in pool")]
    DuplicateTransaction,

    #[error("pool is full (capacity: {0})")]
    PoolFull(usize),

    #[error("transaction not found in pool")]
    TransactionNotFound,

    #[error("gas price {offered} below pool minimum {minimum}")]
    Underpriced { offered: u64, minimum: u64 },

    #[error("gas limit {limit} below intrinsic gas {intrinsic}")]
    IntrinsicGas { limit: u64, intrinsic: u64 },

    #[error("invalid sender: {0}")]
    InvalidSender(String),

    #[error("nonce too low: account at {expected}, transaction has {nonce}")]
    NonceTooLow { nonce: u64, expected: u64 },

    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: u128, cost: u128 },

    #[error("transaction pool is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, TxPoolError>;

/// Configuration for the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPoolConfig {
    pub max_transactions: usize,
    pub max_per_account: usize,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 4096,
            max_per_account: 64,
        }
    }
}

/// Indexed transaction store without locking or policy.
#[derive(Default)]
pub struct Mempool {
    config: TxPoolConfig,
    transactions: HashMap<Hash, Transaction>,
    /// Per-sender transaction hashes keyed by nonce.
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
}

impl Mempool {
    pub fn with_config(config: TxPoolConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &Hash) -> Option<&Transaction> {
        self.transactions.get(tx_hash)
    }

    /// Insert `tx`. A transaction with the same sender and nonce but a
    /// higher gas price replaces the old one.
    pub fn add(&mut self, tx: Transaction) -> Result<Hash> {
        let tx_hash = tx.hash();
        if self.contains(&tx_hash) {
            return Err(TxPoolError::DuplicateTransaction);
        }

        let replaced = self
            .by_sender
            .get(&tx.from)
            .and_then(|queue| queue.get(&tx.nonce))
            .copied();
        match replaced {
            Some(old) => {
                let old_price = self.transactions.get(&old).map(|t| t.gas_price).unwrap_or(0);
                if tx.gas_price <= old_price {
                    return Err(TxPoolError::Underpriced {
                        offered: tx.gas_price,
                        minimum: old_price + 1,
                    });
                }
                self.transactions.remove(&old);
            }
            None => {
                if self.transactions.len() >= self.config.max_transactions {
                    return Err(TxPoolError::PoolFull(self.config.max_transactions));
                }
                let queued = self.by_sender.get(&tx.from).map_or(0, |q| q.len());
                if queued >= self.config.max_per_account {
                    return Err(TxPoolError::PoolFull(self.config.max_per_account));
                }
            }
        }

        self.by_sender
            .entry(tx.from)
            .or_default()
            .insert(tx.nonce, tx_hash);
        self.transactions.insert(tx_hash, tx);
        Ok(tx_hash)
    }

    pub fn remove(&mut self, tx_hash: &Hash) -> Result<Transaction> {
        let tx = self
            .transactions
            .remove(tx_hash)
            .ok_or(TxPoolError::TransactionNotFound)?;

        if let Some(queue) = self.by_sender.get_mut(&tx.from) {
            queue.remove(&tx.nonce);
            if queue.is_empty() {
                self.by_sender.remove(&tx.from);
            }
        }
        Ok(tx)
    }

    /// Remove every hash in `tx_hashes` that is present.
    pub fn remove_batch(&mut self, tx_hashes: &[Hash]) {
        for hash in tx_hashes {
            let _ = self.remove(hash);
        }
    }

    /// Transactions of `sender` in nonce order.
    pub fn get_by_sender(&self, sender: &Address) -> Vec<Transaction> {
        self.by_sender
            .get(sender)
            .map(|queue| {
                queue
                    .values()
                    .filter_map(|h| self.transactions.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Up to `limit` transactions for a new block.
    ///
    /// Each sender's transactions stay in nonce order; between senders the
    /// next transaction with the highest gas price goes first.
    pub fn get_pending(&self, limit: usize) -> Vec<Transaction> {
        let mut queues: Vec<Vec<&Transaction>> = self
            .by_sender
            .values()
            .map(|queue| {
                queue
                    .values()
                    .rev()
                    .filter_map(|h| self.transactions.get(h))
                    .collect()
            })
            .collect();

        let mut pending = Vec::new();
        while pending.len() < limit {
            let best = queues
                .iter()
                .enumerate()
                .filter_map(|(i, q)| q.last().map(|tx| (i, tx.gas_price)))
                .max_by_key(|(_, price)| *price);
            let Some((index, _)) = best else { break };
            if let Some(tx) = queues[index].pop() {
                pending.push(tx.clone());
            }
        }
        pending
    }

    /// Drop every transaction that can no longer be included: nonce below
    /// the sender's account nonce, or a cost above its balance. `account`
    /// yields `(nonce, balance)` for a sender. Returns how many were dropped.
    pub fn demote_unexecutables<F>(&mut self, account: F) -> usize
    where
        F: Fn(&Address) -> (u64, u128),
    {
        let mut stale = Vec::new();
        for (sender, queue) in &self.by_sender {
            let (nonce, balance) = account(sender);
            for (tx_nonce, hash) in queue {
                let too_costly = self
                    .transactions
                    .get(hash)
                    .is_some_and(|tx| tx.max_cost() > balance);
                if *tx_nonce < nonce || too_costly {
                    stale.push(*hash);
                }
            }
        }
        self.remove_batch(&stale);
        stale.len()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
        self.by_sender.clear();
    }

    pub fn stats(&self) -> TxPoolStats {
        TxPoolStats {
            total_transactions: self.len(),
            unique_senders: self.by_sender.len(),
            capacity: self.config.max_transactions,
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPoolStats {
    pub total_transactions: usize,
    pub unique_senders: usize,
    pub capacity: usize,
}

/// The node's shared transaction pool.
pub struct TxPool {
    pool: Mutex<Mempool>,
    gas_price: AtomicU64,
    events: Arc<EventHub>,
    /// Chain whose head state admission is checked against.
    chain: RwLock<Option<Arc<BlockChain>>>,
    /// Quit signal and handle of the head-reset worker.
    head_loop: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
    stopped: AtomicBool,
}

impl TxPool {
    pub fn new(config: TxPoolConfig, gas_price: u64, events: Arc<EventHub>) -> Self {
        Self {
            pool: Mutex::new(Mempool::with_config(config)),
            gas_price: AtomicU64::new(gas_price),
            events,
            chain: RwLock::new(None),
            head_loop: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Attach the pool to `chain`: admission is checked against the head
    /// state, and a `txpool-reset` worker evicts stale transactions on
    /// every head change until [`TxPool::stop`].
    pub fn start(self: &Arc<Self>, chain: Arc<BlockChain>) -> io::Result<()> {
        let mut head_loop = self.head_loop.lock();
        if head_loop.is_some() || self.is_stopped() {
            return Ok(());
        }
        *self.chain.write() = Some(chain.clone());

        let heads = chain.subscribe_chain_events();
        let (quit_tx, quit_rx) = bounded::<()>(0);
        let pool = Arc::downgrade(self);
        let worker = thread::Builder::new()
            .name("txpool-reset".into())
            .spawn(move || loop {
                select! {
                    recv(heads.receiver()) -> event => match event {
                        Ok(Event::ChainHead(head)) => {
                            let Some(pool) = Weak::upgrade(&pool) else { break };
                            match chain.state_at(head.block.state_root()) {
                                Ok(state) => {
                                    pool.reset(&state);
                                }
                                Err(err) => warn!(%err, "Cannot open head state for pool reset"),
                            }
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    },
                    recv(quit_rx) -> _ => break,
                }
            })?;
        *head_loop = Some((quit_tx, worker));
        Ok(())
    }

    /// Validate and queue `tx`, then post a [`TxPreEvent`].
    pub fn add(&self, tx: Transaction) -> Result<Hash> {
        if self.is_stopped() {
            return Err(TxPoolError::Stopped);
        }
        tx.verify()
            .map_err(|err: TransactionError| TxPoolError::InvalidSender(err.to_string()))?;
        let minimum = self.gas_price();
        if tx.gas_price < minimum {
            return Err(TxPoolError::Underpriced {
                offered: tx.gas_price,
                minimum,
            });
        }
        if tx.gas_limit < tx.intrinsic_gas() {
            return Err(TxPoolError::IntrinsicGas {
                limit: tx.gas_limit,
                intrinsic: tx.intrinsic_gas(),
            });
        }
        if let Some(chain) = self.chain.read().as_ref() {
            let head = chain.current_block();
            match chain.state_at(head.state_root()) {
                Ok(state) => check_account(&state, &tx)?,
                Err(err) => warn!(%err, "Cannot open head state for admission"),
            }
        }

        let hash = self.pool.lock().add(tx.clone())?;
        debug!(%hash, from = %tx.from, nonce = tx.nonce, "Pooled new transaction");
        self.events.post(Event::TxPre(TxPreEvent { tx }));
        Ok(hash)
    }

    /// Evict every transaction `state` makes unexecutable. Returns how many
    /// were dropped.
    pub fn reset(&self, state: &StateDb<'_>) -> usize {
        let dropped = self
            .pool
            .lock()
            .demote_unexecutables(|sender| (state.get_nonce(sender), state.get_balance(sender)));
        if dropped > 0 {
            debug!(dropped, root = %state.root(), "Evicted stale pool transactions");
        }
        dropped
    }

    pub fn pending(&self, limit: usize) -> Vec<Transaction> {
        self.pool.lock().get_pending(limit)
    }

    pub fn remove_batch(&self, tx_hashes: &[Hash]) {
        self.pool.lock().remove_batch(tx_hashes);
    }

    pub fn get(&self, tx_hash: &Hash) -> Option<Transaction> {
        self.pool.lock().get(tx_hash).cloned()
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.pool.lock().contains(tx_hash)
    }

    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    pub fn stats(&self) -> TxPoolStats {
        self.pool.lock().stats()
    }

    /// Minimum gas price for new transactions.
    pub fn gas_price(&self) -> u64 {
        self.gas_price.load(Ordering::Acquire)
    }

    pub fn set_gas_price(&self, price: u64) {
        self.gas_price.store(price, Ordering::Release);
        info!(price, "Transaction pool price threshold updated");
    }

    /// Drop every queued transaction and refuse new ones. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some((quit, worker)) = self.head_loop.lock().take() {
            drop(quit);
            let _ = worker.join();
        }
        self.chain.write().take();
        self.pool.lock().clear();
        info!("Transaction pool stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

fn check_account(state: &StateDb<'_>, tx: &Transaction) -> Result<()> {
    let expected = state.get_nonce(&tx.from);
    if tx.nonce < expected {
        return Err(TxPoolError::NonceTooLow {
            nonce: tx.nonce,
            expected,
        });
    }
    let balance = state.get_balance(&tx.from);
    let cost = tx.max_cost();
    if cost > balance {
        return Err(TxPoolError::InsufficientFunds { balance, cost });
    }
    Ok(())
}
