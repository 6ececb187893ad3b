//! Peer protocol management.
//!
//! Peers are not dialled in this node. The manager owns the pieces of the
//! wire protocol the rest of the node depends on: which protocol versions
//! are advertised, whether remote transactions are accepted, and the peer
//! budget handed over by [`crate::Node::start`].

use crate::config::SyncMode;
use forgechain_chain::{BlockChain, TxPool, TxPoolError};
use forgechain_core::Transaction;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Eth protocol versions, newest first.
pub const ETH63: u32 = 63;
pub const ETH62: u32 = 62;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no compatible protocol versions for sync mode {0}")]
    NoProtocols(SyncMode),

    #[error("protocol manager already started")]
    AlreadyStarted,
}

/// One advertised sub-protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    pub name: &'static str,
    pub version: u32,
    /// Number of message codes the version uses.
    pub length: u64,
}

impl Protocol {
    pub const fn eth(version: u32) -> Self {
        let length = if version == ETH63 { 17 } else { 8 };
        Self {
            name: "eth",
            version,
            length,
        }
    }
}

/// The peer-to-peer server a node is started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkServer {
    pub name: String,
    pub max_peers: usize,
    pub listening: bool,
}

impl NetworkServer {
    pub fn new(name: impl Into<String>, max_peers: usize) -> Self {
        Self {
            name: name.into(),
            max_peers,
            listening: true,
        }
    }
}

/// Serves light clients next to the full protocol.
pub trait LightServer: Send + Sync {
    fn protocols(&self) -> Vec<Protocol>;

    fn start(&self, server: &NetworkServer);

    fn stop(&self);
}

/// Network facts exposed over the `net` API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInfo {
    pub listening: bool,
    pub network_id: u64,
    pub max_peers: usize,
}

pub struct ProtocolManager {
    network_id: u64,
    sync_mode: SyncMode,
    sub_protocols: Vec<Protocol>,
    /// Remote transactions are dropped until this is raised.
    accept_txs: AtomicBool,
    max_peers: AtomicUsize,
    running: AtomicBool,
    tx_pool: Arc<TxPool>,
}

impl ProtocolManager {
    /// Fast sync is only possible on an empty chain; it falls back to full
    /// sync otherwise.
    pub fn new(
        sync_mode: SyncMode,
        network_id: u64,
        tx_pool: Arc<TxPool>,
        chain: &BlockChain,
    ) -> Result<Self, ProtocolError> {
        let mut sync_mode = sync_mode;
        if sync_mode == SyncMode::Fast && chain.current_block().number() > 0 {
            warn!("Blockchain not empty, fast sync disabled");
            sync_mode = SyncMode::Full;
        }

        let sub_protocols: Vec<Protocol> = match sync_mode {
            SyncMode::Full => vec![Protocol::eth(ETH63), Protocol::eth(ETH62)],
            // Fast sync needs state and receipt retrieval.
            SyncMode::Fast => vec![Protocol::eth(ETH63)],
            _ => Vec::new(),
        };
        if sub_protocols.is_empty() {
            return Err(ProtocolError::NoProtocols(sync_mode));
        }

        Ok(Self {
            network_id,
            sync_mode,
            sub_protocols,
            accept_txs: AtomicBool::new(false),
            max_peers: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            tx_pool,
        })
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    /// The effective sync mode after the fast sync check.
    pub fn sync_mode(&self) -> &SyncMode {
        &self.sync_mode
    }

    pub fn sub_protocols(&self) -> &[Protocol] {
        &self.sub_protocols
    }

    pub fn accept_txs(&self) -> bool {
        self.accept_txs.load(Ordering::Acquire)
    }

    pub fn set_accept_txs(&self, accept: bool) {
        self.accept_txs.store(accept, Ordering::Release);
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&self, max_peers: usize) -> Result<(), ProtocolError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyStarted);
        }
        self.max_peers.store(max_peers, Ordering::Release);
        info!(
            network = self.network_id,
            mode = %self.sync_mode,
            max_peers,
            "Starting protocol manager"
        );
        Ok(())
    }

    /// Feed transactions received from a peer into the pool. Returns how
    /// many were accepted.
    pub fn handle_transactions(&self, txs: Vec<Transaction>) -> usize {
        if !self.accept_txs() {
            debug!(count = txs.len(), "Dropping remote transactions, not synced");
            return 0;
        }
        let mut accepted = 0;
        for tx in txs {
            match self.tx_pool.add(tx) {
                Ok(_) => accepted += 1,
                Err(TxPoolError::Stopped) => break,
                Err(err) => debug!(%err, "Rejected remote transaction"),
            }
        }
        accepted
    }

    /// Stop accepting work. Idempotent.
    pub fn stop(&self) {
        self.accept_txs.store(false, Ordering::Release);
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Ethereum protocol stopped");
        }
    }
}
