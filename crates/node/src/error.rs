use crate::miner::MinerError;
use crate::protocol::ProtocolError;
use forgechain_chain::{BlockchainError, GenesisError};
use forgechain_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by node construction and control.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("can't run a full node in light sync mode, use a light client")]
    LightSyncMode,

    #[error("invalid sync mode {0}")]
    InvalidSyncMode(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("genesis error: {0}")]
    Genesis(#[from] GenesisError),

    #[error("blockchain DB version mismatch ({stored} / {expected}), run an upgrade or resync")]
    VersionMismatch { stored: u32, expected: u32 },

    #[error("blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("miner error: {0}")]
    Miner(#[from] MinerError),

    #[error("etherbase address must be explicitly specified")]
    NoEtherbase,

    #[error("etherbase missing: {0}")]
    EtherbaseMissing(String),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("node is stopped")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
