//! Node configuration and the service context handed to [`crate::Node::new`].

use crate::accounts::AccountManager;
use crate::error::Result;
use forgechain_chain::{EventHub, Genesis, TxPoolConfig};
use forgechain_consensus::{EngineConfig, PowConfig, RemoteSealer, SharedEngine};
use forgechain_core::params::{BLOOM_BITS_BLOCKS, BLOOM_CONFIRMS};
use forgechain_core::Address;
use forgechain_storage::Storage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// How the node synchronises with the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Full,
    Fast,
    Light,
    /// Anything else found in a config file; rejected at start-up.
    #[serde(untagged)]
    Unknown(String),
}

impl SyncMode {
    pub fn is_valid(&self) -> bool {
        !matches!(self, SyncMode::Unknown(_))
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Fast => write!(f, "fast"),
            SyncMode::Light => write!(f, "light"),
            SyncMode::Unknown(mode) => write!(f, "{}", mode),
        }
    }
}

impl FromStr for SyncMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "full" => SyncMode::Full,
            "fast" => SyncMode::Fast,
            "light" => SyncMode::Light,
            other => SyncMode::Unknown(other.to_string()),
        })
    }
}

/// Every option of a full node. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root for all node data; an in-memory database is used when unset.
    pub data_dir: Option<PathBuf>,
    /// Genesis to initialise an empty database with.
    pub genesis: Option<Genesis>,
    pub sync_mode: SyncMode,
    pub network_id: u64,
    pub skip_bc_version_check: bool,

    /// Percentage of peer slots reserved for light clients.
    pub light_serv: u32,
    pub light_peers: usize,

    pub pow_fake: bool,
    pub pow_test: bool,
    pub pow_shared: bool,
    pub ethash_cache_dir: Option<PathBuf>,
    pub ethash_caches_in_mem: usize,
    pub ethash_caches_on_disk: usize,
    pub ethash_dataset_dir: Option<PathBuf>,
    pub ethash_datasets_in_mem: usize,
    pub ethash_datasets_on_disk: usize,
    pub pow_gpu: bool,
    pub gpu_port: u16,
    pub gpu_get_port: u16,

    pub etherbase: Address,
    pub gas_price: u64,
    pub extra_data: Vec<u8>,

    pub tx_pool: TxPoolConfig,
    pub bloom_section_size: u64,
    pub bloom_confirms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            genesis: None,
            sync_mode: SyncMode::Full,
            network_id: 1,
            skip_bc_version_check: false,
            light_serv: 0,
            light_peers: 20,
            pow_fake: false,
            pow_test: false,
            pow_shared: false,
            ethash_cache_dir: Some(PathBuf::from("ethash")),
            ethash_caches_in_mem: 2,
            ethash_caches_on_disk: 3,
            ethash_dataset_dir: None,
            ethash_datasets_in_mem: 1,
            ethash_datasets_on_disk: 2,
            pow_gpu: false,
            gpu_port: 0,
            gpu_get_port: 0,
            etherbase: Address::ZERO,
            gas_price: 18_000_000_000,
            extra_data: Vec::new(),
            tx_pool: TxPoolConfig::default(),
            bloom_section_size: BLOOM_BITS_BLOCKS,
            bloom_confirms: BLOOM_CONFIRMS,
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The consensus engine settings, with directories resolved against
    /// the node's data directory.
    pub fn engine_config(&self, ctx: &ServiceContext) -> EngineConfig {
        let gpu = self.pow_gpu.then_some(RemoteSealer {
            port: self.gpu_port,
            get_port: self.gpu_get_port,
        });
        EngineConfig {
            pow_fake: self.pow_fake,
            pow_test: self.pow_test,
            pow_shared: self.pow_shared,
            pow: PowConfig {
                cache_dir: ctx.resolve_path(self.ethash_cache_dir.as_deref()),
                caches_in_mem: self.ethash_caches_in_mem,
                caches_on_disk: self.ethash_caches_on_disk,
                dataset_dir: self.ethash_dataset_dir.clone(),
                datasets_in_mem: self.ethash_datasets_in_mem,
                datasets_on_disk: self.ethash_datasets_on_disk,
                gpu,
            },
        }
    }
}

/// What the hosting process provides to the node.
pub struct ServiceContext {
    pub data_dir: Option<PathBuf>,
    pub events: Arc<EventHub>,
    pub accounts: Arc<AccountManager>,
    /// Engine used when `pow_shared` is set.
    pub shared_engine: SharedEngine,
}

impl ServiceContext {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            events: Arc::new(EventHub::new()),
            accounts: Arc::new(AccountManager::new()),
            shared_engine: SharedEngine::new(),
        }
    }

    /// A context without a data directory: in-memory database, no disk
    /// caches.
    pub fn ephemeral() -> Self {
        Self::new(None)
    }

    /// `path` relative to the data directory. Without a data directory
    /// relative paths resolve to nothing.
    pub fn resolve_path(&self, path: Option<&Path>) -> Option<PathBuf> {
        let path = path?;
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        self.data_dir.as_ref().map(|dir| dir.join(path))
    }

    /// Open the database `name` under the data directory.
    pub fn open_database(&self, name: &str) -> Result<Arc<Storage>> {
        let storage = match &self.data_dir {
            Some(dir) => Storage::open(dir.join(name))?,
            None => Storage::open_temporary()?,
        };
        Ok(Arc::new(storage))
    }
}
