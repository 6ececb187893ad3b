//! The full node: construction, lifecycle and mining control.

use crate::accounts::AccountManager;
use crate::apis::{node_apis, ApiDescriptor};
use crate::config::{NodeConfig, ServiceContext, SyncMode};
use crate::error::{NodeError, Result};
use crate::miner::Miner;
use crate::protocol::{LightServer, NetInfo, NetworkServer, Protocol, ProtocolManager};
use crate::shutdown::{StopStep, Teardown};
use bincode::Options;
use crossbeam_channel::{Receiver, Sender};
use forgechain_chain::bloombits::BLOOM_SERVICE_THREADS;
use forgechain_chain::{
    setup_genesis_block, start_bloom_handlers, BlockChain, ChainConfig, ChainIndexer, Event,
    EventHub, Retrieval, TxPool,
};
use forgechain_consensus::{create_consensus_engine, PowEngine};
use forgechain_core::params::MAXIMUM_EXTRA_DATA_SIZE;
use forgechain_core::{Address, Block};
use forgechain_storage::{upgrade_legacy_blocks, ChainStore, Storage, BLOCKCHAIN_VERSION};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Version packed into the default miner extra data.
fn node_version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) << 16
        | part(env!("CARGO_PKG_VERSION_MINOR")) << 8
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// The extra data the miner stamps into blocks.
///
/// Empty input selects the default `(version, "forgechain", os)` tuple.
/// Anything over the header limit is replaced by nothing.
pub fn make_extra_data(extra: &[u8]) -> Vec<u8> {
    let extra = if extra.is_empty() {
        bincode::DefaultOptions::new()
            .serialize(&(node_version(), "forgechain", std::env::consts::OS))
            .unwrap_or_default()
    } else {
        extra.to_vec()
    };
    if extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
        warn!(
            len = extra.len(),
            max = MAXIMUM_EXTRA_DATA_SIZE,
            "Miner extra data exceed limit"
        );
        return Vec::new();
    }
    extra
}

/// Values the miner reads and the operator may change at runtime.
struct MiningSettings {
    etherbase: Address,
    gas_price: u64,
}

struct Services {
    chain_config: ChainConfig,
    storage: Arc<Storage>,
    engine: Arc<dyn PowEngine>,
    blockchain: Arc<BlockChain>,
    bloom_indexer: Arc<ChainIndexer>,
    tx_pool: Arc<TxPool>,
    protocol_manager: Arc<ProtocolManager>,
    miner: Arc<Miner>,
}

/// A full proof-of-work node.
pub struct Node {
    config: NodeConfig,
    chain_config: ChainConfig,
    storage: Arc<Storage>,
    engine: Arc<dyn PowEngine>,
    events: Arc<EventHub>,
    accounts: Arc<AccountManager>,
    blockchain: Arc<BlockChain>,
    bloom_indexer: Arc<ChainIndexer>,
    tx_pool: Arc<TxPool>,
    protocol_manager: Arc<ProtocolManager>,
    miner: Arc<Miner>,
    light_server: RwLock<Option<Arc<dyn LightServer>>>,
    net_info: RwLock<Option<NetInfo>>,
    settings: RwLock<MiningSettings>,
    teardown: Mutex<Teardown>,
    shutdown: Receiver<()>,
}

impl Node {
    /// Assemble every service of a full node.
    ///
    /// If any step fails after the database is open, everything built so
    /// far is torn down before the error is returned.
    pub fn new(ctx: &ServiceContext, config: NodeConfig) -> Result<Self> {
        match &config.sync_mode {
            SyncMode::Light => return Err(NodeError::LightSyncMode),
            SyncMode::Unknown(mode) => return Err(NodeError::InvalidSyncMode(mode.clone())),
            SyncMode::Full | SyncMode::Fast => {}
        }

        let (mut teardown, shutdown) = Teardown::with_signal();
        let services = match Self::build(ctx, &config, &mut teardown) {
            Ok(services) => services,
            Err(err) => {
                error!(%err, "Failed to assemble node");
                teardown.run();
                return Err(err);
            }
        };

        Ok(Self {
            settings: RwLock::new(MiningSettings {
                etherbase: config.etherbase,
                gas_price: config.gas_price,
            }),
            config,
            chain_config: services.chain_config,
            storage: services.storage,
            engine: services.engine,
            events: ctx.events.clone(),
            accounts: ctx.accounts.clone(),
            blockchain: services.blockchain,
            bloom_indexer: services.bloom_indexer,
            tx_pool: services.tx_pool,
            protocol_manager: services.protocol_manager,
            miner: services.miner,
            light_server: RwLock::new(None),
            net_info: RwLock::new(None),
            teardown: Mutex::new(teardown),
            shutdown,
        })
    }

    fn build(ctx: &ServiceContext, config: &NodeConfig, teardown: &mut Teardown) -> Result<Services> {
        let storage = ctx.open_database("chaindata")?;
        teardown.storage = Some(storage.clone());
        teardown.events = Some(ctx.events.clone());
        teardown.db_upgrade = upgrade_legacy_blocks(storage.clone())?;

        let (chain_config, genesis_hash, compat) =
            setup_genesis_block(&storage, config.genesis.as_ref())?;
        info!(
            chain_id = chain_config.chain_id,
            genesis = %genesis_hash,
            "Initialised chain configuration"
        );

        if !config.skip_bc_version_check {
            let store = ChainStore::new(&storage);
            let stored = store.get_blockchain_version()?;
            if stored != 0 && stored != BLOCKCHAIN_VERSION {
                return Err(NodeError::VersionMismatch {
                    stored,
                    expected: BLOCKCHAIN_VERSION,
                });
            }
            store.write_blockchain_version(BLOCKCHAIN_VERSION)?;
        }

        let engine = create_consensus_engine(&config.engine_config(ctx), &ctx.shared_engine);
        let blockchain = Arc::new(BlockChain::new(
            storage.clone(),
            chain_config.clone(),
            engine.clone(),
            ctx.events.clone(),
        )?);
        teardown.blockchain = Some(blockchain.clone());

        if let Some(compat) = compat {
            warn!(err = %compat, "Rewinding chain to upgrade configuration");
            blockchain.set_head(compat.rewind_to)?;
            ChainStore::new(&storage).write_chain_config(&genesis_hash, &chain_config)?;
        }

        let bloom_indexer = Arc::new(ChainIndexer::new(
            storage.clone(),
            config.bloom_section_size,
            config.bloom_confirms,
        )?);
        teardown.bloom_indexer = Some(bloom_indexer.clone());
        bloom_indexer.start(
            &blockchain.current_header(),
            blockchain.subscribe_chain_events(),
        )?;

        let tx_pool = Arc::new(TxPool::new(
            config.tx_pool.clone(),
            config.gas_price,
            ctx.events.clone(),
        ));
        teardown.tx_pool = Some(tx_pool.clone());
        tx_pool.start(blockchain.clone())?;

        let protocol_manager = Arc::new(ProtocolManager::new(
            config.sync_mode.clone(),
            config.network_id,
            tx_pool.clone(),
            &blockchain,
        )?);
        teardown.protocol_manager = Some(protocol_manager.clone());

        let miner = Arc::new(Miner::new(
            blockchain.clone(),
            tx_pool.clone(),
            engine.clone(),
            ctx.events.clone(),
        ));
        teardown.miner = Some(miner.clone());
        miner.set_extra(make_extra_data(&config.extra_data))?;

        Ok(Services {
            chain_config,
            storage,
            engine,
            blockchain,
            bloom_indexer,
            tx_pool,
            protocol_manager,
            miner,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the network-facing services on `server`.
    ///
    /// When light clients are served, their peer slots come out of the full
    /// node budget, but never more than half of it.
    pub fn start(&self, server: &NetworkServer) -> Result<()> {
        {
            let mut teardown = self.teardown.lock();
            if teardown.is_done() {
                return Err(NodeError::Stopped);
            }
            teardown.bloom_handlers = Some(start_bloom_handlers(
                self.storage.clone(),
                BLOOM_SERVICE_THREADS,
            )?);
        }
        *self.net_info.write() = Some(NetInfo {
            listening: server.listening,
            network_id: self.config.network_id,
            max_peers: server.max_peers,
        });

        let mut max_peers = server.max_peers;
        if self.config.light_serv > 0 {
            max_peers = max_peers
                .saturating_sub(self.config.light_peers)
                .max(server.max_peers / 2);
        }
        self.protocol_manager.start(max_peers)?;

        if let Some(light) = self.light_server.read().as_ref() {
            light.start(server);
        }
        Ok(())
    }

    /// Stop every service in order. Returns the steps taken; later calls
    /// take none.
    pub fn stop(&self) -> Vec<StopStep> {
        self.teardown.lock().run()
    }

    pub fn is_stopped(&self) -> bool {
        self.teardown.lock().is_done()
    }

    /// Block until [`Node::stop`] has run.
    pub fn wait_for_shutdown(&self) {
        while self.shutdown.recv().is_ok() {}
    }

    /// Register the light client server. It is stopped with the node.
    pub fn add_light_server(&self, server: Arc<dyn LightServer>) {
        self.teardown.lock().light_server = Some(server.clone());
        *self.light_server.write() = Some(server);
    }

    // =========================================================================
    // Mining
    // =========================================================================

    /// The mining reward address: the configured one, else the first
    /// account of the first wallet holding one. The wallet fallback is
    /// resolved on every call and never stored; only
    /// [`Node::set_etherbase`] changes the configured address.
    pub fn etherbase(&self) -> Result<Address> {
        let etherbase = self.settings.read().etherbase;
        if !etherbase.is_zero() {
            return Ok(etherbase);
        }
        self.accounts.first_account().ok_or(NodeError::NoEtherbase)
    }

    pub fn set_etherbase(&self, etherbase: Address) {
        self.settings.write().etherbase = etherbase;
        self.miner.set_etherbase(etherbase);
        self.events.post(Event::NewEtherbase(etherbase));
    }

    /// Start mining in the background. `local` also opens the pool to
    /// remote transactions.
    pub fn start_mining(&self, local: bool) -> Result<()> {
        let etherbase = self.etherbase().map_err(|err| {
            error!(%err, "Cannot start mining without etherbase");
            NodeError::EtherbaseMissing(err.to_string())
        })?;
        if local {
            self.protocol_manager.set_accept_txs(true);
        }
        self.engine.set_search_enabled(true);

        let miner = self.miner.clone();
        thread::Builder::new()
            .name("miner-start".into())
            .spawn(move || {
                if let Err(err) = miner.start(etherbase) {
                    error!(%err, "Failed to start miner");
                }
            })?;
        Ok(())
    }

    pub fn stop_mining(&self) {
        self.miner.stop();
    }

    pub fn is_mining(&self) -> bool {
        self.miner.mining()
    }

    pub fn gas_price(&self) -> u64 {
        self.settings.read().gas_price
    }

    /// Change the minimum accepted gas price of the node and its pool.
    pub fn set_gas_price(&self, price: u64) {
        self.settings.write().gas_price = price;
        self.tx_pool.set_gas_price(price);
    }

    // =========================================================================
    // Chain
    // =========================================================================

    pub fn reset_with_genesis_block(&self, genesis: &Block) -> Result<()> {
        Ok(self.blockchain.reset_with_genesis_block(genesis)?)
    }

    /// Queue for bloom bit retrievals, available between start and stop.
    /// Clones must be dropped before [`Node::stop`], which waits for the
    /// workers to drain the queue.
    pub fn bloom_requests(&self) -> Option<Sender<Retrieval>> {
        self.teardown
            .lock()
            .bloom_handlers
            .as_ref()
            .and_then(|h| h.requests())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub fn account_manager(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    pub fn blockchain(&self) -> &Arc<BlockChain> {
        &self.blockchain
    }

    pub fn tx_pool(&self) -> &Arc<TxPool> {
        &self.tx_pool
    }

    pub fn engine(&self) -> &Arc<dyn PowEngine> {
        &self.engine
    }

    pub fn miner(&self) -> &Arc<Miner> {
        &self.miner
    }

    pub fn event_hub(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn chain_db(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn protocol_manager(&self) -> &Arc<ProtocolManager> {
        &self.protocol_manager
    }

    pub fn bloom_indexer(&self) -> &Arc<ChainIndexer> {
        &self.bloom_indexer
    }

    pub fn is_listening(&self) -> bool {
        self.net_info.read().as_ref().is_some_and(|n| n.listening)
    }

    pub fn net_info(&self) -> Option<NetInfo> {
        self.net_info.read().clone()
    }

    pub fn net_version(&self) -> u64 {
        self.config.network_id
    }

    /// Protocols advertised to peers, light protocols included.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols = self.protocol_manager.sub_protocols().to_vec();
        if let Some(light) = self.light_server.read().as_ref() {
            protocols.extend(light.protocols());
        }
        protocols
    }

    pub fn apis(&self) -> Vec<ApiDescriptor> {
        node_apis()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
