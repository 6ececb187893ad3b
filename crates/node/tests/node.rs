//! Node assembly, lifecycle and mining control.

use forgechain_chain::genesis::GenesisAccount;
use forgechain_chain::{
    make_block_with_txs, make_chain, setup_genesis_block, BlockChain, ChainConfig, Event,
    EventHub, Genesis, TxPoolError,
};
use forgechain_consensus::Faker;
use forgechain_core::params::MAXIMUM_EXTRA_DATA_SIZE;
use forgechain_core::{Address, Keypair, Transaction};
use forgechain_node::{
    LightServer, NetworkServer, Node, NodeConfig, NodeError, Protocol, ServiceContext, StopStep,
    SyncMode, Wallet,
};
use forgechain_storage::{ChainStore, KeyValueStore, Storage, BLOCKCHAIN_VERSION};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fake_config() -> NodeConfig {
    NodeConfig {
        pow_fake: true,
        ..Default::default()
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[derive(Default)]
struct RecordingLightServer {
    calls: Mutex<Vec<&'static str>>,
}

impl LightServer for RecordingLightServer {
    fn protocols(&self) -> Vec<Protocol> {
        vec![Protocol {
            name: "les",
            version: 1,
            length: 15,
        }]
    }

    fn start(&self, _server: &NetworkServer) {
        self.calls.lock().push("start");
    }

    fn stop(&self) {
        self.calls.lock().push("stop");
    }
}

#[test]
fn test_rejects_light_and_unknown_sync_modes() {
    let ctx = ServiceContext::ephemeral();

    let light = NodeConfig {
        sync_mode: SyncMode::Light,
        ..fake_config()
    };
    assert!(matches!(
        Node::new(&ctx, light),
        Err(NodeError::LightSyncMode)
    ));

    let unknown = NodeConfig {
        sync_mode: SyncMode::Unknown("warp".into()),
        ..fake_config()
    };
    match Node::new(&ctx, unknown) {
        Err(NodeError::InvalidSyncMode(mode)) => assert_eq!(mode, "warp"),
        other => panic!("unexpected result: {:?}", other.err()),
    }
}

#[test]
fn test_fresh_node_has_default_genesis() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(&ctx, fake_config()).unwrap();

    let chain = node.blockchain();
    assert_eq!(chain.current_block().number(), 0);
    assert_eq!(node.engine().name(), "fake");
    assert_eq!(node.chain_config(), &ChainConfig::default());
    assert_eq!(
        ChainStore::new(node.chain_db()).get_blockchain_version().unwrap(),
        BLOCKCHAIN_VERSION
    );
    assert!(!node.miner().extra().is_empty());
    assert_eq!(node.apis().len(), 9);
}

#[test]
fn test_etherbase_resolution() {
    let configured = Address([0xEE; 20]);
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(
        &ctx,
        NodeConfig {
            etherbase: configured,
            ..fake_config()
        },
    )
    .unwrap();
    assert_eq!(node.etherbase().unwrap(), configured);

    let ctx = ServiceContext::ephemeral();
    let node = Node::new(&ctx, fake_config()).unwrap();
    assert!(matches!(node.etherbase(), Err(NodeError::NoEtherbase)));

    node.account_manager().add_wallet(Wallet::new("empty"));
    let keystore = node.account_manager().add_wallet(Wallet::new("keystore"));
    let first = keystore.new_account();
    keystore.new_account();
    assert_eq!(node.etherbase().unwrap(), first);
}

#[test]
fn test_configured_etherbase_wins_over_wallet_fallback() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(&ctx, fake_config()).unwrap();
    let keystore = node.account_manager().add_wallet(Wallet::new("keystore"));
    let wallet_account = keystore.new_account();
    let events = node.event_hub().subscribe();

    assert_eq!(node.etherbase().unwrap(), wallet_account);
    assert_eq!(node.config().etherbase, Address::ZERO);

    let configured = Address([0x42; 20]);
    node.set_etherbase(configured);
    assert_eq!(node.etherbase().unwrap(), configured);
    assert_eq!(node.miner().etherbase(), configured);
    assert_eq!(node.etherbase().unwrap(), configured);

    let posted: Vec<Event> = events.receiver().try_iter().collect();
    assert!(posted
        .iter()
        .any(|event| matches!(event, Event::NewEtherbase(addr) if *addr == configured)));
}

#[test]
fn test_start_mining_needs_etherbase() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(&ctx, fake_config()).unwrap();

    let err = node.start_mining(true).unwrap_err();
    assert!(matches!(err, NodeError::EtherbaseMissing(_)));
    assert!(err.to_string().starts_with("etherbase missing"));
    assert!(!node.protocol_manager().accept_txs());
}

#[test]
fn test_local_mining_accepts_txs_and_produces_blocks() {
    let ctx = ServiceContext::ephemeral();
    let coinbase = Address([0xCB; 20]);
    let node = Node::new(
        &ctx,
        NodeConfig {
            etherbase: coinbase,
            ..fake_config()
        },
    )
    .unwrap();
    assert!(!node.protocol_manager().accept_txs());

    node.start_mining(true).unwrap();
    assert!(node.protocol_manager().accept_txs());
    assert!(node.engine().search_enabled());

    assert!(wait_until(|| node.blockchain().current_block().number() >= 1));
    assert!(node.is_mining());
    node.stop_mining();
    assert!(!node.is_mining());

    let block = node.blockchain().get_block_by_number(1).unwrap().unwrap();
    assert_eq!(block.header.coinbase, coinbase);
    assert_eq!(block.header.extra_data, node.miner().extra());
}

#[test]
fn test_remote_mining_leaves_accept_txs_alone() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(
        &ctx,
        NodeConfig {
            etherbase: Address([1; 20]),
            ..fake_config()
        },
    )
    .unwrap();
    node.start_mining(false).unwrap();
    assert!(!node.protocol_manager().accept_txs());
    assert!(wait_until(|| node.is_mining()));
    node.stop_mining();
}

#[test]
fn test_stop_order_and_double_stop() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(&ctx, fake_config()).unwrap();
    let light = Arc::new(RecordingLightServer::default());
    node.add_light_server(light.clone());
    node.start(&NetworkServer::new("test", 25)).unwrap();
    assert!(node.bloom_requests().is_some());

    assert_eq!(
        node.stop(),
        vec![
            StopStep::BloomIndexer,
            StopStep::Blockchain,
            StopStep::ProtocolManager,
            StopStep::LightServer,
            StopStep::TxPool,
            StopStep::Miner,
            StopStep::EventHub,
            StopStep::Database,
            StopStep::Shutdown,
        ]
    );
    assert!(node.stop().is_empty());
    assert!(node.is_stopped());

    assert_eq!(*light.calls.lock(), vec!["start", "stop"]);
    assert!(ctx.events.is_stopped());
    assert!(node.chain_db().is_closed());
    assert!(node.blockchain().is_stopped());
    assert!(node.tx_pool().is_stopped());
    assert!(node.bloom_requests().is_none());
    assert!(matches!(
        node.start(&NetworkServer::new("test", 25)),
        Err(NodeError::Stopped)
    ));
}

#[test]
fn test_wait_for_shutdown_wakes_on_stop() {
    let ctx = ServiceContext::ephemeral();
    let node = Arc::new(Node::new(&ctx, fake_config()).unwrap());

    let waiter = {
        let node = node.clone();
        thread::spawn(move || node.wait_for_shutdown())
    };
    node.stop();
    waiter.join().unwrap();
}

#[test]
fn test_light_peers_come_out_of_budget() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(
        &ctx,
        NodeConfig {
            light_serv: 50,
            light_peers: 20,
            ..fake_config()
        },
    )
    .unwrap();
    node.add_light_server(Arc::new(RecordingLightServer::default()));
    node.start(&NetworkServer::new("test", 50)).unwrap();
    assert_eq!(node.protocol_manager().max_peers(), 30);
    assert_eq!(node.protocols().len(), 3);
    assert_eq!(node.net_info().unwrap().max_peers, 50);
    assert!(node.is_listening());

    let ctx = ServiceContext::ephemeral();
    let node = Node::new(
        &ctx,
        NodeConfig {
            light_serv: 50,
            light_peers: 40,
            ..fake_config()
        },
    )
    .unwrap();
    node.start(&NetworkServer::new("test", 50)).unwrap();
    assert_eq!(node.protocol_manager().max_peers(), 25);
}

#[test]
fn test_oversized_extra_data_is_dropped() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(
        &ctx,
        NodeConfig {
            extra_data: vec![0xAB; MAXIMUM_EXTRA_DATA_SIZE + 1],
            ..fake_config()
        },
    )
    .unwrap();
    assert!(node.miner().extra().is_empty());
}

#[test]
fn test_shared_engine_is_reused() {
    let ctx = ServiceContext::ephemeral();
    let config = NodeConfig {
        pow_shared: true,
        ..Default::default()
    };
    let node = Node::new(&ctx, config).unwrap();
    assert_eq!(node.engine().name(), "shared");
}

fn write_version(dir: &Path, version: u32) {
    let storage = Storage::open(dir.join("chaindata")).unwrap();
    ChainStore::new(&storage)
        .write_blockchain_version(version)
        .unwrap();
    storage.close().unwrap();
}

#[test]
fn test_version_mismatch_is_fatal_unless_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_version(dir.path(), BLOCKCHAIN_VERSION - 1);

    let ctx = ServiceContext::new(Some(dir.path().to_path_buf()));
    match Node::new(&ctx, fake_config()) {
        Err(NodeError::VersionMismatch { stored, expected }) => {
            assert_eq!(stored, BLOCKCHAIN_VERSION - 1);
            assert_eq!(expected, BLOCKCHAIN_VERSION);
        }
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert!(ctx.events.is_stopped());

    let ctx = ServiceContext::new(Some(dir.path().to_path_buf()));
    let node = Node::new(
        &ctx,
        NodeConfig {
            skip_bc_version_check: true,
            ..fake_config()
        },
    )
    .unwrap();
    assert_eq!(
        ChainStore::new(node.chain_db()).get_blockchain_version().unwrap(),
        BLOCKCHAIN_VERSION - 1
    );
}

#[test]
fn test_fork_change_rewinds_head() {
    let dir = tempfile::tempdir().unwrap();
    let original = Genesis {
        config: ChainConfig {
            homestead_block: Some(4),
            ..Default::default()
        },
        ..Default::default()
    };
    {
        let storage = Arc::new(Storage::open(dir.path().join("chaindata")).unwrap());
        let (config, _, _) = setup_genesis_block(&storage, Some(&original)).unwrap();
        let chain = BlockChain::new(
            storage.clone(),
            config,
            Arc::new(Faker::new()),
            Arc::new(EventHub::new()),
        )
        .unwrap();
        let blocks = make_chain(&chain, &chain.genesis(), 5).unwrap();
        chain.insert_chain(&blocks).unwrap();
        chain.stop();
        storage.close().unwrap();
    }

    let moved = Genesis {
        config: ChainConfig {
            homestead_block: Some(3),
            ..Default::default()
        },
        ..Default::default()
    };
    let ctx = ServiceContext::new(Some(dir.path().to_path_buf()));
    let node = Node::new(
        &ctx,
        NodeConfig {
            genesis: Some(moved.clone()),
            ..fake_config()
        },
    )
    .unwrap();

    assert_eq!(node.blockchain().current_block().number(), 2);
    let genesis_hash = node.blockchain().genesis().hash();
    let stored: Option<ChainConfig> = ChainStore::new(node.chain_db())
        .read_chain_config(&genesis_hash)
        .unwrap();
    assert_eq!(stored, Some(moved.config));
}

#[test]
fn test_fast_sync_falls_back_on_existing_chain() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ctx = ServiceContext::new(Some(dir.path().to_path_buf()));
        let node = Node::new(&ctx, fake_config()).unwrap();
        let chain = node.blockchain();
        let blocks = make_chain(chain, &chain.genesis(), 2).unwrap();
        chain.insert_chain(&blocks).unwrap();
    }

    let ctx = ServiceContext::new(Some(dir.path().to_path_buf()));
    let node = Node::new(
        &ctx,
        NodeConfig {
            sync_mode: SyncMode::Fast,
            ..fake_config()
        },
    )
    .unwrap();
    assert_eq!(node.protocol_manager().sync_mode(), &SyncMode::Full);
}

#[test]
fn test_gas_price_reaches_pool() {
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(&ctx, fake_config()).unwrap();
    assert_eq!(node.gas_price(), NodeConfig::default().gas_price);
    assert_eq!(node.tx_pool().gas_price(), node.gas_price());

    node.set_gas_price(7);
    assert_eq!(node.gas_price(), 7);
    assert_eq!(node.tx_pool().gas_price(), 7);
}

#[test]
fn test_pool_follows_imported_blocks() {
    let alice = Keypair::generate();
    let mut alloc = BTreeMap::new();
    alloc.insert(
        alice.address(),
        GenesisAccount {
            balance: 100_000,
            nonce: 0,
        },
    );
    let ctx = ServiceContext::ephemeral();
    let node = Node::new(
        &ctx,
        NodeConfig {
            genesis: Some(Genesis {
                alloc,
                ..Genesis::default()
            }),
            gas_price: 1,
            ..fake_config()
        },
    )
    .unwrap();

    let stranger = Keypair::generate();
    let unfunded =
        Transaction::transfer(stranger.address(), alice.address(), 1, 0, 1).signed(&stranger);
    assert!(matches!(
        node.tx_pool().add(unfunded),
        Err(TxPoolError::InsufficientFunds { .. })
    ));

    let pending = Transaction::transfer(alice.address(), Address([1; 20]), 10, 0, 2).signed(&alice);
    node.tx_pool().add(pending).unwrap();
    assert_eq!(node.tx_pool().len(), 1);

    let chain = node.blockchain();
    let competing =
        Transaction::transfer(alice.address(), Address([2; 20]), 60_000, 0, 1).signed(&alice);
    let block = make_block_with_txs(
        chain.storage(),
        &chain.genesis(),
        Address([0xCC; 20]),
        vec![competing],
    )
    .unwrap();
    chain.insert_chain(&[block]).unwrap();

    assert!(wait_until(|| node.tx_pool().is_empty()));
    node.stop();
}
