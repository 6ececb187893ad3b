//! Ordered teardown of node services.
//!
//! Services are registered as they are built. The same sequence runs on an
//! explicit stop, on drop, and when construction fails half way, so a
//! partially built node releases exactly what it acquired.

use crate::miner::Miner;
use crate::protocol::{LightServer, ProtocolManager};
use crossbeam_channel::{bounded, Receiver, Sender};
use forgechain_chain::{BlockChain, BloomHandlers, ChainIndexer, EventHub, TxPool};
use forgechain_storage::{KeyValueStore, Storage, UpgradeHandle};
use std::sync::Arc;
use tracing::{debug, error, info};

/// One step of the teardown, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStep {
    DbUpgrade,
    BloomIndexer,
    Blockchain,
    ProtocolManager,
    LightServer,
    TxPool,
    Miner,
    EventHub,
    Database,
    Shutdown,
}

/// Services owned by a node, stopped in field order.
pub(crate) struct Teardown {
    pub db_upgrade: Option<UpgradeHandle>,
    pub bloom_indexer: Option<Arc<ChainIndexer>>,
    pub blockchain: Option<Arc<BlockChain>>,
    pub protocol_manager: Option<Arc<ProtocolManager>>,
    pub light_server: Option<Arc<dyn LightServer>>,
    pub tx_pool: Option<Arc<TxPool>>,
    pub miner: Option<Arc<Miner>>,
    pub events: Option<Arc<EventHub>>,
    pub storage: Option<Arc<Storage>>,
    pub bloom_handlers: Option<BloomHandlers>,
    shutdown: Option<Sender<()>>,
    done: bool,
}

impl Teardown {
    /// An empty teardown and the receiving end of its shutdown signal.
    pub fn with_signal() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(0);
        let teardown = Self {
            db_upgrade: None,
            bloom_indexer: None,
            blockchain: None,
            protocol_manager: None,
            light_server: None,
            tx_pool: None,
            miner: None,
            events: None,
            storage: None,
            bloom_handlers: None,
            shutdown: Some(tx),
            done: false,
        };
        (teardown, rx)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Stop everything registered so far. Returns the steps taken; a second
    /// run takes none.
    pub fn run(&mut self) -> Vec<StopStep> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut steps = Vec::new();

        if let Some(mut upgrade) = self.db_upgrade.take() {
            let migrated = upgrade.stop();
            debug!(migrated, "Stopped database upgrade");
            steps.push(StopStep::DbUpgrade);
        }
        if let Some(indexer) = self.bloom_indexer.take() {
            indexer.close();
            steps.push(StopStep::BloomIndexer);
        }
        if let Some(chain) = self.blockchain.take() {
            chain.stop();
            steps.push(StopStep::Blockchain);
        }
        if let Some(manager) = self.protocol_manager.take() {
            manager.stop();
            steps.push(StopStep::ProtocolManager);
        }
        if let Some(light) = self.light_server.take() {
            light.stop();
            steps.push(StopStep::LightServer);
        }
        if let Some(pool) = self.tx_pool.take() {
            pool.stop();
            steps.push(StopStep::TxPool);
        }
        if let Some(miner) = self.miner.take() {
            miner.stop();
            steps.push(StopStep::Miner);
        }
        if let Some(events) = self.events.take() {
            events.stop();
            steps.push(StopStep::EventHub);
        }
        // Queued retrievals are answered before the database closes.
        if let Some(mut handlers) = self.bloom_handlers.take() {
            handlers.stop();
        }
        if let Some(storage) = self.storage.take() {
            if let Err(err) = storage.close() {
                error!(%err, "Failed to close chain database");
            }
            steps.push(StopStep::Database);
        }
        // Dropping the only sender wakes every waiter.
        self.shutdown.take();
        steps.push(StopStep::Shutdown);
        info!("Node services stopped");
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use forgechain_chain::bloombits::{bloom_bits_key, start_bloom_handlers, Retrieval};

    #[test]
    fn test_partial_teardown_runs_once() {
        let (mut teardown, shutdown) = Teardown::with_signal();
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let events = Arc::new(EventHub::new());
        teardown.storage = Some(storage.clone());
        teardown.events = Some(events.clone());

        assert_eq!(
            teardown.run(),
            vec![StopStep::EventHub, StopStep::Database, StopStep::Shutdown]
        );
        assert!(storage.is_closed());
        assert!(events.is_stopped());
        assert!(shutdown.recv().is_err());

        assert!(teardown.run().is_empty());
        assert!(teardown.is_done());
    }

    #[test]
    fn test_queued_bloom_retrievals_answered_before_close() {
        let (mut teardown, _shutdown) = Teardown::with_signal();
        let storage = Arc::new(Storage::open_temporary().unwrap());
        storage.put_raw(&bloom_bits_key(3, 0), &[0xAA]).unwrap();
        let handlers = start_bloom_handlers(storage.clone(), 2).unwrap();
        let requests = handlers.requests().unwrap();
        teardown.storage = Some(storage.clone());
        teardown.bloom_handlers = Some(handlers);

        let (reply, answers) = unbounded();
        for _ in 0..500 {
            requests
                .send(Retrieval {
                    bit: 3,
                    section: 0,
                    reply: reply.clone(),
                })
                .unwrap();
        }
        drop(requests);
        drop(reply);

        teardown.run();
        assert!(storage.is_closed());
        let answered: Vec<Option<Vec<u8>>> = answers.iter().collect();
        assert_eq!(answered.len(), 500);
        assert!(answered.iter().all(|bits| bits.as_deref() == Some(&[0xAA][..])));
    }
}
