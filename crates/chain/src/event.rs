//! Publish/subscribe hub for chain and pool events.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use forgechain_core::{Address, Block, Hash, Transaction};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A block was imported, canonical or not.
#[derive(Debug, Clone)]
pub struct ChainEvent {
    pub block: Block,
    pub hash: Hash,
}

/// The canonical head moved.
#[derive(Debug, Clone)]
pub struct ChainHeadEvent {
    pub block: Block,
}

/// The local miner sealed and imported a block.
#[derive(Debug, Clone)]
pub struct NewMinedBlockEvent {
    pub block: Block,
}

/// A transaction entered the pool.
#[derive(Debug, Clone)]
pub struct TxPreEvent {
    pub tx: Transaction,
}

#[derive(Debug, Clone)]
pub enum Event {
    Chain(ChainEvent),
    ChainHead(ChainHeadEvent),
    NewMinedBlock(NewMinedBlockEvent),
    NewEtherbase(Address),
    TxPre(TxPreEvent),
}

/// Receiving end of a hub subscription. Closed once the hub stops.
pub struct Subscription {
    receiver: Receiver<Event>,
}

impl Subscription {
    /// Block until the next event. `None` after the hub stopped.
    pub fn recv(&self) -> Option<Event> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn receiver(&self) -> &Receiver<Event> {
        &self.receiver
    }
}

/// Fan-out of [`Event`]s to every live subscription.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<Event>>>,
    stopped: AtomicBool,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to all subscribers. Returns `false` once stopped.
    pub fn post(&self, event: Event) -> bool {
        if self.is_stopped() {
            return false;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Subscribe to every later event. After `stop` the subscription is
    /// already closed.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded();
        if !self.is_stopped() {
            self.subscribers.lock().push(tx);
        }
        Subscription { receiver: rx }
    }

    /// Close every subscription and reject later posts. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.subscribers.lock().clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
