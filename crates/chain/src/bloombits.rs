//! Bloom bit indexing.
//!
//! Header blooms are rotated per section: for a section of `size` blocks,
//! bit vector `b` holds bit `b` of every header bloom in block order. A
//! filter can then test a handful of vectors instead of every header.
//! Vectors are stored under `bloombits:{bit}{section}`.
//!
//! A section is indexed once its last block is `confirms` blocks below the
//! head. The hash of that last block is stored with the section; when it is
//! no longer canonical (reorg or rewind) the section and everything above
//! it is dropped and indexed again.

use crate::event::{Event, Subscription};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use forgechain_core::bloom::BLOOM_BIT_LENGTH;
use forgechain_core::{Bloom, Hash, Header};
use forgechain_storage::{BatchOp, ChainStore, KeyValueStore, Result, Storage, StorageError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const BLOOM_BITS_PREFIX: &[u8] = b"bloombits:";
const SECTION_COUNT_KEY: &[u8] = b"bloombits-sections";
const SECTION_HEAD_PREFIX: &[u8] = b"bloombits-head:";

/// Retrieval worker threads started per node.
pub const BLOOM_SERVICE_THREADS: usize = 4;

/// How often the indexer wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Key of the vector for `bit` in `section`.
pub fn bloom_bits_key(bit: u16, section: u64) -> Vec<u8> {
    let mut key = BLOOM_BITS_PREFIX.to_vec();
    key.extend_from_slice(&bit.to_be_bytes());
    key.extend_from_slice(&section.to_be_bytes());
    key
}

fn section_head_key(section: u64) -> Vec<u8> {
    let mut key = SECTION_HEAD_PREFIX.to_vec();
    key.extend_from_slice(&section.to_be_bytes());
    key
}

/// Accumulates the rotated bit vectors of one section.
pub struct BloomGenerator {
    size: u64,
    next: u64,
    bits: Vec<Vec<u8>>,
}

impl BloomGenerator {
    pub fn new(size: u64) -> Self {
        let bytes = size.div_ceil(8) as usize;
        Self {
            size,
            next: 0,
            bits: vec![vec![0u8; bytes]; BLOOM_BIT_LENGTH],
        }
    }

    /// Add the bloom of the `index`-th block of the section. Blooms must be
    /// added in order.
    pub fn add_bloom(&mut self, index: u64, bloom: &Bloom) -> Result<()> {
        if index != self.next || index >= self.size {
            return Err(StorageError::NotFound(format!(
                "bloom {} out of order (expected {})",
                index, self.next
            )));
        }
        let byte = (index / 8) as usize;
        let mask = 0x80u8 >> (index % 8);
        for (bit, vector) in self.bits.iter_mut().enumerate() {
            if bloom.bit(bit) {
                vector[byte] |= mask;
            }
        }
        self.next += 1;
        Ok(())
    }

    pub fn bitset(&self, bit: usize) -> &[u8] {
        &self.bits[bit]
    }

    fn into_ops(self, section: u64) -> Vec<BatchOp> {
        self.bits
            .into_iter()
            .enumerate()
            .map(|(bit, value)| BatchOp::Insert {
                key: bloom_bits_key(bit as u16, section),
                value,
            })
            .collect()
    }
}

/// Background indexer turning completed sections of the canonical chain
/// into bloom bit vectors.
pub struct ChainIndexer {
    storage: Arc<Storage>,
    section_size: u64,
    confirms: u64,
    sections: Arc<AtomicU64>,
    quit: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChainIndexer {
    pub fn new(storage: Arc<Storage>, section_size: u64, confirms: u64) -> Result<Self> {
        let sections: u64 = storage.get(SECTION_COUNT_KEY)?.unwrap_or(0);
        Ok(Self {
            storage,
            section_size: section_size.max(1),
            confirms,
            sections: Arc::new(AtomicU64::new(sections)),
            quit: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Number of sections fully indexed.
    pub fn sections(&self) -> u64 {
        self.sections.load(Ordering::Acquire)
    }

    /// Catch up with `head`, then keep indexing as chain events arrive.
    /// Sections no longer on the canonical chain are rolled back first.
    pub fn start(&self, head: &Header, events: Subscription) -> Result<()> {
        let indexer = Indexer {
            storage: self.storage.clone(),
            size: self.section_size,
            confirms: self.confirms,
            sections: self.sections.clone(),
        };
        let quit = self.quit.clone();
        let head = head.number;

        let handle = thread::Builder::new()
            .name("bloom-indexer".into())
            .spawn(move || {
                indexer.sync(head);
                while !quit.load(Ordering::Acquire) {
                    match events.recv_timeout(POLL_INTERVAL) {
                        Ok(Event::Chain(_)) | Ok(Event::ChainHead(_)) => {
                            match ChainStore::new(&indexer.storage).get_head_block() {
                                Ok(Some(head)) => indexer.sync(head.number()),
                                Ok(None) => {}
                                Err(err) => warn!(%err, "Bloom indexer cannot read head"),
                            }
                        }
                        Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Bloom indexer exited");
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Stored vector for `bit` in `section`, `None` until the section is
    /// indexed.
    pub fn bloom_bits(&self, bit: u16, section: u64) -> Result<Option<Vec<u8>>> {
        if section >= self.sections() {
            return Ok(None);
        }
        self.storage.get_raw(&bloom_bits_key(bit, section))
    }

    /// Stop the worker and wait for it. Idempotent.
    pub fn close(&self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Bloom indexer panicked");
            }
            info!(sections = self.sections(), "Bloom indexer closed");
        }
    }
}

impl Drop for ChainIndexer {
    fn drop(&mut self) {
        self.close();
    }
}

struct Indexer {
    storage: Arc<Storage>,
    size: u64,
    confirms: u64,
    sections: Arc<AtomicU64>,
}

impl Indexer {
    fn sync(&self, head: u64) {
        if let Err(err) = self.rollback_stale() {
            warn!(%err, "Bloom section rollback failed");
            return;
        }
        self.catch_up(head);
    }

    /// Drop indexed sections, newest first, whose last block is no longer
    /// canonical.
    fn rollback_stale(&self) -> Result<()> {
        let chain = ChainStore::new(&self.storage);
        loop {
            let sections = self.sections.load(Ordering::Acquire);
            let Some(section) = sections.checked_sub(1) else {
                return Ok(());
            };
            let last = (section + 1) * self.size - 1;
            let indexed: Option<Hash> = self.storage.get(section_head_key(section))?;
            if indexed.is_some() && indexed == chain.get_canonical_hash(last)? {
                return Ok(());
            }

            let mut ops: Vec<BatchOp> = (0..BLOOM_BIT_LENGTH)
                .map(|bit| BatchOp::Remove {
                    key: bloom_bits_key(bit as u16, section),
                })
                .collect();
            ops.push(BatchOp::Remove {
                key: section_head_key(section),
            });
            ops.push(BatchOp::put(SECTION_COUNT_KEY.to_vec(), &section)?);
            self.storage.batch(ops)?;
            self.sections.store(section, Ordering::Release);
            info!(section, "Rolled back bloom section no longer canonical");
        }
    }

    fn catch_up(&self, head: u64) {
        let complete = (head + 1).saturating_sub(self.confirms) / self.size;
        while self.sections.load(Ordering::Acquire) < complete {
            let section = self.sections.load(Ordering::Acquire);
            if let Err(err) = self.process_section(section) {
                warn!(section, %err, "Bloom section indexing failed");
                return;
            }
            self.sections.store(section + 1, Ordering::Release);
            debug!(section, "Indexed bloom section");
        }
    }

    fn process_section(&self, section: u64) -> Result<()> {
        let chain = ChainStore::new(&self.storage);
        let mut generator = BloomGenerator::new(self.size);
        let mut previous: Option<Hash> = None;
        for index in 0..self.size {
            let number = section * self.size + index;
            let block = chain
                .get_block_by_number(number)?
                .ok_or_else(|| StorageError::NotFound(format!("canonical block {}", number)))?;
            // The canonical index may be mid-rewrite during a reorg.
            if previous.is_some_and(|hash| hash != block.parent_hash()) {
                return Err(StorageError::NotFound(format!(
                    "canonical chain broken at block {}",
                    number
                )));
            }
            generator.add_bloom(index, &block.header.bloom)?;
            previous = Some(block.hash());
        }
        let mut ops = generator.into_ops(section);
        if let Some(last) = previous {
            ops.push(BatchOp::put(section_head_key(section), &last)?);
        }
        ops.push(BatchOp::put(SECTION_COUNT_KEY.to_vec(), &(section + 1))?);
        self.storage.batch(ops)
    }
}

/// A request for one stored bit vector.
pub struct Retrieval {
    pub bit: u16,
    pub section: u64,
    pub reply: Sender<Option<Vec<u8>>>,
}

/// Worker threads serving [`Retrieval`] requests.
pub struct BloomHandlers {
    requests: Option<Sender<Retrieval>>,
    workers: Vec<JoinHandle<()>>,
}

/// Start `threads` workers reading bit vectors from `storage`.
pub fn start_bloom_handlers(storage: Arc<Storage>, threads: usize) -> Result<BloomHandlers> {
    let (tx, rx) = unbounded::<Retrieval>();
    let mut workers = Vec::with_capacity(threads);
    for id in 0..threads {
        let rx = rx.clone();
        let storage = storage.clone();
        let worker = thread::Builder::new()
            .name(format!("bloom-handler-{}", id))
            .spawn(move || {
                for request in rx.iter() {
                    let bits = storage
                        .get_raw(&bloom_bits_key(request.bit, request.section))
                        .unwrap_or_else(|err| {
                            warn!(%err, "Bloom retrieval failed");
                            None
                        });
                    let _ = request.reply.send(bits);
                }
            })?;
        workers.push(worker);
    }
    Ok(BloomHandlers {
        requests: Some(tx),
        workers,
    })
}

impl BloomHandlers {
    /// Queue for retrieval requests, `None` once stopped.
    pub fn requests(&self) -> Option<Sender<Retrieval>> {
        self.requests.clone()
    }

    /// Fetch one vector and wait for the answer.
    pub fn retrieve(&self, bit: u16, section: u64) -> Option<Vec<u8>> {
        let requests = self.requests.as_ref()?;
        let (reply, answer) = bounded(1);
        requests.send(Retrieval { bit, section, reply }).ok()?;
        answer.recv().ok().flatten()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close the request queue and join the workers. Idempotent.
    pub fn stop(&mut self) {
        self.requests = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for BloomHandlers {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::BlockChain;
    use crate::chain_makers::{make_block_with_txs, make_chain, new_canonical};
    use crate::event::EventHub;
    use crate::genesis::{setup_genesis_block, Genesis, GenesisAccount};
    use forgechain_consensus::Faker;
    use forgechain_core::{Address, Block, Keypair, Transaction};
    use std::collections::BTreeMap;

    fn header(number: u64, bloom: Bloom) -> Header {
        Header {
            parent_hash: Hash::ZERO,
            uncle_hash: Hash::ZERO,
            coinbase: Address::ZERO,
            state_root: Hash::ZERO,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            bloom,
            difficulty: 1,
            number,
            gas_limit: 5000,
            gas_used: 0,
            timestamp: number,
            extra_data: Vec::new(),
            mix_digest: Hash::ZERO,
            nonce: 0,
        }
    }

    fn wait_for(indexer: &ChainIndexer, sections: u64) {
        for _ in 0..200 {
            if indexer.sections() >= sections {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("indexer stuck at {} sections", indexer.sections());
    }

    #[test]
    fn test_generator_rotates_bits() {
        let mut bloom = Bloom::default();
        bloom.add(b"needle");
        let [bit, ..] = Bloom::bit_positions(b"needle");

        let mut generator = BloomGenerator::new(16);
        for index in 0..16 {
            let b = if index == 9 { bloom } else { Bloom::default() };
            generator.add_bloom(index, &b).unwrap();
        }
        assert_eq!(generator.bitset(bit), &[0x00, 0x40]);
        assert!(generator.add_bloom(3, &bloom).is_err());
    }

    #[test]
    fn test_indexes_completed_sections() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let chain = ChainStore::new(&storage);
        let mut bloom = Bloom::default();
        bloom.add(b"needle");
        let [bit, ..] = Bloom::bit_positions(b"needle");
        let mut parent = Hash::ZERO;
        for number in 0..10 {
            let b = if number == 5 { bloom } else { Bloom::default() };
            let mut header = header(number, b);
            header.parent_hash = parent;
            let block = Block::new(header, vec![], vec![], vec![]);
            chain.write_head_block(&block).unwrap();
            parent = block.hash();
        }

        let hub = EventHub::new();
        let indexer = ChainIndexer::new(storage.clone(), 4, 0).unwrap();
        indexer.start(&header(9, Bloom::default()), hub.subscribe()).unwrap();
        wait_for(&indexer, 2);
        indexer.close();
        indexer.close();

        assert_eq!(indexer.sections(), 2);
        assert_eq!(indexer.bloom_bits(bit as u16, 1).unwrap(), Some(vec![0x40]));
        assert!(indexer.bloom_bits(0, 2).unwrap().is_none());

        // The count survives a restart.
        assert_eq!(ChainIndexer::new(storage, 4, 0).unwrap().sections(), 2);
    }

    #[test]
    fn test_follows_chain_events() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let chain = new_canonical(storage.clone(), Arc::new(Faker::new()), 0).unwrap();
        let indexer = ChainIndexer::new(storage, 4, 0).unwrap();
        indexer
            .start(&chain.current_header(), chain.subscribe_chain_events())
            .unwrap();
        assert_eq!(indexer.sections(), 0);

        let genesis = chain.genesis();
        let blocks = make_chain(&chain, &genesis, 7).unwrap();
        chain.insert_chain(&blocks).unwrap();
        wait_for(&indexer, 2);
        indexer.close();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn test_waits_for_confirmations() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let chain = new_canonical(storage.clone(), Arc::new(Faker::new()), 4).unwrap();
        let indexer = ChainIndexer::new(storage, 4, 2).unwrap();
        indexer
            .start(&chain.current_header(), chain.subscribe_chain_events())
            .unwrap();

        // Head 4: the last block of section 0 is only one deep.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(indexer.sections(), 0);

        let head = chain.current_block();
        chain
            .insert_chain(&make_chain(&chain, &head, 1).unwrap())
            .unwrap();
        wait_for(&indexer, 1);
        indexer.close();
    }

    #[test]
    fn test_reorg_rebuilds_section() {
        let alice = Keypair::generate();
        let bob = Address([0xBB; 20]);
        let mut alloc = BTreeMap::new();
        alloc.insert(
            alice.address(),
            GenesisAccount {
                balance: 1_000_000,
                nonce: 0,
            },
        );
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let genesis = Genesis {
            alloc,
            ..Genesis::default()
        };
        let (config, _, _) = setup_genesis_block(&storage, Some(&genesis)).unwrap();
        let chain = BlockChain::new(
            storage.clone(),
            config,
            Arc::new(Faker::new()),
            Arc::new(EventHub::new()),
        )
        .unwrap();
        let indexer = ChainIndexer::new(storage, 4, 0).unwrap();
        indexer
            .start(&chain.current_header(), chain.subscribe_chain_events())
            .unwrap();

        let genesis = chain.genesis();
        let original = make_chain(&chain, &genesis, 3).unwrap();
        chain.insert_chain(&original).unwrap();
        wait_for(&indexer, 1);
        let [bit, ..] = Bloom::bit_positions(bob.as_ref());
        assert_eq!(indexer.bloom_bits(bit as u16, 0).unwrap(), Some(vec![0x00]));

        // A longer fork whose first block carries a transfer to bob.
        let tx = Transaction::transfer(alice.address(), bob, 1, 0, 1).signed(&alice);
        let mut first =
            make_block_with_txs(chain.storage(), &genesis, Address([9; 20]), vec![tx]).unwrap();
        first.total_difficulty = chain.process_with_parent(&first, &genesis).unwrap();
        let mut fork = vec![first.clone()];
        fork.extend(make_chain(&chain, &first, 3).unwrap());
        chain.insert_chain(&fork).unwrap();
        assert_eq!(chain.current_block().hash(), fork[3].hash());

        assert!(wait_until(|| {
            indexer
                .bloom_bits(bit as u16, 0)
                .unwrap()
                .is_some_and(|bits| bits[0] & 0x40 != 0)
        }));
        assert_eq!(indexer.sections(), 1);
        indexer.close();
    }

    #[test]
    fn test_rewind_drops_section_on_restart() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let chain = new_canonical(storage.clone(), Arc::new(Faker::new()), 4).unwrap();
        let indexer = ChainIndexer::new(storage.clone(), 4, 0).unwrap();
        indexer
            .start(&chain.current_header(), chain.subscribe_chain_events())
            .unwrap();
        wait_for(&indexer, 1);
        indexer.close();

        chain.set_head(1).unwrap();
        let restarted = ChainIndexer::new(storage, 4, 0).unwrap();
        assert_eq!(restarted.sections(), 1);
        restarted
            .start(&chain.current_header(), chain.subscribe_chain_events())
            .unwrap();
        assert!(wait_until(|| restarted.sections() == 0));
        assert!(restarted.bloom_bits(0, 0).unwrap().is_none());
        restarted.close();
    }

    #[test]
    fn test_retrieval_handlers() {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        storage.put_raw(&bloom_bits_key(7, 0), &[0xFF]).unwrap();

        let mut handlers = start_bloom_handlers(storage, 2).unwrap();
        assert_eq!(handlers.worker_count(), 2);
        assert_eq!(handlers.retrieve(7, 0), Some(vec![0xFF]));
        assert_eq!(handlers.retrieve(8, 0), None);

        handlers.stop();
        handlers.stop();
        assert!(handlers.requests().is_none());
        assert_eq!(handlers.retrieve(7, 0), None);
    }
}
