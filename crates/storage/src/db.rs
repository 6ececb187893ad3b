//! sled database wrapper with serialization helpers.

use forgechain_core::Hash;
use sled::Db;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: address {address}, required {required}, available {available}")]
    InsufficientBalance {
        address: forgechain_core::Address,
        required: u128,
        available: u128,
    },

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("Unknown state root {0}")]
    MissingState(Hash),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database is closed")]
    Closed,
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The raw byte-oriented contract the chain needs from its database.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete_raw(&self, key: &[u8]) -> Result<()>;
    /// Flush and refuse further access. Closing twice is a no-op.
    fn close(&self) -> Result<()>;
}

/// Wrapper around sled database with serialization helpers.
pub struct Storage {
    db: Db,
    closed: AtomicBool,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self::wrap(db))
    }

    /// Open an in-memory database (for testing and ephemeral nodes).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::wrap(db))
    }

    fn wrap(db: Db) -> Self {
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize + ?Sized,
    {
        let encoded = bincode::serialize(value)?;
        self.put_raw(key.as_ref(), &encoded)
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.get_raw(key.as_ref())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Retrieve a value, returning error if not found.
    pub fn get_or_err<K, V>(&self, key: K) -> Result<V>
    where
        K: AsRef<[u8]> + std::fmt::Debug,
        V: serde::de::DeserializeOwned,
    {
        let missing = format!("{:?}", key);
        self.get(key)?.ok_or(StorageError::NotFound(missing))
    }

    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        self.delete_raw(key.as_ref())
    }

    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.db.contains_key(key)?)
    }

    /// All entries under `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Apply multiple operations atomically.
    ///
    /// Atomicity comes from sled's `apply_batch`: operations are collected in
    /// memory and written through sled's write-ahead log in one step.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        self.ensure_open()?;
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Format: "block:hash:" + hash_bytes → full block
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        prefixed(b"block:hash:", hash.as_ref())
    }

    /// Format: "block:number:" + big-endian number → canonical hash
    pub fn canonical_key(number: u64) -> Vec<u8> {
        prefixed(b"block:number:", &number.to_be_bytes())
    }

    /// Format: "td:" + hash_bytes → total difficulty
    pub fn td_key(hash: &Hash) -> Vec<u8> {
        prefixed(b"td:", hash.as_ref())
    }

    /// Format: "state:" + root_bytes → account snapshot
    pub fn state_key(root: &Hash) -> Vec<u8> {
        prefixed(b"state:", root.as_ref())
    }

    /// Format: "config:" + genesis_hash → chain config
    pub fn chain_config_key(genesis: &Hash) -> Vec<u8> {
        prefixed(b"config:", genesis.as_ref())
    }

    /// Legacy layout: "block:height:{height}" → full block
    pub fn legacy_height_key(height: u64) -> Vec<u8> {
        format!("block:height:{}", height).into_bytes()
    }
}

fn prefixed(prefix: &[u8], tail: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + tail.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(tail);
    key
}

impl KeyValueStore for Storage {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete_raw(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.db.remove(key)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.flush()?;
        debug!("chain database closed");
        Ok(())
    }
}

/// Batch operation for atomic updates.
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    /// An insert of a bincode-encoded value.
    pub fn put<V: serde::Serialize + ?Sized>(key: Vec<u8>, value: &V) -> Result<Self> {
        Ok(BatchOp::Insert {
            key,
            value: bincode::serialize(value)?,
        })
    }
}
