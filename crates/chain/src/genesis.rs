//! Genesis block specification, chain configuration and the start-up
//! compatibility check between the stored and the configured chain.

use forgechain_core::params::{GENESIS_DIFFICULTY, GENESIS_GAS_LIMIT, MAXIMUM_EXTRA_DATA_SIZE};
use forgechain_core::{Account, Address, Block, Bloom, Hash, Header};
use forgechain_storage::{ChainStore, StateDb, Storage, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Fork schedule and identity of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// First block under the Homestead rules, `None` if never.
    pub homestead_block: Option<u64>,
    /// First block with replay-protected transactions, `None` if never.
    pub eip155_block: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            homestead_block: Some(0),
            eip155_block: Some(0),
        }
    }
}

/// A stored chain config that cannot be replaced without rewinding the head.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mismatching {what} in database (have {stored:?}, want {new:?}, rewind to {rewind_to})")]
pub struct ConfigCompatError {
    pub what: &'static str,
    pub stored: Option<u64>,
    pub new: Option<u64>,
    /// Highest block that is valid under both configs.
    pub rewind_to: u64,
}

impl ConfigCompatError {
    fn new(what: &'static str, stored: Option<u64>, new: Option<u64>) -> Self {
        let first_fork = match (stored, new) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => 0,
        };
        Self {
            what,
            stored,
            new,
            rewind_to: first_fork.saturating_sub(1),
        }
    }
}

fn is_forked(fork: Option<u64>, head: u64) -> bool {
    fork.is_some_and(|block| block <= head)
}

/// A fork block changed in a way that affects blocks at or below `head`.
fn is_fork_incompatible(stored: Option<u64>, new: Option<u64>, head: u64) -> bool {
    (is_forked(stored, head) || is_forked(new, head)) && stored != new
}

impl ChainConfig {
    /// Check whether a chain at `head` built under `self` is still valid
    /// under `new`.
    pub fn check_compatible(
        &self,
        new: &ChainConfig,
        head: u64,
    ) -> std::result::Result<(), ConfigCompatError> {
        if is_fork_incompatible(self.homestead_block, new.homestead_block, head) {
            return Err(ConfigCompatError::new(
                "Homestead fork block",
                self.homestead_block,
                new.homestead_block,
            ));
        }
        if is_fork_incompatible(self.eip155_block, new.eip155_block, head) {
            return Err(ConfigCompatError::new(
                "EIP155 fork block",
                self.eip155_block,
                new.eip155_block,
            ));
        }
        Ok(())
    }

    pub fn is_homestead(&self, number: u64) -> bool {
        is_forked(self.homestead_block, number)
    }
}

/// Errors from genesis setup.
#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database already contains an incompatible genesis block (have {stored}, new {new})")]
    Mismatch { stored: Hash, new: Hash },

    #[error("genesis extra-data too long: {0} bytes")]
    ExtraDataTooLong(usize),
}

pub type Result<T> = std::result::Result<T, GenesisError>;

/// Pre-funded account in the genesis state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisAccount {
    pub balance: u128,
    pub nonce: u64,
}

/// Everything needed to build block zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Genesis {
    pub config: ChainConfig,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub gas_limit: u64,
    pub difficulty: u64,
    pub coinbase: Address,
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            config: ChainConfig::default(),
            timestamp: 0,
            extra_data: b"forgechain genesis".to_vec(),
            gas_limit: GENESIS_GAS_LIMIT,
            difficulty: GENESIS_DIFFICULTY,
            coinbase: Address::ZERO,
            alloc: BTreeMap::new(),
        }
    }
}

impl Genesis {
    /// Build the genesis block, writing its allocation state to `storage`.
    pub fn to_block(&self, storage: &Storage) -> Result<Block> {
        if self.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(GenesisError::ExtraDataTooLong(self.extra_data.len()));
        }

        let mut state = StateDb::open(storage, Hash::ZERO)?;
        for (address, alloc) in &self.alloc {
            let mut account = Account::new_user(alloc.balance);
            account.nonce = alloc.nonce;
            state.put_account(address, account);
        }
        let state_root = state.commit()?;

        let header = Header {
            parent_hash: Hash::ZERO,
            uncle_hash: Hash::ZERO,
            coinbase: self.coinbase,
            state_root,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            bloom: Bloom::default(),
            difficulty: self.difficulty,
            number: 0,
            gas_limit: self.gas_limit,
            gas_used: 0,
            timestamp: self.timestamp,
            extra_data: self.extra_data.clone(),
            mix_digest: Hash::ZERO,
            nonce: 0x42,
        };
        let mut block = Block::new(header, vec![], vec![], vec![]);
        block.total_difficulty = self.difficulty as u128;
        Ok(block)
    }

    /// Write the genesis block as the canonical head together with its
    /// chain config.
    pub fn commit(&self, storage: &Storage) -> Result<Block> {
        let block = self.to_block(storage)?;
        let chain = ChainStore::new(storage);
        chain.write_head_block(&block)?;
        chain.write_chain_config(&block.hash(), &self.config)?;
        Ok(block)
    }
}

/// Hash of the block [`Genesis::default`] produces.
pub fn default_genesis_hash() -> Result<Hash> {
    let scratch = Storage::open_temporary()?;
    Ok(Genesis::default().to_block(&scratch)?.hash())
}

/// Make sure `storage` holds a genesis block and a chain config.
///
/// | database     | `genesis`  | outcome                                     |
/// |--------------|------------|---------------------------------------------|
/// | empty        | `None`     | default genesis committed                   |
/// | empty        | `Some(g)`  | `g` committed                               |
/// | has genesis  | `None`     | stored genesis kept                         |
/// | has genesis  | `Some(g)`  | `g` must hash to the stored genesis         |
///
/// The stored config is then checked against the new one. An incompatible
/// config is returned as the third element rather than written; the caller
/// rewinds the chain and persists the config afterwards.
pub fn setup_genesis_block(
    storage: &Storage,
    genesis: Option<&Genesis>,
) -> Result<(ChainConfig, Hash, Option<ConfigCompatError>)> {
    let chain = ChainStore::new(storage);

    let stored = match chain.get_genesis_hash()? {
        Some(hash) => hash,
        None => {
            let default = Genesis::default();
            let genesis = match genesis {
                Some(genesis) => genesis,
                None => {
                    info!("Writing default genesis block");
                    &default
                }
            };
            let block = genesis.commit(storage)?;
            return Ok((genesis.config.clone(), block.hash(), None));
        }
    };

    if let Some(genesis) = genesis {
        let hash = genesis.to_block(storage)?.hash();
        if hash != stored {
            return Err(GenesisError::Mismatch { stored, new: hash });
        }
    }

    let new_config = match genesis {
        Some(genesis) => genesis.config.clone(),
        None => chain
            .read_chain_config::<ChainConfig>(&stored)?
            .unwrap_or_default(),
    };

    let stored_config = match chain.read_chain_config::<ChainConfig>(&stored)? {
        Some(config) => config,
        None => {
            warn!(genesis = %stored, "Found genesis block without chain config");
            chain.write_chain_config(&stored, &new_config)?;
            return Ok((new_config, stored, None));
        }
    };

    let head = chain.get_head_block()?.map(|b| b.number()).unwrap_or(0);
    if let Err(compat) = stored_config.check_compatible(&new_config, head) {
        return Ok((new_config, stored, Some(compat)));
    }
    chain.write_chain_config(&stored, &new_config)?;
    Ok((new_config, stored, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_compatible() {
        let stored = ChainConfig {
            homestead_block: Some(10),
            ..Default::default()
        };

        // Fork moved but the head has not reached either block yet.
        let later = ChainConfig {
            homestead_block: Some(20),
            ..Default::default()
        };
        assert!(stored.check_compatible(&later, 5).is_ok());

        let err = stored.check_compatible(&later, 15).unwrap_err();
        assert_eq!(err.what, "Homestead fork block");
        assert_eq!(err.stored, Some(10));
        assert_eq!(err.new, Some(20));
        assert_eq!(err.rewind_to, 9);

        let disabled = ChainConfig {
            homestead_block: None,
            ..Default::default()
        };
        assert_eq!(stored.check_compatible(&disabled, 15).unwrap_err().rewind_to, 9);
        assert!(stored.check_compatible(&stored.clone(), 1000).is_ok());
    }

    #[test]
    fn test_genesis_alloc_sets_state_root() {
        let storage = Storage::open_temporary().unwrap();
        let mut genesis = Genesis::default();
        let empty = genesis.to_block(&storage).unwrap();
        assert_eq!(empty.state_root(), Hash::ZERO);
        assert!(empty.is_genesis());
        assert_eq!(empty.total_difficulty, GENESIS_DIFFICULTY as u128);

        let rich = Address([7; 20]);
        genesis.alloc.insert(
            rich,
            GenesisAccount {
                balance: 1_000,
                nonce: 0,
            },
        );
        let funded = genesis.to_block(&storage).unwrap();
        let state = StateDb::open(&storage, funded.state_root()).unwrap();
        assert_eq!(state.get_balance(&rich), 1_000);
    }

    #[test]
    fn test_setup_on_empty_database() {
        let storage = Storage::open_temporary().unwrap();
        let (config, hash, compat) = setup_genesis_block(&storage, None).unwrap();

        assert_eq!(config, ChainConfig::default());
        assert_eq!(hash, default_genesis_hash().unwrap());
        assert!(compat.is_none());

        // Second start finds the same genesis.
        let (_, again, _) = setup_genesis_block(&storage, None).unwrap();
        assert_eq!(again, hash);
    }

    #[test]
    fn test_setup_rejects_other_genesis() {
        let storage = Storage::open_temporary().unwrap();
        setup_genesis_block(&storage, None).unwrap();

        let other = Genesis {
            timestamp: 99,
            ..Default::default()
        };
        assert!(matches!(
            setup_genesis_block(&storage, Some(&other)),
            Err(GenesisError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_setup_reports_incompatible_config() {
        let storage = Storage::open_temporary().unwrap();
        let stored = Genesis {
            config: ChainConfig {
                homestead_block: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        setup_genesis_block(&storage, Some(&stored)).unwrap();

        // Same genesis block, new fork schedule: the config is not part of
        // the block hash.
        let moved = Genesis {
            config: ChainConfig {
                homestead_block: None,
                ..Default::default()
            },
            ..stored.clone()
        };
        let (config, _, compat) = setup_genesis_block(&storage, Some(&moved)).unwrap();
        assert_eq!(config.homestead_block, None);
        let compat = compat.unwrap();
        assert_eq!(compat.rewind_to, 0);

        // Not persisted until the caller rewinds.
        let chain = ChainStore::new(&storage);
        let hash = chain.get_genesis_hash().unwrap().unwrap();
        let persisted: ChainConfig = chain.read_chain_config(&hash).unwrap().unwrap();
        assert_eq!(persisted.homestead_block, Some(0));
    }
}
