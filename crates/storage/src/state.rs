//! Root-addressed world state.
//!
//! A [`StateDb`] is opened at a state root, mutated in memory by exactly one
//! state transition, and committed to produce the next root. Committed
//! snapshots are stored under `state:{root}` so any historical root can be
//! reopened.

use crate::db::{Result, Storage, StorageError};
use forgechain_core::{hash_concat, merkle_root, Account, Address, Hash};
use std::collections::BTreeMap;

/// An account plus the transient data a block transition attaches to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateObject {
    pub account: Account,
    /// Gas available to the block this object is being built for.
    /// Never committed.
    pub gas_pool: u64,
}

impl StateObject {
    pub fn set_gas_pool(&mut self, gas: u64) {
        self.gas_pool = gas;
    }

    pub fn add_balance(&mut self, amount: u128) {
        self.account.credit(amount);
    }

    pub fn balance(&self) -> u128 {
        self.account.balance
    }
}

/// World state view over a single root.
pub struct StateDb<'a> {
    storage: &'a Storage,
    root: Hash,
    objects: BTreeMap<Address, StateObject>,
}

impl<'a> StateDb<'a> {
    /// Open the state committed under `root`.
    ///
    /// The zero root is the empty state and always opens.
    pub fn open(storage: &'a Storage, root: Hash) -> Result<Self> {
        let objects = if root == Hash::ZERO {
            BTreeMap::new()
        } else {
            let accounts: BTreeMap<Address, Account> = storage
                .get(Storage::state_key(&root))?
                .ok_or(StorageError::MissingState(root))?;
            accounts
                .into_iter()
                .map(|(address, account)| {
                    (
                        address,
                        StateObject {
                            account,
                            gas_pool: 0,
                        },
                    )
                })
                .collect()
        };
        Ok(Self {
            storage,
            root,
            objects,
        })
    }

    /// True when a snapshot for `root` is available.
    pub fn has_root(storage: &Storage, root: &Hash) -> Result<bool> {
        if *root == Hash::ZERO {
            return Ok(true);
        }
        storage.contains(Storage::state_key(root))
    }

    /// The root this view was opened at, or last committed to.
    pub fn root(&self) -> Hash {
        self.root
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account, returning default (empty) if not found.
    pub fn get_account(&self, address: &Address) -> Account {
        self.objects
            .get(address)
            .map(|obj| obj.account.clone())
            .unwrap_or_default()
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.objects.contains_key(address)
    }

    /// Fetch the state object for `address`, creating an empty one if absent.
    pub fn get_or_new_state_object(&mut self, address: &Address) -> &mut StateObject {
        self.objects.entry(*address).or_default()
    }

    pub fn put_account(&mut self, address: &Address, account: Account) {
        self.get_or_new_state_object(address).account = account;
    }

    pub fn get_balance(&self, address: &Address) -> u128 {
        self.get_account(address).balance
    }

    pub fn add_balance(&mut self, address: &Address, amount: u128) {
        self.get_or_new_state_object(address).add_balance(amount);
    }

    /// Subtract from account balance; the state is untouched on failure.
    pub fn sub_balance(&mut self, address: &Address, amount: u128) -> Result<()> {
        let available = self.get_balance(address);
        if available < amount {
            return Err(StorageError::InsufficientBalance {
                address: *address,
                required: amount,
                available,
            });
        }
        self.get_or_new_state_object(address).account.balance -= amount;
        Ok(())
    }

    pub fn get_nonce(&self, address: &Address) -> u64 {
        self.get_account(address).nonce
    }

    pub fn increment_nonce(&mut self, address: &Address) {
        self.get_or_new_state_object(address).account.increment_nonce();
    }

    pub fn gas_pool(&self, address: &Address) -> u64 {
        self.objects.get(address).map(|o| o.gas_pool).unwrap_or(0)
    }

    // =========================================================================
    // Root Computation
    // =========================================================================

    /// Merkle root over the sorted account entries.
    ///
    /// The map is ordered by address, so the root is deterministic. Gas pools
    /// are not part of the commitment.
    pub fn compute_root(&self) -> Hash {
        let leaves: Vec<Hash> = self
            .objects
            .iter()
            .map(|(address, obj)| {
                let encoded =
                    bincode::serialize(&obj.account).expect("serialization should not fail");
                hash_concat(&[address.as_ref(), &encoded])
            })
            .collect();
        merkle_root(&leaves)
    }

    /// Persist the current accounts and move this view to the new root.
    pub fn commit(&mut self) -> Result<Hash> {
        let root = self.compute_root();
        if root != Hash::ZERO {
            let accounts: BTreeMap<&Address, &Account> = self
                .objects
                .iter()
                .map(|(address, obj)| (address, &obj.account))
                .collect();
            self.storage.put(Storage::state_key(&root), &accounts)?;
        }
        self.root = root;
        Ok(root)
    }
}
