//! Local wallets and the accounts they hold.

use forgechain_core::{Address, Keypair, Transaction};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("unknown account {0}")]
    UnknownAccount(Address),
}

/// A set of keys behind one backend.
pub struct Wallet {
    url: String,
    keys: RwLock<Vec<Keypair>>,
}

impl Wallet {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keys: RwLock::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Generate a fresh key and return its address.
    pub fn new_account(&self) -> Address {
        self.import(Keypair::generate())
    }

    pub fn import(&self, keypair: Keypair) -> Address {
        let address = keypair.address();
        self.keys.write().push(keypair);
        address
    }

    /// Addresses in creation order.
    pub fn accounts(&self) -> Vec<Address> {
        self.keys.read().iter().map(Keypair::address).collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.keys.read().iter().any(|k| k.address() == *address)
    }

    pub fn sign_tx(&self, address: &Address, tx: Transaction) -> Result<Transaction, AccountError> {
        let keys = self.keys.read();
        let key = keys
            .iter()
            .find(|k| k.address() == *address)
            .ok_or(AccountError::UnknownAccount(*address))?;
        Ok(tx.signed(key))
    }
}

/// Every wallet known to the node, in registration order.
#[derive(Default)]
pub struct AccountManager {
    wallets: RwLock<Vec<Arc<Wallet>>>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, wallet: Wallet) -> Arc<Wallet> {
        let wallet = Arc::new(wallet);
        self.wallets.write().push(wallet.clone());
        wallet
    }

    pub fn wallets(&self) -> Vec<Arc<Wallet>> {
        self.wallets.read().clone()
    }

    /// The first account of the first wallet that has any.
    ///
    /// Wallets without accounts are skipped rather than ending the search,
    /// so an empty wallet registered first does not hide the accounts of
    /// later ones.
    pub fn first_account(&self) -> Option<Address> {
        self.wallets
            .read()
            .iter()
            .find_map(|w| w.accounts().first().copied())
    }

    pub fn find(&self, address: &Address) -> Option<Arc<Wallet>> {
        self.wallets
            .read()
            .iter()
            .find(|w| w.contains(address))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_account_skips_empty_wallets() {
        let manager = AccountManager::new();
        assert_eq!(manager.first_account(), None);

        manager.add_wallet(Wallet::new("empty"));
        let keystore = manager.add_wallet(Wallet::new("keystore"));
        let first = keystore.new_account();
        keystore.new_account();

        assert_eq!(manager.first_account(), Some(first));
        assert_eq!(manager.find(&first).unwrap().url(), "keystore");
    }

    #[test]
    fn test_sign_with_unknown_account() {
        let wallet = Wallet::new("keystore");
        let alice = wallet.new_account();
        let stranger = Address([9; 20]);

        let tx = Transaction::transfer(alice, stranger, 1, 0, 1);
        let signed = wallet.sign_tx(&alice, tx.clone()).unwrap();
        assert_ne!(signed.signature, tx.signature);

        let tx = Transaction::transfer(stranger, alice, 1, 0, 1);
        assert_eq!(
            wallet.sign_tx(&stranger, tx).unwrap_err(),
            AccountError::UnknownAccount(stranger)
        );
    }
}
