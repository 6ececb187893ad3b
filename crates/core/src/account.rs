//! Account state representation.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// An account in the world state.
///
/// Every address implicitly exists with zero balance and nonce; an account
/// is only written to the state once something touches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Transaction count / sequence number.
    pub nonce: u64,
    /// Account balance in the smallest native unit.
    pub balance: u128,
    /// Hash of the contract bytecode (None for plain accounts).
    pub code_hash: Option<Hash>,
    /// Root hash of the account's storage.
    pub storage_root: Hash,
}

impl Account {
    /// Create a new plain account with the given balance.
    pub fn new_user(balance: u128) -> Self {
        Self {
            nonce: 0,
            balance,
            code_hash: None,
            storage_root: Hash::ZERO,
        }
    }

    pub fn is_contract(&self) -> bool {
        self.code_hash.is_some()
    }

    pub fn increment_nonce(&mut self) {
        self.nonce = self.nonce.saturating_add(1);
    }

    pub fn credit(&mut self, amount: u128) {
        self.balance = self.balance.saturating_add(amount);
    }

    /// Subtract balance from the account.
    /// Returns true if successful, false if insufficient balance.
    pub fn debit(&mut self, amount: u128) -> bool {
        if self.balance >= amount {
            self.balance -= amount;
            true
        } else {
            false
        }
    }

    /// True for an account indistinguishable from an untouched address.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance == 0 && self.code_hash.is_none()
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new_user(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_account_is_empty() {
        let account = Account::default();
        assert!(account.is_empty());
        assert!(!account.is_contract());
    }

    #[test]
    fn test_credit_and_debit() {
        let mut account = Account::new_user(100);

        account.credit(50);
        assert_eq!(account.balance, 150);

        assert!(account.debit(100));
        assert_eq!(account.balance, 50);

        assert!(!account.debit(100)); // Insufficient balance
        assert_eq!(account.balance, 50);
        assert!(!account.is_empty());
    }

    #[test]
    fn test_nonce_increment() {
        let mut account = Account::default();
        account.increment_nonce();
        account.increment_nonce();
        assert_eq!(account.nonce, 2);
        assert!(!account.is_empty());
    }
}
