//! Transaction types and signing.

use crate::crypto::{Address, Keypair, PublicKey, Signature};
use crate::hash::{hash, Hash};
use crate::params::TX_GAS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("transaction carries no valid signer key")]
    InvalidSigner,
    #[error("signer {signer} does not match sender {from}")]
    SenderMismatch { signer: Address, from: Address },
}

/// A value transfer on the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's nonce (sequence number).
    pub nonce: u64,
    pub from: Address,
    pub to: Address,
    pub value: u128,
    /// Opaque payload, carried but not executed.
    pub data: Vec<u8>,
    /// Maximum gas to use.
    pub gas_limit: u64,
    /// Price per unit of gas.
    pub gas_price: u64,
    /// Ed25519 key of the signer; its address must be `from`.
    pub signer: [u8; 32],
    pub signature: Signature,
}

/// Unsigned transaction data (for hashing and signing).
#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    nonce: u64,
    from: &'a Address,
    to: &'a Address,
    value: u128,
    data: &'a [u8],
    gas_limit: u64,
    gas_price: u64,
}

impl Transaction {
    /// Create a value transfer with the intrinsic gas limit.
    pub fn transfer(from: Address, to: Address, value: u128, nonce: u64, gas_price: u64) -> Self {
        Self {
            nonce,
            from,
            to,
            value,
            data: Vec::new(),
            gas_limit: TX_GAS,
            gas_price,
            signer: [0u8; 32],
            signature: Signature::default(),
        }
    }

    /// Get the hash of the unsigned transaction (for signing).
    pub fn signing_hash(&self) -> Hash {
        let unsigned = UnsignedTransaction {
            nonce: self.nonce,
            from: &self.from,
            to: &self.to,
            value: self.value,
            data: &self.data,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
        };
        let encoded = bincode::serialize(&unsigned).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Get the full transaction hash (including signature).
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signer = keypair.public_key.to_bytes();
        self.signature = keypair.sign_hash(&self.signing_hash());
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    /// Verify the signature against the embedded signer key, and that the
    /// key belongs to the sender.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let public_key =
            PublicKey::from_bytes(&self.signer).map_err(|_| TransactionError::InvalidSigner)?;
        let signer = public_key.to_address();
        if signer != self.from {
            return Err(TransactionError::SenderMismatch {
                signer,
                from: self.from,
            });
        }
        public_key
            .verify(self.signing_hash().as_bytes(), &self.signature)
            .map_err(|_| TransactionError::VerificationFailed)
    }

    /// Gas the transaction is charged before anything executes.
    pub fn intrinsic_gas(&self) -> u64 {
        TX_GAS
    }

    /// Value plus the full gas allowance at the offered price.
    pub fn max_cost(&self) -> u128 {
        self.value
            .saturating_add(self.gas_limit as u128 * self.gas_price as u128)
    }
}
