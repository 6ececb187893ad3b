//! Proof-of-work consensus for forgechain.
//!
//! This crate provides:
//! - Difficulty and gas-limit adjustment rules and header validation
//! - The [`PowEngine`] capability contract
//! - Interchangeable engines: [`Faker`], [`Tester`], [`SharedEngine`] and the
//!   real [`Hashimoto`] engine
//! - [`create_consensus_engine`], which picks one of them from configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use forgechain_consensus::{create_consensus_engine, EngineConfig, SharedEngine};
//!
//! let config = EngineConfig { pow_fake: true, ..Default::default() };
//! let engine = create_consensus_engine(&config, &SharedEngine::new());
//! assert_eq!(engine.hashrate(), 0.0);
//! ```

pub mod engine;
pub mod fake;
pub mod hashimoto;
pub mod rules;
pub mod selector;

// Re-export commonly used types
pub use engine::{pow_target, PowEngine, Seal};
pub use fake::{Faker, Tester};
pub use hashimoto::{pow_hash, seed_hash, EpochCache, Hashimoto, PowConfig, RemoteSealer, SharedEngine};
pub use rules::{calc_difficulty, calc_gas_limit, verify_header, ConsensusError, Result};
pub use selector::{create_consensus_engine, EngineConfig, EngineKind};
