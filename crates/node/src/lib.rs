//! Full node orchestration for forgechain.
//!
//! [`Node::new`] wires the services of a proof-of-work full node together:
//! - chain database (with background legacy upgrade) and genesis setup
//! - consensus engine selection
//! - blockchain, bloom indexer and transaction pool
//! - protocol manager and miner
//!
//! Services are stopped in one fixed order by [`Node::stop`], on drop, and
//! when construction fails part way.
//!
//! # Example
//!
//! ```rust,no_run
//! use forgechain_node::{Node, NodeConfig, ServiceContext};
//!
//! let ctx = ServiceContext::ephemeral();
//! let config = NodeConfig {
//!     pow_fake: true,
//!     ..Default::default()
//! };
//! let node = Node::new(&ctx, config).unwrap();
//! assert_eq!(node.blockchain().current_block().number(), 0);
//! node.stop();
//! ```

pub mod accounts;
pub mod apis;
pub mod backend;
pub mod config;
pub mod error;
pub mod miner;
pub mod protocol;
pub mod shutdown;

pub use accounts::{AccountError, AccountManager, Wallet};
pub use apis::{node_apis, ApiDescriptor, ApiService};
pub use backend::{make_extra_data, Node};
pub use config::{NodeConfig, ServiceContext, SyncMode};
pub use error::{NodeError, Result};
pub use miner::{Miner, MinerError};
pub use protocol::{LightServer, NetInfo, NetworkServer, Protocol, ProtocolError, ProtocolManager};
pub use shutdown::StopStep;
