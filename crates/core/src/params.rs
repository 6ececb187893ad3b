//! Protocol parameters shared by the consensus rules, the chain and the miner.

/// Reward credited to a block's coinbase, 5 coins in base units.
pub const BLOCK_REWARD: u128 = 5_000_000_000_000_000_000;

/// Maximum size of a header's extra-data field in bytes.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// Bound divisor of the gas limit, used in update calculations.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Minimum the gas limit may ever be.
pub const MIN_GAS_LIMIT: u64 = 5000;

/// The artificial target the gas limit grows towards.
pub const TARGET_GAS_LIMIT: u64 = 4_712_388;

/// Gas limit of the default genesis block.
pub const GENESIS_GAS_LIMIT: u64 = 4_712_388;

/// Bound divisor of the difficulty, used in the update calculations.
pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;

/// The minimum that the difficulty may ever be.
pub const MINIMUM_DIFFICULTY: u64 = 131_072;

/// Difficulty of the default genesis block.
pub const GENESIS_DIFFICULTY: u64 = 131_072;

/// Block time below which the difficulty increases (pre-homestead rule).
pub const DURATION_LIMIT: u64 = 13;

/// Seconds per adjustment step of the homestead difficulty rule.
pub const HOMESTEAD_ADJUSTMENT_WINDOW: u64 = 10;

/// Blocks per difficulty-bomb period.
pub const EXP_DIFF_PERIOD: u64 = 100_000;

/// Gas charged for a plain value transfer.
pub const TX_GAS: u64 = 21_000;

/// Number of blocks per bloom-bits section.
pub const BLOOM_BITS_BLOCKS: u64 = 4096;

/// Depth below the head a block must reach before its section is indexed.
pub const BLOOM_CONFIRMS: u64 = 256;

/// Blocks per proof-of-work epoch (seed rotation).
pub const EPOCH_LENGTH: u64 = 30_000;
