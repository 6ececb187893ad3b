//! Engine-agnostic header rules: difficulty, gas limit and header validation.
//!
//! Difficulty follows the Homestead adjustment with the exponential bomb.
//! The gas limit drifts towards a target by at most 1/1024 of the parent
//! limit per block.

use forgechain_core::params::{
    DIFFICULTY_BOUND_DIVISOR, EXP_DIFF_PERIOD, GAS_LIMIT_BOUND_DIVISOR,
    HOMESTEAD_ADJUSTMENT_WINDOW, MAXIMUM_EXTRA_DATA_SIZE, MINIMUM_DIFFICULTY, MIN_GAS_LIMIT,
    TARGET_GAS_LIMIT,
};
use forgechain_core::Header;
use thiserror::Error;

/// Seconds a header timestamp may lie ahead of the local clock.
pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 15;

/// Largest gas limit a header may declare.
pub const MAX_GAS_LIMIT: u64 = i64::MAX as u64;

/// Errors raised by header validation and sealing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("extra-data too long: {len} > {max}")]
    ExtraDataTooLong { len: usize, max: usize },

    #[error("block in the future")]
    FutureBlock,

    #[error("timestamp equals or precedes parent")]
    OlderBlock,

    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidNumber { expected: u64, got: u64 },

    #[error("invalid difficulty: expected {expected}, got {got}")]
    InvalidDifficulty { expected: u64, got: u64 },

    #[error("invalid gas limit: have {have}, parent {parent}")]
    InvalidGasLimit { have: u64, parent: u64 },

    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceeded { used: u64, limit: u64 },

    #[error("unknown ancestor")]
    UnknownAncestor,

    #[error("invalid proof-of-work")]
    InvalidSeal,
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Difficulty a block created at `time` on top of `parent` must have.
///
/// ```text
/// adj  = max(1 - (time - parent.time) / 10, -99)
/// diff = parent.diff + parent.diff / 2048 * adj + 2^(period - 2)
/// ```
///
/// where `period = (parent.number + 1) / 100_000` and the bomb term only
/// applies once `period > 1`. The result never drops below
/// [`MINIMUM_DIFFICULTY`].
pub fn calc_difficulty(time: u64, parent: &Header) -> u64 {
    let parent_diff = parent.difficulty as i128;
    let elapsed = time.saturating_sub(parent.timestamp) as i128;
    let adjustment = (1 - elapsed / HOMESTEAD_ADJUSTMENT_WINDOW as i128).max(-99);

    let mut difficulty =
        parent_diff + parent_diff / DIFFICULTY_BOUND_DIVISOR as i128 * adjustment;
    difficulty = difficulty.max(MINIMUM_DIFFICULTY as i128);

    let period = (parent.number + 1) / EXP_DIFF_PERIOD;
    if period > 1 {
        let shift = (period - 2).min(126) as u32;
        difficulty = difficulty.saturating_add(1i128 << shift);
    }

    difficulty.clamp(MINIMUM_DIFFICULTY as i128, u64::MAX as i128) as u64
}

/// Gas limit of the block after `parent`.
///
/// The limit decays by `parent.gas_limit / 1024 - 1` and grows with usage
/// by `(gas_used * 3 / 2) / 1024`; below the target it climbs towards it.
pub fn calc_gas_limit(parent: &Header) -> u64 {
    let contrib = (parent.gas_used + parent.gas_used / 2) / GAS_LIMIT_BOUND_DIVISOR;
    let decay = (parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR).saturating_sub(1);

    let mut limit = (parent.gas_limit - decay + contrib).max(MIN_GAS_LIMIT);
    if limit < TARGET_GAS_LIMIT {
        limit = (parent.gas_limit + decay).min(TARGET_GAS_LIMIT);
    }
    limit
}

/// Check `header` against its `parent` using every rule that does not need
/// the proof of work. `now` is the local clock in seconds.
pub fn verify_header(header: &Header, parent: &Header, now: u64) -> Result<()> {
    if header.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
        return Err(ConsensusError::ExtraDataTooLong {
            len: header.extra_data.len(),
            max: MAXIMUM_EXTRA_DATA_SIZE,
        });
    }
    if header.timestamp > now + ALLOWED_FUTURE_BLOCK_TIME {
        return Err(ConsensusError::FutureBlock);
    }
    if header.timestamp <= parent.timestamp {
        return Err(ConsensusError::OlderBlock);
    }
    if header.number != parent.number + 1 {
        return Err(ConsensusError::InvalidNumber {
            expected: parent.number + 1,
            got: header.number,
        });
    }

    let expected = calc_difficulty(header.timestamp, parent);
    if header.difficulty != expected {
        return Err(ConsensusError::InvalidDifficulty {
            expected,
            got: header.difficulty,
        });
    }

    if header.gas_limit > MAX_GAS_LIMIT || header.gas_limit < MIN_GAS_LIMIT {
        return Err(ConsensusError::InvalidGasLimit {
            have: header.gas_limit,
            parent: parent.gas_limit,
        });
    }
    if header.gas_used > header.gas_limit {
        return Err(ConsensusError::GasUsedExceeded {
            used: header.gas_used,
            limit: header.gas_limit,
        });
    }
    let bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
    if header.gas_limit.abs_diff(parent.gas_limit) >= bound {
        return Err(ConsensusError::InvalidGasLimit {
            have: header.gas_limit,
            parent: parent.gas_limit,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgechain_core::params::{GENESIS_DIFFICULTY, GENESIS_GAS_LIMIT};
    use forgechain_core::{Address, Bloom, Hash};

    fn parent(number: u64, difficulty: u64, timestamp: u64) -> Header {
        Header {
            parent_hash: Hash::ZERO,
            uncle_hash: Hash::ZERO,
            coinbase: Address::ZERO,
            state_root: Hash::ZERO,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            bloom: Bloom::default(),
            difficulty,
            number,
            gas_limit: GENESIS_GAS_LIMIT,
            gas_used: 0,
            timestamp,
            extra_data: Vec::new(),
            mix_digest: Hash::ZERO,
            nonce: 0,
        }
    }

    fn child(parent: &Header, elapsed: u64) -> Header {
        let mut header = parent.clone();
        header.parent_hash = parent.hash();
        header.number = parent.number + 1;
        header.timestamp = parent.timestamp + elapsed;
        header.difficulty = calc_difficulty(header.timestamp, parent);
        header.gas_limit = calc_gas_limit(parent);
        header
    }

    #[test]
    fn test_difficulty_rises_on_fast_blocks() {
        let p = parent(1000, 1_000_000, 100);
        assert_eq!(calc_difficulty(105, &p), 1_000_000 + 1_000_000 / 2048);
    }

    #[test]
    fn test_difficulty_holds_in_window() {
        let p = parent(1000, 1_000_000, 100);
        assert_eq!(calc_difficulty(110, &p), 1_000_000);
        assert_eq!(calc_difficulty(119, &p), 1_000_000);
    }

    #[test]
    fn test_difficulty_falls_and_floors() {
        let p = parent(1000, 1_000_000, 100);
        assert_eq!(calc_difficulty(120, &p), 1_000_000 - 1_000_000 / 2048);

        let p = parent(1000, GENESIS_DIFFICULTY, 100);
        assert_eq!(calc_difficulty(10_000, &p), MINIMUM_DIFFICULTY);
    }

    #[test]
    fn test_difficulty_adjustment_is_capped() {
        let p = parent(1000, 10_000_000, 0);
        let step = 10_000_000 / 2048;
        assert_eq!(calc_difficulty(100_000, &p), 10_000_000 - step * 99);
    }

    #[test]
    fn test_difficulty_bomb() {
        let p = parent(299_999, 10_000_000, 100);
        // period 3 adds 2^1
        assert_eq!(calc_difficulty(110, &p), 10_000_000 + 2);

        let p = parent(150_000, 10_000_000, 100);
        assert_eq!(calc_difficulty(110, &p), 10_000_000);
    }

    #[test]
    fn test_gas_limit_climbs_to_target() {
        let mut p = parent(1, 0, 0);
        p.gas_limit = 1_000_000;
        assert_eq!(calc_gas_limit(&p), 1_000_000 + 1_000_000 / 1024 - 1);

        p.gas_limit = TARGET_GAS_LIMIT;
        assert_eq!(calc_gas_limit(&p), TARGET_GAS_LIMIT);
    }

    #[test]
    fn test_gas_limit_grows_with_usage() {
        let mut p = parent(1, 0, 0);
        p.gas_limit = 8_000_000;
        p.gas_used = 8_000_000;
        let decay = 8_000_000 / 1024 - 1;
        let contrib = 12_000_000 / 1024;
        assert_eq!(calc_gas_limit(&p), 8_000_000 - decay + contrib);
    }

    #[test]
    fn test_valid_child_passes() {
        let p = parent(0, GENESIS_DIFFICULTY, 0);
        let header = child(&p, 10);
        assert_eq!(verify_header(&header, &p, 10), Ok(()));
    }

    #[test]
    fn test_header_rules_reject() {
        let p = parent(0, GENESIS_DIFFICULTY, 0);

        let mut header = child(&p, 10);
        header.extra_data = vec![0; MAXIMUM_EXTRA_DATA_SIZE + 1];
        assert!(matches!(
            verify_header(&header, &p, 10),
            Err(ConsensusError::ExtraDataTooLong { .. })
        ));

        let header = child(&p, 0);
        assert_eq!(verify_header(&header, &p, 10), Err(ConsensusError::OlderBlock));

        let header = child(&p, 100);
        assert_eq!(verify_header(&header, &p, 10), Err(ConsensusError::FutureBlock));

        let mut header = child(&p, 10);
        header.number = 5;
        assert!(matches!(
            verify_header(&header, &p, 10),
            Err(ConsensusError::InvalidNumber { expected: 1, got: 5 })
        ));

        let mut header = child(&p, 10);
        header.difficulty += 1;
        assert!(matches!(
            verify_header(&header, &p, 10),
            Err(ConsensusError::InvalidDifficulty { .. })
        ));

        let mut header = child(&p, 10);
        header.gas_used = header.gas_limit + 1;
        assert!(matches!(
            verify_header(&header, &p, 10),
            Err(ConsensusError::GasUsedExceeded { .. })
        ));

        let mut header = child(&p, 10);
        header.gas_limit = p.gas_limit * 2;
        assert!(matches!(
            verify_header(&header, &p, 10),
            Err(ConsensusError::InvalidGasLimit { .. })
        ));
    }
}
