//! Shared protocol parameters.
//!
//! One parameter block governs all three components. The registry owns the
//! live copy and gates every write behind its owner; peers read through the
//! registry handle they are passed. Quorum and slash fractions are basis
//! points so the arithmetic stays integral end to end.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Basis-point denominator used for quorum and slash fractions.
pub const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Fraction of a snapshot that must agree on one value, in basis points.
    /// Valid range `(0, 10000]`.
    pub quorum_bps: u16,
    /// Seconds between a bucket's first submission and its deadline.
    pub claim_window_secs: u64,
    /// Stake-token wei paid per verified Wh, split across winners.
    pub reward_per_wh_wei: U256,
    /// Fraction of stake removed on a slash, in basis points.
    pub slash_bps: u16,
    /// Fault count at which a verifier is auto-slashed.
    pub fault_threshold: u32,
    /// Minimum stake required to activate.
    pub min_stake: U256,
    /// When set, activation additionally requires an allowlist entry.
    pub permissioned_mode: bool,
    /// Research shortcut: a submission from `single_verifier_override`
    /// finalizes its claim immediately, skipping the claim window.
    pub baseline_mode: bool,
    /// When set, faults are still counted but never trigger a slash.
    pub slashing_disabled: bool,
    /// The trusted verifier honored by `baseline_mode`.
    pub single_verifier_override: Option<Address>,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        ProtocolParams {
            quorum_bps: 6667,
            claim_window_secs: 3600,
            reward_per_wh_wei: U256::from(1_000_000_000_000u64), // 1e12 wei/Wh
            slash_bps: 1000,                                     // 10%
            fault_threshold: 3,
            min_stake: U256::from(100) * U256::from(10).pow(U256::from(18)),
            permissioned_mode: true,
            baseline_mode: false,
            slashing_disabled: false,
            single_verifier_override: None,
        }
    }
}

impl ProtocolParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.quorum_bps == 0 || self.quorum_bps as u64 > BPS_DENOMINATOR {
            return Err(ParamsError::InvalidQuorumBps(self.quorum_bps));
        }
        Ok(())
    }

    /// Agreeing submissions required for a snapshot of `snapshot_len`
    /// verifiers: `ceil(len * quorum_bps / 10000)`.
    pub fn quorum_required(&self, snapshot_len: usize) -> u32 {
        let n = snapshot_len as u64;
        ((n * self.quorum_bps as u64 + BPS_DENOMINATOR - 1) / BPS_DENOMINATOR) as u32
    }

    /// Stake removed from `stake` by one slash: `stake * slash_bps / 10000`.
    pub fn slash_amount(&self, stake: U256) -> U256 {
        stake * U256::from(self.slash_bps) / U256::from(BPS_DENOMINATOR)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("quorum basis points must be in (0, 10000], got {0}")]
    InvalidQuorumBps(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = ProtocolParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.quorum_bps, 6667);
        assert_eq!(params.claim_window_secs, 3600);
        assert_eq!(params.fault_threshold, 3);
        assert_eq!(
            params.min_stake,
            U256::from(100) * U256::from(10).pow(U256::from(18))
        );
    }

    #[test]
    fn test_quorum_bps_bounds() {
        let mut params = ProtocolParams::default();

        params.quorum_bps = 0;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::InvalidQuorumBps(0))
        ));

        params.quorum_bps = 10_000;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_quorum_required_rounds_up() {
        let mut params = ProtocolParams::default();

        // 6667 bps over small sets: 3-of-3, 4-of-5, 3-of-4.
        assert_eq!(params.quorum_required(3), 3);
        assert_eq!(params.quorum_required(5), 4);
        assert_eq!(params.quorum_required(4), 3);
        assert_eq!(params.quorum_required(1), 1);

        params.quorum_bps = 10_000;
        assert_eq!(params.quorum_required(16), 16);

        params.quorum_bps = 1;
        assert_eq!(params.quorum_required(16), 1);
    }

    #[test]
    fn test_slash_amount_floor() {
        let params = ProtocolParams::default(); // 1000 bps
        assert_eq!(params.slash_amount(U256::from(100)), U256::from(10));
        assert_eq!(params.slash_amount(U256::from(9)), U256::ZERO);
    }
}
