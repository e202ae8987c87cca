//! Reward pool, fault accounting and slashing.
//!
//! The treasury pays winning verifiers out of a funded pool, counts faults
//! against losing ones through the registry, and removes a slice of a
//! repeatedly faulty verifier's stake into the pool. It never owns its
//! peers: the registry (and the stake token, when principal moves) is
//! passed in by the operation that spans them.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, U256};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use joule_core::{Event, EventLog, FaultKind, VerifierBitmap};
use joule_registry::{Registry, RegistryError};
use joule_token::{StakeToken, TokenError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treasury {
    address: Address,
    owner: Address,
    authorized_oracles: BTreeSet<Address>,

    reward_pool: U256,
    pending_rewards: BTreeMap<Address, U256>,
    slashed: BTreeSet<Address>,

    // Conservation counters: pool + Σpending + claimed == deposited + slashed-in.
    total_deposited: U256,
    total_slashed_in: U256,
    total_claimed: U256,
}

impl Treasury {
    pub fn new(address: Address, owner: Address) -> Self {
        Treasury {
            address,
            owner,
            authorized_oracles: BTreeSet::new(),
            reward_pool: U256::ZERO,
            pending_rewards: BTreeMap::new(),
            slashed: BTreeSet::new(),
            total_deposited: U256::ZERO,
            total_slashed_in: U256::ZERO,
            total_claimed: U256::ZERO,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn reward_pool(&self) -> U256 {
        self.reward_pool
    }

    pub fn pending_rewards(&self, verifier: Address) -> U256 {
        self.pending_rewards
            .get(&verifier)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn is_slashed(&self, verifier: Address) -> bool {
        self.slashed.contains(&verifier)
    }

    pub fn authorize_oracle(&mut self, caller: Address, oracle: Address) -> Result<(), TreasuryError> {
        self.require_owner(caller)?;
        self.authorized_oracles.insert(oracle);
        Ok(())
    }

    /// Fund the reward pool from `from`'s stake-token balance (allowance
    /// approved to the treasury).
    pub fn deposit_rewards(
        &mut self,
        from: Address,
        amount: U256,
        stake_token: &mut StakeToken,
    ) -> Result<(), TreasuryError> {
        if amount == U256::ZERO {
            return Err(TreasuryError::ZeroAmount);
        }
        stake_token.transfer_from(self.address, from, self.address, amount)?;
        self.reward_pool += amount;
        self.total_deposited += amount;
        Ok(())
    }

    /// Withdraw unallocated pool funds (owner only).
    pub fn withdraw_pool(
        &mut self,
        caller: Address,
        to: Address,
        amount: U256,
        stake_token: &mut StakeToken,
    ) -> Result<(), TreasuryError> {
        self.require_owner(caller)?;
        if amount > self.reward_pool {
            return Err(TreasuryError::InsufficientPoolBalance);
        }
        self.reward_pool -= amount;
        self.total_deposited -= amount;
        stake_token.transfer(self.address, to, amount)?;
        Ok(())
    }

    /// The pool debit `distribute_rewards` would make for `energy_wh` at the
    /// current reward rate. Callers that must stay atomic check this before
    /// committing their own state.
    pub fn distribution_cost(&self, registry: &Registry, energy_wh: u64) -> U256 {
        U256::from(energy_wh) * registry.params().reward_per_wh_wei
    }

    /// Split `energy_wh * reward_per_wh` evenly across the winners of a
    /// finalized claim. Integer division; dust stays in the pool.
    pub fn distribute_rewards(
        &mut self,
        caller: Address,
        winners: VerifierBitmap,
        snapshot_id: u64,
        energy_wh: u64,
        registry: &Registry,
        events: &mut EventLog,
    ) -> Result<(), TreasuryError> {
        self.require_oracle(caller)?;

        let winner_count = winners.count();
        let total = self.distribution_cost(registry, energy_wh);
        if winner_count == 0 || total == U256::ZERO {
            events.emit(Event::RewardsDistributed {
                winner_bitmap: winners,
                snapshot_id,
                total_distributed: U256::ZERO,
            });
            return Ok(());
        }
        if total > self.reward_pool {
            return Err(TreasuryError::InsufficientRewardPool);
        }

        let per_winner = total / U256::from(winner_count);
        let distributed = per_winner * U256::from(winner_count);

        let snapshot = registry.snapshot(snapshot_id)?;
        for index in winners.indices() {
            let verifier = snapshot
                .verifier_at(index)
                .ok_or(RegistryError::VerifierNotInSnapshot)?;
            *self.pending_rewards.entry(verifier).or_insert(U256::ZERO) += per_winner;
        }
        self.reward_pool -= distributed;

        events.emit(Event::RewardsDistributed {
            winner_bitmap: winners,
            snapshot_id,
            total_distributed: distributed,
        });
        info!(
            "distributed {distributed} wei to {winner_count} verifiers for snapshot {snapshot_id}"
        );
        Ok(())
    }

    /// Count one fault against `verifier`, auto-slashing at the threshold
    /// unless slashing is disabled.
    pub fn record_fault(
        &mut self,
        caller: Address,
        verifier: Address,
        kind: FaultKind,
        registry: &mut Registry,
        stake_token: &mut StakeToken,
        events: &mut EventLog,
    ) -> Result<(), TreasuryError> {
        self.require_oracle(caller)?;

        let faults = registry.increment_faults(self.address, verifier)?;
        events.emit(Event::FaultRecorded {
            verifier,
            kind,
            total_faults: faults,
        });
        warn!("fault {kind} recorded against {verifier} (total {faults})");

        let params = registry.params();
        if !params.slashing_disabled
            && faults >= params.fault_threshold
            && !self.slashed.contains(&verifier)
        {
            self.apply_slash(verifier, registry, stake_token, events)?;
        }
        Ok(())
    }

    /// Count faults against every verifier in `losers`, resolved through a
    /// snapshot.
    pub fn record_faults(
        &mut self,
        caller: Address,
        losers: VerifierBitmap,
        snapshot_id: u64,
        kind: FaultKind,
        registry: &mut Registry,
        stake_token: &mut StakeToken,
        events: &mut EventLog,
    ) -> Result<(), TreasuryError> {
        self.require_oracle(caller)?;

        let members: Vec<Address> = {
            let snapshot = registry.snapshot(snapshot_id)?;
            losers
                .indices()
                .map(|index| {
                    snapshot
                        .verifier_at(index)
                        .ok_or(RegistryError::VerifierNotInSnapshot)
                })
                .collect::<Result<_, _>>()?
        };

        for verifier in members {
            self.record_fault(caller, verifier, kind, registry, stake_token, events)?;
        }
        Ok(())
    }

    /// Manually slash a verifier past the fault threshold (owner only).
    /// A silent no-op while slashing is disabled.
    pub fn slash(
        &mut self,
        caller: Address,
        verifier: Address,
        registry: &mut Registry,
        stake_token: &mut StakeToken,
        events: &mut EventLog,
    ) -> Result<(), TreasuryError> {
        self.require_owner(caller)?;
        if registry.params().slashing_disabled {
            return Ok(());
        }

        let faults = registry.verifier(verifier).map(|v| v.faults).unwrap_or(0);
        if faults < registry.params().fault_threshold {
            return Err(TreasuryError::FaultThresholdNotReached);
        }
        if self.slashed.contains(&verifier) {
            return Err(TreasuryError::AlreadySlashed);
        }
        self.apply_slash(verifier, registry, stake_token, events)
    }

    fn apply_slash(
        &mut self,
        verifier: Address,
        registry: &mut Registry,
        stake_token: &mut StakeToken,
        events: &mut EventLog,
    ) -> Result<(), TreasuryError> {
        let stake = registry.verifier(verifier).map(|v| v.stake).unwrap_or(U256::ZERO);
        let amount = registry.params().slash_amount(stake);
        let removed = registry.reduce_stake(self.address, verifier, amount, stake_token)?;

        self.reward_pool += removed;
        self.total_slashed_in += removed;
        self.slashed.insert(verifier);

        events.emit(Event::Slashed {
            verifier,
            amount: removed,
        });
        warn!("slashed {verifier} for {removed} wei of stake");
        Ok(())
    }

    /// Pay out and zero the caller's pending rewards.
    pub fn claim_rewards(
        &mut self,
        caller: Address,
        stake_token: &mut StakeToken,
        events: &mut EventLog,
    ) -> Result<U256, TreasuryError> {
        let amount = self.pending_rewards(caller);
        if amount == U256::ZERO {
            return Err(TreasuryError::ZeroAmount);
        }
        self.pending_rewards.remove(&caller);
        self.total_claimed += amount;
        stake_token.transfer(self.address, caller, amount)?;
        events.emit(Event::RewardsClaimed {
            verifier: caller,
            amount,
        });
        Ok(amount)
    }

    /// Conservation check: every wei that entered (deposits, slashed
    /// principal) is either in the pool, pending, or already claimed.
    pub fn verify_conservation(&self) -> bool {
        let pending: U256 = self
            .pending_rewards
            .values()
            .fold(U256::ZERO, |acc, v| acc + *v);
        self.reward_pool + pending + self.total_claimed
            == self.total_deposited + self.total_slashed_in
    }

    fn require_owner(&self, caller: Address) -> Result<(), TreasuryError> {
        if caller != self.owner {
            return Err(TreasuryError::NotOwner);
        }
        Ok(())
    }

    fn require_oracle(&self, caller: Address) -> Result<(), TreasuryError> {
        if !self.authorized_oracles.contains(&caller) {
            return Err(TreasuryError::OnlyAuthorizedOracle);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreasuryError {
    #[error("zero amount")]
    ZeroAmount,
    #[error("reward pool cannot cover the distribution")]
    InsufficientRewardPool,
    #[error("withdrawal exceeds pool balance")]
    InsufficientPoolBalance,
    #[error("fault threshold not reached")]
    FaultThresholdNotReached,
    #[error("verifier already slashed")]
    AlreadySlashed,
    #[error("caller is not an authorized oracle")]
    OnlyAuthorizedOracle,
    #[error("caller is not the owner")]
    NotOwner,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;
    use joule_core::ProtocolParams;

    const OWNER: Address = Address::with_last_byte(0x01);
    const REGISTRY: Address = Address::with_last_byte(0x11);
    const TREASURY: Address = Address::with_last_byte(0x12);
    const ORACLE: Address = Address::with_last_byte(0x13);
    const FUNDER: Address = Address::with_last_byte(0x02);

    fn verifier_addr(i: u8) -> Address {
        Address::with_last_byte(0x20 + i)
    }

    struct Fixture {
        registry: Registry,
        treasury: Treasury,
        token: StakeToken,
        events: EventLog,
    }

    /// Registry with `n` active verifiers staking 100 each, treasury funded
    /// with 1e18 pool wei.
    fn fixture(n: u8) -> Fixture {
        let params = ProtocolParams {
            permissioned_mode: false,
            min_stake: U256::from(100),
            ..ProtocolParams::default()
        };
        let mut registry = Registry::new(REGISTRY, OWNER, params).unwrap();
        registry.set_treasury(OWNER, TREASURY).unwrap();
        registry.authorize_oracle(OWNER, ORACLE).unwrap();

        let mut treasury = Treasury::new(TREASURY, OWNER);
        treasury.authorize_oracle(OWNER, ORACLE).unwrap();

        let mut token = StakeToken::new(OWNER);
        let pool = U256::from(10).pow(U256::from(18));
        token.mint(OWNER, FUNDER, pool).unwrap();
        token.approve(FUNDER, TREASURY, pool).unwrap();
        treasury.deposit_rewards(FUNDER, pool, &mut token).unwrap();

        for i in 0..n {
            let v = verifier_addr(i);
            token.mint(OWNER, v, U256::from(100)).unwrap();
            token.approve(v, REGISTRY, U256::from(100)).unwrap();
            registry
                .stake_as_verifier(v, U256::from(100), &mut token)
                .unwrap();
            registry.activate_verifier(v).unwrap();
        }

        Fixture {
            registry,
            treasury,
            token,
            events: EventLog::new(),
        }
    }

    fn snapshot_bitmap(fix: &mut Fixture, indices: &[u8]) -> (u64, VerifierBitmap) {
        let id = fix
            .registry
            .create_snapshot(ORACLE, B256::repeat_byte(0xC1), 1000, &mut fix.events)
            .unwrap();
        let mut bitmap = VerifierBitmap::EMPTY;
        for i in indices {
            bitmap.set(*i);
        }
        (id, bitmap)
    }

    #[test]
    fn test_distribution_splits_evenly_with_dust() {
        let mut fix = fixture(3);
        let (snapshot_id, winners) = snapshot_bitmap(&mut fix, &[0, 1, 2]);
        let pool_before = fix.treasury.reward_pool();

        fix.treasury
            .distribute_rewards(ORACLE, winners, snapshot_id, 5000, &fix.registry, &mut fix.events)
            .unwrap();

        // 5000 Wh * 1e12 wei / 3 winners, floored.
        let per_winner = U256::from(5000u64) * U256::from(1_000_000_000_000u64) / U256::from(3);
        for i in 0..3 {
            assert_eq!(fix.treasury.pending_rewards(verifier_addr(i)), per_winner);
        }
        assert_eq!(
            fix.treasury.reward_pool(),
            pool_before - per_winner * U256::from(3)
        );
        assert!(fix.treasury.verify_conservation());
    }

    #[test]
    fn test_distribution_requires_oracle_authority() {
        let mut fix = fixture(1);
        let (snapshot_id, winners) = snapshot_bitmap(&mut fix, &[0]);
        assert_eq!(
            fix.treasury.distribute_rewards(
                OWNER,
                winners,
                snapshot_id,
                5000,
                &fix.registry,
                &mut fix.events
            ),
            Err(TreasuryError::OnlyAuthorizedOracle)
        );
    }

    #[test]
    fn test_zero_winner_distribution_is_a_zero_event() {
        let mut fix = fixture(1);
        let (snapshot_id, _) = snapshot_bitmap(&mut fix, &[0]);
        let pool_before = fix.treasury.reward_pool();

        fix.treasury
            .distribute_rewards(
                ORACLE,
                VerifierBitmap::EMPTY,
                snapshot_id,
                5000,
                &fix.registry,
                &mut fix.events,
            )
            .unwrap();

        assert_eq!(fix.treasury.reward_pool(), pool_before);
        assert!(matches!(
            fix.events.events().last(),
            Some(Event::RewardsDistributed {
                total_distributed,
                ..
            }) if *total_distributed == U256::ZERO
        ));
    }

    #[test]
    fn test_distribution_fails_on_empty_pool() {
        let mut fix = fixture(1);
        let (snapshot_id, winners) = snapshot_bitmap(&mut fix, &[0]);
        let pool = fix.treasury.reward_pool();
        fix.treasury
            .withdraw_pool(OWNER, FUNDER, pool, &mut fix.token)
            .unwrap();

        assert_eq!(
            fix.treasury.distribute_rewards(
                ORACLE,
                winners,
                snapshot_id,
                5000,
                &fix.registry,
                &mut fix.events
            ),
            Err(TreasuryError::InsufficientRewardPool)
        );
    }

    #[test]
    fn test_faults_accumulate_and_auto_slash() {
        let mut fix = fixture(1);
        let v = verifier_addr(0);
        let pool_before = fix.treasury.reward_pool();

        for _ in 0..2 {
            fix.treasury
                .record_fault(
                    ORACLE,
                    v,
                    FaultKind::WrongValue,
                    &mut fix.registry,
                    &mut fix.token,
                    &mut fix.events,
                )
                .unwrap();
        }
        assert!(!fix.treasury.is_slashed(v));
        assert_eq!(fix.registry.verifier(v).unwrap().faults, 2);

        // Third fault crosses the threshold: 10% of 100 = 10 into the pool.
        fix.treasury
            .record_fault(
                ORACLE,
                v,
                FaultKind::LateSubmission,
                &mut fix.registry,
                &mut fix.token,
                &mut fix.events,
            )
            .unwrap();
        assert!(fix.treasury.is_slashed(v));
        assert_eq!(fix.registry.verifier(v).unwrap().stake, U256::from(90));
        assert_eq!(fix.treasury.reward_pool(), pool_before + U256::from(10));

        // A fourth fault never double-slashes.
        fix.treasury
            .record_fault(
                ORACLE,
                v,
                FaultKind::WrongValue,
                &mut fix.registry,
                &mut fix.token,
                &mut fix.events,
            )
            .unwrap();
        assert_eq!(fix.registry.verifier(v).unwrap().faults, 4);
        assert_eq!(fix.registry.verifier(v).unwrap().stake, U256::from(90));
        assert!(fix.treasury.verify_conservation());
    }

    #[test]
    fn test_slashing_disabled_counts_but_never_slashes() {
        let mut fix = fixture(1);
        fix.registry.set_slashing_disabled(OWNER, true).unwrap();
        let v = verifier_addr(0);

        for _ in 0..5 {
            fix.treasury
                .record_fault(
                    ORACLE,
                    v,
                    FaultKind::WrongValue,
                    &mut fix.registry,
                    &mut fix.token,
                    &mut fix.events,
                )
                .unwrap();
        }
        assert_eq!(fix.registry.verifier(v).unwrap().faults, 5);
        assert!(!fix.treasury.is_slashed(v));
        assert_eq!(fix.registry.verifier(v).unwrap().stake, U256::from(100));

        // Manual slash is a silent no-op in this mode.
        fix.treasury
            .slash(OWNER, v, &mut fix.registry, &mut fix.token, &mut fix.events)
            .unwrap();
        assert!(!fix.treasury.is_slashed(v));
    }

    #[test]
    fn test_manual_slash_guards() {
        let mut fix = fixture(1);
        let v = verifier_addr(0);

        assert_eq!(
            fix.treasury
                .slash(OWNER, v, &mut fix.registry, &mut fix.token, &mut fix.events),
            Err(TreasuryError::FaultThresholdNotReached)
        );

        for _ in 0..3 {
            fix.treasury
                .record_fault(
                    ORACLE,
                    v,
                    FaultKind::WrongValue,
                    &mut fix.registry,
                    &mut fix.token,
                    &mut fix.events,
                )
                .unwrap();
        }
        // Auto-slash already fired at the threshold.
        assert_eq!(
            fix.treasury
                .slash(OWNER, v, &mut fix.registry, &mut fix.token, &mut fix.events),
            Err(TreasuryError::AlreadySlashed)
        );
    }

    #[test]
    fn test_claim_rewards_pays_and_zeroes() {
        let mut fix = fixture(2);
        let (snapshot_id, winners) = snapshot_bitmap(&mut fix, &[0, 1]);
        fix.treasury
            .distribute_rewards(ORACLE, winners, snapshot_id, 1000, &fix.registry, &mut fix.events)
            .unwrap();

        let v = verifier_addr(0);
        let pending = fix.treasury.pending_rewards(v);
        assert!(pending > U256::ZERO);

        let paid = fix
            .treasury
            .claim_rewards(v, &mut fix.token, &mut fix.events)
            .unwrap();
        assert_eq!(paid, pending);
        assert_eq!(fix.token.balance_of(v), pending);
        assert_eq!(fix.treasury.pending_rewards(v), U256::ZERO);

        assert_eq!(
            fix.treasury
                .claim_rewards(v, &mut fix.token, &mut fix.events),
            Err(TreasuryError::ZeroAmount)
        );
        assert!(fix.treasury.verify_conservation());
    }
}
