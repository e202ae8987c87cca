//! The authoritative verifier/producer/consumer registry.
//!
//! Owns verifier stake and lifecycle, the bounded active set, immutable
//! per-claim snapshots, and the shared parameter block. Peers reach in
//! through narrow, caller-checked entry points: oracles may create
//! snapshots, only the treasury may touch faults and stake principal, and
//! only the owner may tune parameters.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, B256, U256};
use log::info;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use joule_core::{Event, EventLog, ParamsError, ProtocolParams, MAX_ACTIVE_VERIFIERS};
use joule_token::{StakeToken, TokenError};

use crate::snapshot::Snapshot;

/// Per-verifier record. Created implicitly on first stake, never destroyed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierAccount {
    pub stake: U256,
    pub faults: u32,
    pub active: bool,
    pub allowlisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub id: B256,
    pub identity_hash: B256,
    pub meta_hash: B256,
    pub payout: Address,
    pub owner: Address,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub id: B256,
    pub identity_hash: B256,
    pub meta_hash: B256,
    pub payout: Address,
    pub owner: Address,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    address: Address,
    owner: Address,
    treasury: Option<Address>,
    authorized_oracles: BTreeSet<Address>,
    params: ProtocolParams,

    verifiers: BTreeMap<Address, VerifierAccount>,
    /// Active verifier addresses; removal is swap-and-pop.
    active_set: Vec<Address>,
    /// 1-indexed position of each active verifier in `active_set`.
    active_pos: BTreeMap<Address, usize>,

    producers: BTreeMap<B256, Producer>,
    /// Producer identity hashes are globally unique.
    producer_identities: BTreeMap<B256, B256>,
    consumers: BTreeMap<B256, Consumer>,
    registration_nonce: u64,

    snapshots: BTreeMap<u64, Snapshot>,
    snapshot_by_claim: BTreeMap<B256, u64>,
    next_snapshot_id: u64,
}

impl Registry {
    pub fn new(address: Address, owner: Address, params: ProtocolParams) -> Result<Self, RegistryError> {
        params.validate()?;
        Ok(Registry {
            address,
            owner,
            treasury: None,
            authorized_oracles: BTreeSet::new(),
            params,
            verifiers: BTreeMap::new(),
            active_set: Vec::new(),
            active_pos: BTreeMap::new(),
            producers: BTreeMap::new(),
            producer_identities: BTreeMap::new(),
            consumers: BTreeMap::new(),
            registration_nonce: 0,
            snapshots: BTreeMap::new(),
            snapshot_by_claim: BTreeMap::new(),
            next_snapshot_id: 1,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    // ------------------------------------------------------------------
    // Authority wiring
    // ------------------------------------------------------------------

    pub fn set_treasury(&mut self, caller: Address, treasury: Address) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.treasury = Some(treasury);
        Ok(())
    }

    pub fn authorize_oracle(&mut self, caller: Address, oracle: Address) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.authorized_oracles.insert(oracle);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Producer / consumer registration
    // ------------------------------------------------------------------

    /// Register a production system. The identity hash commits to the
    /// physical installation and may be registered once, ever.
    pub fn register_producer(
        &mut self,
        caller: Address,
        identity_hash: B256,
        meta_hash: B256,
        payout: Address,
    ) -> Result<B256, RegistryError> {
        if payout == Address::ZERO {
            return Err(RegistryError::ZeroAddress);
        }
        if self.producer_identities.contains_key(&identity_hash) {
            return Err(RegistryError::SystemAlreadyRegistered);
        }

        let id = self.derive_subject_id(caller, identity_hash);
        self.producer_identities.insert(identity_hash, id);
        self.producers.insert(
            id,
            Producer {
                id,
                identity_hash,
                meta_hash,
                payout,
                owner: caller,
                active: true,
            },
        );
        info!("registered producer {id} for {caller}");
        Ok(id)
    }

    /// Register a consumption meter. Identity hashes are recorded but not
    /// required to be unique across consumers.
    pub fn register_consumer(
        &mut self,
        caller: Address,
        identity_hash: B256,
        meta_hash: B256,
        payout: Address,
    ) -> Result<B256, RegistryError> {
        if payout == Address::ZERO {
            return Err(RegistryError::ZeroAddress);
        }

        let id = self.derive_subject_id(caller, identity_hash);
        self.consumers.insert(
            id,
            Consumer {
                id,
                identity_hash,
                meta_hash,
                payout,
                owner: caller,
                active: true,
            },
        );
        info!("registered consumer {id} for {caller}");
        Ok(id)
    }

    fn derive_subject_id(&mut self, owner: Address, identity_hash: B256) -> B256 {
        let nonce = self.registration_nonce;
        self.registration_nonce += 1;

        let mut hasher = Keccak256::new();
        hasher.update(owner.as_slice());
        hasher.update(identity_hash.as_slice());
        hasher.update(nonce.to_be_bytes());
        B256::from_slice(&hasher.finalize())
    }

    pub fn producer(&self, id: B256) -> Result<&Producer, RegistryError> {
        self.producers.get(&id).ok_or(RegistryError::ProducerNotFound)
    }

    pub fn consumer(&self, id: B256) -> Result<&Consumer, RegistryError> {
        self.consumers.get(&id).ok_or(RegistryError::ConsumerNotFound)
    }

    pub fn is_producer_registered(&self, id: B256) -> bool {
        self.producers.get(&id).map(|p| p.active).unwrap_or(false)
    }

    pub fn is_consumer_registered(&self, id: B256) -> bool {
        self.consumers.get(&id).map(|c| c.active).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Verifier stake and lifecycle
    // ------------------------------------------------------------------

    pub fn verifier(&self, verifier: Address) -> Option<&VerifierAccount> {
        self.verifiers.get(&verifier)
    }

    pub fn is_active_verifier(&self, verifier: Address) -> bool {
        self.verifiers.get(&verifier).map(|v| v.active).unwrap_or(false)
    }

    pub fn active_verifiers(&self) -> &[Address] {
        &self.active_set
    }

    /// Escrow `amount` of the caller's stake token into the registry.
    /// Staking alone does not activate.
    pub fn stake_as_verifier(
        &mut self,
        caller: Address,
        amount: U256,
        stake_token: &mut StakeToken,
    ) -> Result<(), RegistryError> {
        if amount == U256::ZERO {
            return Err(RegistryError::ZeroAmount);
        }
        stake_token.transfer_from(self.address, caller, self.address, amount)?;
        let account = self.verifiers.entry(caller).or_default();
        account.stake += amount;
        Ok(())
    }

    /// Return escrowed stake. Active verifiers must deactivate first.
    pub fn unstake(
        &mut self,
        caller: Address,
        amount: U256,
        stake_token: &mut StakeToken,
    ) -> Result<(), RegistryError> {
        if amount == U256::ZERO {
            return Err(RegistryError::ZeroAmount);
        }
        let account = self
            .verifiers
            .get_mut(&caller)
            .ok_or(RegistryError::InsufficientStakeBalance)?;
        if account.active {
            return Err(RegistryError::VerifierAlreadyActive);
        }
        if account.stake < amount {
            return Err(RegistryError::InsufficientStakeBalance);
        }
        account.stake -= amount;
        stake_token.transfer(self.address, caller, amount)?;
        Ok(())
    }

    pub fn set_allowlisted(
        &mut self,
        caller: Address,
        verifier: Address,
        allowlisted: bool,
    ) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.verifiers.entry(verifier).or_default().allowlisted = allowlisted;
        Ok(())
    }

    /// Join the active set. The set is capped at the bitmap width; a 17th
    /// activation is refused outright rather than silently dropped from
    /// reward iteration later.
    pub fn activate_verifier(&mut self, caller: Address) -> Result<(), RegistryError> {
        let min_stake = self.params.min_stake;
        let permissioned = self.params.permissioned_mode;
        let at_capacity = self.active_set.len() >= MAX_ACTIVE_VERIFIERS;

        let account = self.verifiers.entry(caller).or_default();
        if permissioned && !account.allowlisted {
            return Err(RegistryError::VerifierNotAllowlisted);
        }
        if account.stake < min_stake {
            return Err(RegistryError::InsufficientStake);
        }
        if account.active {
            return Err(RegistryError::VerifierAlreadyActive);
        }
        if at_capacity {
            return Err(RegistryError::ActiveSetFull);
        }

        account.active = true;
        self.active_set.push(caller);
        self.active_pos.insert(caller, self.active_set.len());
        info!("verifier {caller} activated ({} active)", self.active_set.len());
        Ok(())
    }

    /// Leave the active set (swap-and-pop). Stake is preserved.
    pub fn deactivate_verifier(&mut self, caller: Address) -> Result<(), RegistryError> {
        let account = self
            .verifiers
            .get_mut(&caller)
            .filter(|v| v.active)
            .ok_or(RegistryError::VerifierNotActive)?;
        account.active = false;

        let pos = self
            .active_pos
            .remove(&caller)
            .ok_or(RegistryError::VerifierNotActive)?;
        self.active_set.swap_remove(pos - 1);
        // The former tail (if any) landed in the vacated slot.
        if let Some(&moved) = self.active_set.get(pos - 1) {
            self.active_pos.insert(moved, pos);
        }
        info!("verifier {caller} deactivated ({} active)", self.active_set.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Treasury-gated mutations
    // ------------------------------------------------------------------

    /// Count a fault against a verifier. Returns the new total.
    pub fn increment_faults(
        &mut self,
        caller: Address,
        verifier: Address,
    ) -> Result<u32, RegistryError> {
        self.require_treasury(caller)?;
        let account = self.verifiers.entry(verifier).or_default();
        account.faults += 1;
        Ok(account.faults)
    }

    /// Remove up to `amount` of a verifier's stake and move the principal
    /// to the treasury. Returns the amount actually removed.
    pub fn reduce_stake(
        &mut self,
        caller: Address,
        verifier: Address,
        amount: U256,
        stake_token: &mut StakeToken,
    ) -> Result<U256, RegistryError> {
        self.require_treasury(caller)?;
        let account = self.verifiers.entry(verifier).or_default();
        let removed = amount.min(account.stake);
        account.stake -= removed;
        if removed > U256::ZERO {
            stake_token.transfer(self.address, caller, removed)?;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Capture the active set for `claim_key`. Oracle-only; exactly once
    /// per claim.
    pub fn create_snapshot(
        &mut self,
        caller: Address,
        claim_key: B256,
        now: u64,
        events: &mut EventLog,
    ) -> Result<u64, RegistryError> {
        if !self.authorized_oracles.contains(&caller) {
            return Err(RegistryError::OnlyAuthorizedOracle);
        }
        if self.snapshot_by_claim.contains_key(&claim_key) {
            return Err(RegistryError::SnapshotAlreadyExists);
        }
        if self.active_set.is_empty() {
            return Err(RegistryError::NoActiveVerifiers);
        }

        let id = self.next_snapshot_id;
        self.next_snapshot_id += 1;

        let snapshot = Snapshot::capture(id, claim_key, self.active_set.clone(), now);
        let count = snapshot.len() as u32;
        self.snapshots.insert(id, snapshot);
        self.snapshot_by_claim.insert(claim_key, id);

        events.emit(Event::SnapshotCreated {
            claim_key,
            snapshot_id: id,
            verifier_count: count,
        });
        info!("snapshot {id} captured {count} verifiers for claim {claim_key}");
        Ok(id)
    }

    pub fn snapshot(&self, snapshot_id: u64) -> Result<&Snapshot, RegistryError> {
        self.snapshots
            .get(&snapshot_id)
            .ok_or(RegistryError::SnapshotNotFound)
    }

    pub fn snapshot_id_for(&self, claim_key: B256) -> Option<u64> {
        self.snapshot_by_claim.get(&claim_key).copied()
    }

    /// Bitmap index of `verifier` within a snapshot.
    pub fn verifier_index(
        &self,
        snapshot_id: u64,
        verifier: Address,
    ) -> Result<u8, RegistryError> {
        self.snapshot(snapshot_id)?
            .verifier_index(verifier)
            .ok_or(RegistryError::VerifierNotInSnapshot)
    }

    // ------------------------------------------------------------------
    // Parameter administration
    // ------------------------------------------------------------------

    pub fn set_quorum_bps(&mut self, caller: Address, quorum_bps: u16) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        let mut params = self.params.clone();
        params.quorum_bps = quorum_bps;
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_claim_window(&mut self, caller: Address, secs: u64) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.claim_window_secs = secs;
        Ok(())
    }

    pub fn set_reward_per_wh(&mut self, caller: Address, wei: U256) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.reward_per_wh_wei = wei;
        Ok(())
    }

    pub fn set_slash_bps(&mut self, caller: Address, slash_bps: u16) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.slash_bps = slash_bps;
        Ok(())
    }

    pub fn set_fault_threshold(&mut self, caller: Address, threshold: u32) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.fault_threshold = threshold;
        Ok(())
    }

    pub fn set_min_stake(&mut self, caller: Address, min_stake: U256) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.min_stake = min_stake;
        Ok(())
    }

    pub fn set_permissioned_mode(&mut self, caller: Address, on: bool) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.permissioned_mode = on;
        Ok(())
    }

    pub fn set_baseline_mode(&mut self, caller: Address, on: bool) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.baseline_mode = on;
        Ok(())
    }

    pub fn set_slashing_disabled(&mut self, caller: Address, disabled: bool) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.slashing_disabled = disabled;
        Ok(())
    }

    pub fn set_single_verifier_override(
        &mut self,
        caller: Address,
        verifier: Option<Address>,
    ) -> Result<(), RegistryError> {
        self.require_owner(caller)?;
        self.params.single_verifier_override = verifier;
        Ok(())
    }

    fn require_owner(&self, caller: Address) -> Result<(), RegistryError> {
        if caller != self.owner {
            return Err(RegistryError::NotOwner);
        }
        Ok(())
    }

    fn require_treasury(&self, caller: Address) -> Result<(), RegistryError> {
        if self.treasury != Some(caller) {
            return Err(RegistryError::OnlyTreasury);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("zero address")]
    ZeroAddress,
    #[error("zero amount")]
    ZeroAmount,
    #[error("system identity already registered")]
    SystemAlreadyRegistered,
    #[error("producer not found")]
    ProducerNotFound,
    #[error("consumer not found")]
    ConsumerNotFound,
    #[error("insufficient staked balance")]
    InsufficientStakeBalance,
    #[error("stake below activation minimum")]
    InsufficientStake,
    #[error("verifier is active")]
    VerifierAlreadyActive,
    #[error("verifier is not active")]
    VerifierNotActive,
    #[error("verifier is not allowlisted")]
    VerifierNotAllowlisted,
    #[error("active verifier set is full")]
    ActiveSetFull,
    #[error("no active verifiers")]
    NoActiveVerifiers,
    #[error("snapshot already exists for claim")]
    SnapshotAlreadyExists,
    #[error("snapshot not found")]
    SnapshotNotFound,
    #[error("verifier not in snapshot")]
    VerifierNotInSnapshot,
    #[error("caller is not an authorized oracle")]
    OnlyAuthorizedOracle,
    #[error("caller is not the treasury")]
    OnlyTreasury,
    #[error("caller is not the owner")]
    NotOwner,
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Token(#[from] TokenError),
}
