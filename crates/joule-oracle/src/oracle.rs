//! Signed-claim aggregation and quorum finalization.
//!
//! One `Oracle` instance settles one claim family: the production instance
//! mints hour credits on finalization, the consumption instance records the
//! verified reading. Submission validation, snapshot pinning, tallying and
//! quorum resolution are identical between the two.
//!
//! The transport caller of `submit` is deliberately unauthenticated: only
//! the recovered signer matters, and the bitmap slot is keyed by it, so a
//! relayed signature is harmless.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, B256, U256};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use joule_core::{
    claim_key, recover_verifier, submission_digest, value_hash, ClaimKind, Event, EventLog,
    FaultKind, VerifierBitmap,
};
use joule_registry::{Registry, RegistryError};
use joule_token::{HourCreditToken, StakeToken, TokenError};
use joule_treasury::{Treasury, TreasuryError};

use crate::bucket::{ClaimBucket, ValueLedger};

/// Which claim family this oracle settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleKind {
    Production,
    Consumption,
}

impl OracleKind {
    pub fn claim_kind(self) -> ClaimKind {
        match self {
            OracleKind::Production => ClaimKind::Production,
            OracleKind::Consumption => ClaimKind::Consumption,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oracle {
    kind: OracleKind,
    address: Address,
    owner: Address,
    chain_id: u64,

    buckets: BTreeMap<B256, ClaimBucket>,
    values: BTreeMap<B256, ValueLedger>,
    submitted: BTreeMap<B256, BTreeSet<Address>>,
    evidence_seen: BTreeMap<B256, BTreeSet<B256>>,
    /// Consumption instance only: verified readings by `(consumer, hour)`.
    verified_consumption: BTreeMap<(B256, u64), u64>,
}

impl Oracle {
    pub fn production(address: Address, owner: Address, chain_id: u64) -> Self {
        Self::new(OracleKind::Production, address, owner, chain_id)
    }

    pub fn consumption(address: Address, owner: Address, chain_id: u64) -> Self {
        Self::new(OracleKind::Consumption, address, owner, chain_id)
    }

    fn new(kind: OracleKind, address: Address, owner: Address, chain_id: u64) -> Self {
        Oracle {
            kind,
            address,
            owner,
            chain_id,
            buckets: BTreeMap::new(),
            values: BTreeMap::new(),
            submitted: BTreeMap::new(),
            evidence_seen: BTreeMap::new(),
            verified_consumption: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> OracleKind {
        self.kind
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The bucket identifier for `(subject, hour)` under this oracle.
    pub fn claim_key_for(&self, subject_id: B256, hour_id: u64) -> B256 {
        claim_key(self.kind.claim_kind(), self.address, subject_id, hour_id)
    }

    /// The digest a verifier must sign for a submission to this oracle.
    pub fn digest_for(
        &self,
        subject_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
    ) -> B256 {
        submission_digest(
            self.chain_id,
            self.address,
            subject_id,
            hour_id,
            energy_wh,
            evidence_root,
        )
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Accept one signed claim submission.
    ///
    /// Late and duplicate submissions record a fault against the signer
    /// before failing; that fault write is durable even though the
    /// submission itself is rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        registry: &mut Registry,
        treasury: &mut Treasury,
        credit: &mut HourCreditToken,
        stake_token: &mut StakeToken,
        subject_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
        signature: &[u8],
        now: u64,
        events: &mut EventLog,
    ) -> Result<(), OracleError> {
        let key = self.claim_key_for(subject_id, hour_id);

        if self.buckets.get(&key).map(|b| b.finalized).unwrap_or(false) {
            return Err(OracleError::ClaimAlreadyFinalized);
        }

        match self.kind {
            OracleKind::Production if !registry.is_producer_registered(subject_id) => {
                return Err(OracleError::ProducerNotRegistered);
            }
            OracleKind::Consumption if !registry.is_consumer_registered(subject_id) => {
                return Err(OracleError::ConsumerNotRegistered);
            }
            _ => {}
        }

        let digest = self.digest_for(subject_id, hour_id, energy_wh, evidence_root);
        let signer = recover_verifier(digest, signature).ok_or(OracleError::InvalidSignature)?;

        if !registry.is_active_verifier(signer) {
            return Err(OracleError::VerifierNotActive);
        }

        // The first submission opens the bucket: snapshot pinned, window armed.
        if !self.buckets.contains_key(&key) {
            let snapshot_id = registry.create_snapshot(self.address, key, now, events)?;
            let deadline = now + registry.params().claim_window_secs;
            self.buckets.insert(key, ClaimBucket::open(snapshot_id, deadline));
        }
        let (deadline, snapshot_id) = {
            let bucket = self.bucket_ref(key)?;
            (bucket.deadline, bucket.snapshot_id)
        };

        if now > deadline {
            treasury.record_fault(
                self.address,
                signer,
                FaultKind::LateSubmission,
                registry,
                stake_token,
                events,
            )?;
            return Err(OracleError::ClaimDeadlinePassed);
        }

        let verifier_index = registry.verifier_index(snapshot_id, signer)?;

        if self
            .submitted
            .get(&key)
            .map(|set| set.contains(&signer))
            .unwrap_or(false)
        {
            treasury.record_fault(
                self.address,
                signer,
                FaultKind::DuplicateSubmission,
                registry,
                stake_token,
                events,
            )?;
            return Err(OracleError::DuplicateSubmission);
        }

        // All checks passed; commit the submission.
        self.submitted.entry(key).or_default().insert(signer);
        self.evidence_seen.entry(key).or_default().insert(evidence_root);

        let bucket = self.bucket_mut(key)?;
        bucket.all_submitters.set(verifier_index);
        bucket.submission_count += 1;
        bucket.max_submitted_energy_wh = bucket.max_submitted_energy_wh.max(energy_wh);

        let submitted_value = value_hash(energy_wh, evidence_root);
        self.values
            .entry(key)
            .or_default()
            .record(submitted_value, energy_wh, evidence_root, verifier_index);

        events.emit(Event::Submitted {
            claim_key: key,
            verifier: signer,
            energy_wh,
            value_hash: submitted_value,
        });

        // Trusted-single-verifier shortcut: settle immediately on the
        // override's own submission, skipping the claim window.
        let (baseline, override_verifier) = {
            let params = registry.params();
            (params.baseline_mode, params.single_verifier_override)
        };
        if baseline && override_verifier == Some(signer) {
            let winners = self
                .values
                .get(&key)
                .and_then(|ledger| ledger.get(submitted_value))
                .map(|tally| tally.verifiers)
                .unwrap_or(VerifierBitmap::EMPTY);
            self.settle(
                key,
                subject_id,
                hour_id,
                submitted_value,
                energy_wh,
                evidence_root,
                winners,
                VerifierBitmap::EMPTY,
                registry,
                treasury,
                credit,
                stake_token,
                events,
            )?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Resolve a claim after its deadline. Callable by anyone; a claim whose
    /// best value misses quorum becomes disputed instead of finalized.
    pub fn finalize(
        &mut self,
        registry: &mut Registry,
        treasury: &mut Treasury,
        credit: &mut HourCreditToken,
        stake_token: &mut StakeToken,
        subject_id: B256,
        hour_id: u64,
        now: u64,
        events: &mut EventLog,
    ) -> Result<(), OracleError> {
        let key = self.claim_key_for(subject_id, hour_id);

        let (deadline, snapshot_id, all_submitters) = {
            let bucket = self.bucket_ref(key)?;
            if bucket.finalized {
                return Err(OracleError::ClaimAlreadyFinalized);
            }
            if bucket.disputed {
                return Err(OracleError::ClaimAlreadyDisputed);
            }
            (bucket.deadline, bucket.snapshot_id, bucket.all_submitters)
        };
        if now <= deadline {
            return Err(OracleError::ClaimDeadlineNotReached);
        }

        let quorum = {
            let snapshot_len = registry.snapshot(snapshot_id)?.len();
            registry.params().quorum_required(snapshot_len)
        };

        let (winning_hash, count, energy_wh, evidence_root, winners) = {
            let (hash, tally) = self
                .values
                .get(&key)
                .and_then(|ledger| ledger.leading())
                .ok_or(OracleError::UnknownClaim)?;
            (hash, tally.count, tally.energy_wh, tally.evidence_root, tally.verifiers)
        };

        if count < quorum {
            let bucket = self.bucket_mut(key)?;
            bucket.disputed = true;
            warn!(
                "claim {key} disputed: best value has {count} of {quorum} required submissions"
            );
            events.emit(Event::ClaimDisputed {
                claim_key: key,
                subject_id,
                hour_id,
                reason: format!("quorum not reached: {count} of {quorum}"),
            });
            return Ok(());
        }

        let losers = all_submitters.minus(winners);
        self.settle(
            key,
            subject_id,
            hour_id,
            winning_hash,
            energy_wh,
            evidence_root,
            winners,
            losers,
            registry,
            treasury,
            credit,
            stake_token,
            events,
        )
    }

    /// Commit a winning value: mark the bucket finalized, apply the
    /// post-finalization effect, then pay winners and fault losers.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &mut self,
        key: B256,
        subject_id: B256,
        hour_id: u64,
        winning_hash: B256,
        energy_wh: u64,
        evidence_root: B256,
        winners: VerifierBitmap,
        losers: VerifierBitmap,
        registry: &mut Registry,
        treasury: &mut Treasury,
        credit: &mut HourCreditToken,
        stake_token: &mut StakeToken,
        events: &mut EventLog,
    ) -> Result<(), OracleError> {
        // The settlement must commit atomically, so the one treasury failure
        // that could surface mid-way is checked up front.
        if !winners.is_empty() {
            let cost = treasury.distribution_cost(registry, energy_wh);
            if cost > U256::ZERO && cost > treasury.reward_pool() {
                return Err(TreasuryError::InsufficientRewardPool.into());
            }
        }

        let snapshot_id = {
            let bucket = self.bucket_mut(key)?;
            bucket.finalized = true;
            bucket.disputed = false;
            bucket.verified_energy_wh = energy_wh;
            bucket.evidence_root = evidence_root;
            bucket.winning_value_hash = winning_hash;
            bucket.winning_verifiers = winners;
            bucket.snapshot_id
        };

        match self.kind {
            OracleKind::Production => {
                let payout = registry.producer(subject_id)?.payout;
                credit.mint(self.address, payout, hour_id, energy_wh, key, events)?;
            }
            OracleKind::Consumption => {
                self.verified_consumption.insert((subject_id, hour_id), energy_wh);
            }
        }

        events.emit(Event::Finalized {
            claim_key: key,
            subject_id,
            hour_id,
            energy_wh,
            evidence_root,
        });
        info!("claim {key} finalized at {energy_wh} Wh with {} winners", winners.count());

        treasury.distribute_rewards(self.address, winners, snapshot_id, energy_wh, registry, events)?;
        treasury.record_faults(
            self.address,
            losers,
            snapshot_id,
            FaultKind::WrongValue,
            registry,
            stake_token,
            events,
        )?;
        Ok(())
    }

    /// Resolve a disputed claim by fiat (owner only). The value must have
    /// been genuinely submitted: bounded by the largest submitted reading
    /// and backed by a submitted evidence root. No rewards, no faults; the
    /// zeroed winner bitmap marks the forced path.
    #[allow(clippy::too_many_arguments)]
    pub fn force_finalize(
        &mut self,
        caller: Address,
        registry: &Registry,
        credit: &mut HourCreditToken,
        subject_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
        now: u64,
        events: &mut EventLog,
    ) -> Result<(), OracleError> {
        if caller != self.owner {
            return Err(OracleError::NotOwner);
        }
        let key = self.claim_key_for(subject_id, hour_id);

        {
            let bucket = self.bucket_ref(key)?;
            if bucket.finalized {
                return Err(OracleError::ClaimAlreadyFinalized);
            }
            if !bucket.disputed {
                return Err(OracleError::ClaimNotDisputed);
            }
            if now <= bucket.deadline {
                return Err(OracleError::ClaimDeadlineNotReached);
            }
            if energy_wh > bucket.max_submitted_energy_wh {
                return Err(OracleError::EnergyExceedsMaxSubmitted);
            }
        }
        if !self
            .evidence_seen
            .get(&key)
            .map(|set| set.contains(&evidence_root))
            .unwrap_or(false)
        {
            return Err(OracleError::EvidenceRootNotSubmitted);
        }

        let bucket = self.bucket_mut(key)?;
        bucket.finalized = true;
        bucket.disputed = false;
        bucket.verified_energy_wh = energy_wh;
        bucket.evidence_root = evidence_root;
        bucket.winning_value_hash = value_hash(energy_wh, evidence_root);
        bucket.winning_verifiers = VerifierBitmap::EMPTY;

        match self.kind {
            OracleKind::Production => {
                let payout = registry.producer(subject_id)?.payout;
                credit.mint(self.address, payout, hour_id, energy_wh, key, events)?;
            }
            OracleKind::Consumption => {
                self.verified_consumption.insert((subject_id, hour_id), energy_wh);
            }
        }

        events.emit(Event::ForceFinalized {
            claim_key: key,
            admin: caller,
            energy_wh,
        });
        warn!("claim {key} force-finalized at {energy_wh} Wh by {caller}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read surface (keepers, exporters)
    // ------------------------------------------------------------------

    pub fn bucket(&self, claim_key: B256) -> Option<&ClaimBucket> {
        self.buckets.get(&claim_key)
    }

    /// All buckets, for audit sweeps and exporters.
    pub fn buckets(&self) -> impl Iterator<Item = (&B256, &ClaimBucket)> {
        self.buckets.iter()
    }

    pub fn is_finalized(&self, claim_key: B256) -> bool {
        self.buckets.get(&claim_key).map(|b| b.finalized).unwrap_or(false)
    }

    pub fn is_disputed(&self, claim_key: B256) -> bool {
        self.buckets.get(&claim_key).map(|b| b.disputed).unwrap_or(false)
    }

    pub fn has_submitted(&self, claim_key: B256, verifier: Address) -> bool {
        self.submitted
            .get(&claim_key)
            .map(|set| set.contains(&verifier))
            .unwrap_or(false)
    }

    /// Claims still awaiting finalization. A keeper scans these after each
    /// deadline tick.
    pub fn pending_claim_keys(&self) -> Vec<B256> {
        self.buckets
            .iter()
            .filter(|(_, b)| !b.finalized && !b.disputed)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Verified consumption reading, if the claim settled.
    pub fn verified_consumption(&self, consumer_id: B256, hour_id: u64) -> Option<u64> {
        self.verified_consumption.get(&(consumer_id, hour_id)).copied()
    }

    fn bucket_ref(&self, key: B256) -> Result<&ClaimBucket, OracleError> {
        self.buckets.get(&key).ok_or(OracleError::UnknownClaim)
    }

    fn bucket_mut(&mut self, key: B256) -> Result<&mut ClaimBucket, OracleError> {
        self.buckets.get_mut(&key).ok_or(OracleError::UnknownClaim)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("no claim bucket for this subject and hour")]
    UnknownClaim,
    #[error("claim already finalized")]
    ClaimAlreadyFinalized,
    #[error("claim already disputed")]
    ClaimAlreadyDisputed,
    #[error("claim deadline passed")]
    ClaimDeadlinePassed,
    #[error("claim deadline not reached")]
    ClaimDeadlineNotReached,
    #[error("claim is not disputed")]
    ClaimNotDisputed,
    #[error("verifier already submitted to this claim")]
    DuplicateSubmission,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("producer not registered")]
    ProducerNotRegistered,
    #[error("consumer not registered")]
    ConsumerNotRegistered,
    #[error("signer is not an active verifier")]
    VerifierNotActive,
    #[error("energy exceeds the largest submitted reading")]
    EnergyExceedsMaxSubmitted,
    #[error("evidence root was never submitted")]
    EvidenceRootNotSubmitted,
    #[error("caller is not the owner")]
    NotOwner,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Treasury(#[from] TreasuryError),
    #[error(transparent)]
    Token(#[from] TokenError),
}
