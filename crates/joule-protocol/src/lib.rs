//! Integration layer for the Joule settlement core.
//!
//! `JouleProtocol` stands in for the serialized transactional substrate the
//! components were designed against: it owns every component and wires their
//! authorities at construction (registry, then treasury, then the oracles).
//! Every entry point takes `&mut self`, so operations are serialized by
//! construction.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use joule_core::{EventLog, ProtocolParams};
use joule_oracle::{Oracle, OracleError};
use joule_registry::{Registry, RegistryError};
use joule_token::{HourCreditToken, StakeToken, TokenError};
use joule_treasury::{Treasury, TreasuryError};

/// Component addresses within the protocol's address space.
pub const REGISTRY_ADDRESS: Address = Address::with_last_byte(0x11);
pub const TREASURY_ADDRESS: Address = Address::with_last_byte(0x12);
pub const PRODUCTION_ORACLE_ADDRESS: Address = Address::with_last_byte(0x13);
pub const CONSUMPTION_ORACLE_ADDRESS: Address = Address::with_last_byte(0x14);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JouleProtocol {
    pub registry: Registry,
    pub treasury: Treasury,
    pub production: Oracle,
    pub consumption: Oracle,
    pub stake_token: StakeToken,
    pub credit_token: HourCreditToken,
    pub events: EventLog,
    owner: Address,
}

impl JouleProtocol {
    /// Deploy and cross-wire the full settlement core.
    pub fn new(chain_id: u64, owner: Address, params: ProtocolParams) -> Result<Self, ProtocolError> {
        let mut registry = Registry::new(REGISTRY_ADDRESS, owner, params)?;
        let mut treasury = Treasury::new(TREASURY_ADDRESS, owner);
        let production = Oracle::production(PRODUCTION_ORACLE_ADDRESS, owner, chain_id);
        let consumption = Oracle::consumption(CONSUMPTION_ORACLE_ADDRESS, owner, chain_id);

        registry.set_treasury(owner, TREASURY_ADDRESS)?;
        registry.authorize_oracle(owner, PRODUCTION_ORACLE_ADDRESS)?;
        registry.authorize_oracle(owner, CONSUMPTION_ORACLE_ADDRESS)?;
        treasury.authorize_oracle(owner, PRODUCTION_ORACLE_ADDRESS)?;
        treasury.authorize_oracle(owner, CONSUMPTION_ORACLE_ADDRESS)?;

        let stake_token = StakeToken::new(owner);
        let mut credit_token = HourCreditToken::new(owner);
        credit_token.set_minter(owner, PRODUCTION_ORACLE_ADDRESS)?;

        Ok(JouleProtocol {
            registry,
            treasury,
            production,
            consumption,
            stake_token,
            credit_token,
            events: EventLog::new(),
            owner,
        })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    // ------------------------------------------------------------------
    // Staking and funding
    // ------------------------------------------------------------------

    pub fn stake_as_verifier(&mut self, caller: Address, amount: U256) -> Result<(), ProtocolError> {
        self.registry
            .stake_as_verifier(caller, amount, &mut self.stake_token)?;
        Ok(())
    }

    pub fn unstake(&mut self, caller: Address, amount: U256) -> Result<(), ProtocolError> {
        self.registry.unstake(caller, amount, &mut self.stake_token)?;
        Ok(())
    }

    pub fn deposit_rewards(&mut self, from: Address, amount: U256) -> Result<(), ProtocolError> {
        self.treasury
            .deposit_rewards(from, amount, &mut self.stake_token)?;
        Ok(())
    }

    pub fn claim_rewards(&mut self, caller: Address) -> Result<U256, ProtocolError> {
        let amount = self
            .treasury
            .claim_rewards(caller, &mut self.stake_token, &mut self.events)?;
        Ok(amount)
    }

    pub fn slash(&mut self, caller: Address, verifier: Address) -> Result<(), ProtocolError> {
        self.treasury.slash(
            caller,
            verifier,
            &mut self.registry,
            &mut self.stake_token,
            &mut self.events,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Claim lifecycle
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn submit_production(
        &mut self,
        producer_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
        signature: &[u8],
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.production.submit(
            &mut self.registry,
            &mut self.treasury,
            &mut self.credit_token,
            &mut self.stake_token,
            producer_id,
            hour_id,
            energy_wh,
            evidence_root,
            signature,
            now,
            &mut self.events,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_consumption(
        &mut self,
        consumer_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
        signature: &[u8],
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.consumption.submit(
            &mut self.registry,
            &mut self.treasury,
            &mut self.credit_token,
            &mut self.stake_token,
            consumer_id,
            hour_id,
            energy_wh,
            evidence_root,
            signature,
            now,
            &mut self.events,
        )?;
        Ok(())
    }

    pub fn finalize_production(
        &mut self,
        producer_id: B256,
        hour_id: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.production.finalize(
            &mut self.registry,
            &mut self.treasury,
            &mut self.credit_token,
            &mut self.stake_token,
            producer_id,
            hour_id,
            now,
            &mut self.events,
        )?;
        Ok(())
    }

    pub fn finalize_consumption(
        &mut self,
        consumer_id: B256,
        hour_id: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.consumption.finalize(
            &mut self.registry,
            &mut self.treasury,
            &mut self.credit_token,
            &mut self.stake_token,
            consumer_id,
            hour_id,
            now,
            &mut self.events,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn force_finalize_production(
        &mut self,
        caller: Address,
        producer_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.production.force_finalize(
            caller,
            &self.registry,
            &mut self.credit_token,
            producer_id,
            hour_id,
            energy_wh,
            evidence_root,
            now,
            &mut self.events,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn force_finalize_consumption(
        &mut self,
        caller: Address,
        consumer_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.consumption.force_finalize(
            caller,
            &self.registry,
            &mut self.credit_token,
            consumer_id,
            hour_id,
            energy_wh,
            evidence_root,
            now,
            &mut self.events,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit sweep
    // ------------------------------------------------------------------

    /// Check every cross-component invariant the settlement arithmetic
    /// relies on. Cheap enough to run after every scenario.
    pub fn verify_invariants(&self) -> Result<(), ProtocolError> {
        if !self.treasury.verify_conservation() {
            return Err(ProtocolError::TreasuryConservation);
        }
        if !self.credit_token.verify_supply() {
            return Err(ProtocolError::CreditSupply);
        }

        for oracle in [&self.production, &self.consumption] {
            for (key, bucket) in oracle.buckets() {
                if bucket.all_submitters.count() != bucket.submission_count {
                    return Err(ProtocolError::BucketAccounting(*key));
                }
                if !bucket.winning_verifiers.is_subset_of(bucket.all_submitters) {
                    return Err(ProtocolError::WinnerSubset(*key));
                }
                if bucket.finalized && bucket.disputed {
                    return Err(ProtocolError::TerminalState(*key));
                }
                if bucket.finalized
                    && bucket.verified_energy_wh > bucket.max_submitted_energy_wh
                {
                    return Err(ProtocolError::VerifiedEnergyRange(*key));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Treasury(#[from] TreasuryError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("treasury conservation violated")]
    TreasuryConservation,
    #[error("credit supply accounting violated")]
    CreditSupply,
    #[error("bitmap does not match submission count for claim {0}")]
    BucketAccounting(B256),
    #[error("winning bitmap is not a subset of submitters for claim {0}")]
    WinnerSubset(B256),
    #[error("bucket is both finalized and disputed for claim {0}")]
    TerminalState(B256),
    #[error("verified energy exceeds max submitted for claim {0}")]
    VerifiedEnergyRange(B256),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wiring_is_complete() {
        let owner = Address::with_last_byte(0x01);
        let protocol = JouleProtocol::new(31_337, owner, ProtocolParams::default()).unwrap();

        assert_eq!(protocol.owner(), owner);
        assert_eq!(protocol.registry.address(), REGISTRY_ADDRESS);
        assert_eq!(protocol.treasury.address(), TREASURY_ADDRESS);
        assert_eq!(protocol.production.address(), PRODUCTION_ORACLE_ADDRESS);
        assert_eq!(protocol.consumption.address(), CONSUMPTION_ORACLE_ADDRESS);
        assert!(protocol.verify_invariants().is_ok());
    }
}
