//! Fungible stake token.
//!
//! Balance/allowance ledger with the transfer surface the registry and
//! treasury escrow through: `transfer_from` against an allowance when a
//! component pulls tokens in, plain `transfer` when it pays out of its own
//! escrow. Supply enters through owner-gated minting at genesis/seeding.

use std::collections::BTreeMap;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::TokenError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeToken {
    owner: Address,
    total_supply: U256,
    balances: BTreeMap<Address, U256>,
    allowances: BTreeMap<(Address, Address), U256>,
}

impl StakeToken {
    pub fn new(owner: Address) -> Self {
        StakeToken {
            owner,
            total_supply: U256::ZERO,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or(U256::ZERO)
    }

    pub fn allowance(&self, holder: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(holder, spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Owner-gated supply issuance.
    pub fn mint(&mut self, caller: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        if caller != self.owner {
            return Err(TokenError::NotOwner);
        }
        if to == Address::ZERO {
            return Err(TokenError::ZeroAddress);
        }
        self.total_supply += amount;
        *self.balances.entry(to).or_insert(U256::ZERO) += amount;
        Ok(())
    }

    pub fn approve(
        &mut self,
        caller: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        if spender == Address::ZERO {
            return Err(TokenError::ZeroAddress);
        }
        self.allowances.insert((caller, spender), amount);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        caller: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        self.move_balance(caller, to, amount)
    }

    /// Spend `spender`'s allowance to move `from`'s tokens.
    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(TokenError::InsufficientAllowance);
        }
        self.move_balance(from, to, amount)?;
        self.allowances.insert((from, spender), allowed - amount);
        Ok(())
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        if to == Address::ZERO {
            return Err(TokenError::ZeroAddress);
        }
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(TokenError::InsufficientBalance);
        }
        self.balances.insert(from, from_balance - amount);
        *self.balances.entry(to).or_insert(U256::ZERO) += amount;
        Ok(())
    }
}
