//! Per-hour energy credit token.
//!
//! One unit represents one verified Wh produced during one hour; balances
//! are keyed `(holder, hour_id)` like a multi-token standard keyed by hour.
//! Minting is the production oracle's exclusive settlement path and burning
//! belongs to the retirement contract, so both authorities are single
//! configured addresses.

use std::collections::BTreeMap;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use joule_core::{Event, EventLog};

use crate::TokenError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourCreditToken {
    owner: Address,
    minter: Option<Address>,
    burner: Option<Address>,
    balances: BTreeMap<(Address, u64), u64>,
    minted_per_hour: BTreeMap<u64, u64>,
    burned_per_hour: BTreeMap<u64, u64>,
}

impl HourCreditToken {
    pub fn new(owner: Address) -> Self {
        HourCreditToken {
            owner,
            minter: None,
            burner: None,
            balances: BTreeMap::new(),
            minted_per_hour: BTreeMap::new(),
            burned_per_hour: BTreeMap::new(),
        }
    }

    /// Bind the sole minting authority (the production oracle).
    pub fn set_minter(&mut self, caller: Address, minter: Address) -> Result<(), TokenError> {
        if caller != self.owner {
            return Err(TokenError::NotOwner);
        }
        self.minter = Some(minter);
        Ok(())
    }

    /// Bind the sole burning authority (the retirement contract).
    pub fn set_burner(&mut self, caller: Address, burner: Address) -> Result<(), TokenError> {
        if caller != self.owner {
            return Err(TokenError::NotOwner);
        }
        self.burner = Some(burner);
        Ok(())
    }

    pub fn balance_of(&self, holder: Address, hour_id: u64) -> u64 {
        self.balances.get(&(holder, hour_id)).copied().unwrap_or(0)
    }

    pub fn minted_in_hour(&self, hour_id: u64) -> u64 {
        self.minted_per_hour.get(&hour_id).copied().unwrap_or(0)
    }

    pub fn burned_in_hour(&self, hour_id: u64) -> u64 {
        self.burned_per_hour.get(&hour_id).copied().unwrap_or(0)
    }

    /// Mint `energy_wh` credits of hour `hour_id` to `to`, recording the
    /// claim that settled them.
    pub fn mint(
        &mut self,
        caller: Address,
        to: Address,
        hour_id: u64,
        energy_wh: u64,
        claim_key: B256,
        events: &mut EventLog,
    ) -> Result<(), TokenError> {
        if Some(caller) != self.minter {
            return Err(TokenError::NotMinter);
        }
        if to == Address::ZERO {
            return Err(TokenError::ZeroAddress);
        }
        *self.balances.entry((to, hour_id)).or_insert(0) += energy_wh;
        *self.minted_per_hour.entry(hour_id).or_insert(0) += energy_wh;
        events.emit(Event::Minted {
            hour_id,
            to,
            energy_wh,
            claim_key,
        });
        Ok(())
    }

    pub fn burn(
        &mut self,
        caller: Address,
        from: Address,
        hour_id: u64,
        energy_wh: u64,
    ) -> Result<(), TokenError> {
        if Some(caller) != self.burner {
            return Err(TokenError::NotBurner);
        }
        let balance = self.balance_of(from, hour_id);
        if balance < energy_wh {
            return Err(TokenError::InsufficientBalance);
        }
        self.balances.insert((from, hour_id), balance - energy_wh);
        *self.burned_per_hour.entry(hour_id).or_insert(0) += energy_wh;
        Ok(())
    }

    /// Supply accounting check: per hour, minted minus burned equals the sum
    /// of live balances.
    pub fn verify_supply(&self) -> bool {
        let mut live: BTreeMap<u64, u64> = BTreeMap::new();
        for ((_, hour_id), amount) in &self.balances {
            *live.entry(*hour_id).or_insert(0) += amount;
        }
        self.minted_per_hour.iter().all(|(hour_id, minted)| {
            minted - self.burned_in_hour(*hour_id) == live.get(hour_id).copied().unwrap_or(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Address = Address::with_last_byte(1);
    const ORACLE: Address = Address::with_last_byte(2);
    const RETIREMENT: Address = Address::with_last_byte(3);
    const PRODUCER: Address = Address::with_last_byte(4);

    fn wired_token() -> (HourCreditToken, EventLog) {
        let mut token = HourCreditToken::new(OWNER);
        token.set_minter(OWNER, ORACLE).unwrap();
        token.set_burner(OWNER, RETIREMENT).unwrap();
        (token, EventLog::new())
    }

    #[test]
    fn test_mint_requires_minter() {
        let (mut token, mut events) = wired_token();
        let key = B256::repeat_byte(7);

        assert_eq!(
            token.mint(PRODUCER, PRODUCER, 500_000, 5000, key, &mut events),
            Err(TokenError::NotMinter)
        );

        token
            .mint(ORACLE, PRODUCER, 500_000, 5000, key, &mut events)
            .unwrap();
        assert_eq!(token.balance_of(PRODUCER, 500_000), 5000);
        assert_eq!(token.minted_in_hour(500_000), 5000);
        assert!(matches!(
            events.events()[0],
            Event::Minted { hour_id: 500_000, energy_wh: 5000, .. }
        ));
    }

    #[test]
    fn test_hours_are_separate_balances() {
        let (mut token, mut events) = wired_token();
        let key = B256::repeat_byte(7);
        token
            .mint(ORACLE, PRODUCER, 1, 100, key, &mut events)
            .unwrap();
        token
            .mint(ORACLE, PRODUCER, 2, 200, key, &mut events)
            .unwrap();

        assert_eq!(token.balance_of(PRODUCER, 1), 100);
        assert_eq!(token.balance_of(PRODUCER, 2), 200);
        assert_eq!(token.balance_of(PRODUCER, 3), 0);
    }

    #[test]
    fn test_burn_requires_burner_and_balance() {
        let (mut token, mut events) = wired_token();
        let key = B256::repeat_byte(7);
        token
            .mint(ORACLE, PRODUCER, 1, 100, key, &mut events)
            .unwrap();

        assert_eq!(
            token.burn(ORACLE, PRODUCER, 1, 50),
            Err(TokenError::NotBurner)
        );
        assert_eq!(
            token.burn(RETIREMENT, PRODUCER, 1, 101),
            Err(TokenError::InsufficientBalance)
        );

        token.burn(RETIREMENT, PRODUCER, 1, 60).unwrap();
        assert_eq!(token.balance_of(PRODUCER, 1), 40);
        assert!(token.verify_supply());
    }
}
