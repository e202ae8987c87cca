//! Per-claim aggregation state.
//!
//! A bucket tracks one `(subject, hour)` claim from its first submission to
//! its terminal state; the value ledger beside it tallies submissions by
//! claimed value. The ledger keeps insertion order, and ties between equally
//! supported values resolve to the first-seen one. The tiebreak is
//! observable and deliberate.

use std::collections::BTreeMap;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use joule_core::VerifierBitmap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimBucket {
    /// Substrate timestamp after which submissions close.
    pub deadline: u64,
    pub snapshot_id: u64,
    pub submission_count: u32,
    pub finalized: bool,
    pub disputed: bool,
    pub verified_energy_wh: u64,
    pub max_submitted_energy_wh: u64,
    pub winning_value_hash: B256,
    pub evidence_root: B256,
    /// Every verifier that submitted, by snapshot index.
    pub all_submitters: VerifierBitmap,
    /// Winners after finalization; zero on the forced path.
    pub winning_verifiers: VerifierBitmap,
}

impl ClaimBucket {
    pub fn open(snapshot_id: u64, deadline: u64) -> Self {
        ClaimBucket {
            deadline,
            snapshot_id,
            submission_count: 0,
            finalized: false,
            disputed: false,
            verified_energy_wh: 0,
            max_submitted_energy_wh: 0,
            winning_value_hash: B256::ZERO,
            evidence_root: B256::ZERO,
            all_submitters: VerifierBitmap::EMPTY,
            winning_verifiers: VerifierBitmap::EMPTY,
        }
    }
}

/// One claimed value and the verifiers behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTally {
    pub count: u32,
    pub verifiers: VerifierBitmap,
    pub energy_wh: u64,
    pub evidence_root: B256,
}

/// Tallies for one claim, in first-submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueLedger {
    order: Vec<B256>,
    tallies: BTreeMap<B256, ValueTally>,
}

impl ValueLedger {
    /// Upsert the tally for `value_hash`, crediting the submitting
    /// verifier's snapshot index.
    pub fn record(
        &mut self,
        value_hash: B256,
        energy_wh: u64,
        evidence_root: B256,
        verifier_index: u8,
    ) {
        if !self.tallies.contains_key(&value_hash) {
            self.order.push(value_hash);
            self.tallies.insert(
                value_hash,
                ValueTally {
                    count: 0,
                    verifiers: VerifierBitmap::EMPTY,
                    energy_wh,
                    evidence_root,
                },
            );
        }
        if let Some(tally) = self.tallies.get_mut(&value_hash) {
            tally.count += 1;
            tally.verifiers.set(verifier_index);
        }
    }

    pub fn get(&self, value_hash: B256) -> Option<&ValueTally> {
        self.tallies.get(&value_hash)
    }

    /// The tally with the highest count; ties go to the earliest-submitted
    /// value hash.
    pub fn leading(&self) -> Option<(B256, &ValueTally)> {
        let mut best: Option<(B256, &ValueTally)> = None;
        for value_hash in &self.order {
            let tally = self.tallies.get(value_hash)?;
            match best {
                Some((_, leader)) if tally.count <= leader.count => {}
                _ => best = Some((*value_hash, tally)),
            }
        }
        best
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vh(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn test_record_upserts_tally() {
        let mut ledger = ValueLedger::default();
        ledger.record(vh(1), 5000, vh(0xAA), 0);
        ledger.record(vh(1), 5000, vh(0xAA), 2);

        let tally = ledger.get(vh(1)).unwrap();
        assert_eq!(tally.count, 2);
        assert_eq!(tally.verifiers.count(), 2);
        assert!(tally.verifiers.contains(0));
        assert!(tally.verifiers.contains(2));
        assert_eq!(tally.energy_wh, 5000);
    }

    #[test]
    fn test_leading_picks_majority() {
        let mut ledger = ValueLedger::default();
        ledger.record(vh(1), 5000, vh(0xAA), 0);
        ledger.record(vh(2), 9999, vh(0xBB), 1);
        ledger.record(vh(1), 5000, vh(0xAA), 2);

        let (hash, tally) = ledger.leading().unwrap();
        assert_eq!(hash, vh(1));
        assert_eq!(tally.count, 2);
    }

    #[test]
    fn test_leading_tie_goes_to_first_seen() {
        let mut ledger = ValueLedger::default();
        ledger.record(vh(2), 9999, vh(0xBB), 0);
        ledger.record(vh(1), 5000, vh(0xAA), 1);

        // 1-1 tie: the first-submitted value wins.
        let (hash, _) = ledger.leading().unwrap();
        assert_eq!(hash, vh(2));
    }

    #[test]
    fn test_empty_ledger_has_no_leader() {
        assert!(ValueLedger::default().leading().is_none());
        assert!(ValueLedger::default().is_empty());
    }
}
