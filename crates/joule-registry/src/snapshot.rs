//! Immutable per-claim verifier snapshots.
//!
//! A snapshot captures the active verifier set at the moment a claim opens,
//! sorted ascending by address. The sort makes indices deterministic across
//! implementations, so a snapshot index is the meaning of a bitmap bit
//! everywhere downstream, and it does not leak activation order.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use joule_core::VerifierBitmap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Strictly positive; 0 is reserved as "no snapshot".
    pub id: u64,
    /// The claim this snapshot was taken for.
    pub claim_key: B256,
    /// Active verifiers at capture time, sorted ascending by address.
    pub verifiers: Vec<Address>,
    /// Substrate timestamp at capture.
    pub timestamp: u64,
}

impl Snapshot {
    /// Capture `active` for `claim_key`. Callers guarantee the set is
    /// non-empty and within the bitmap width.
    pub fn capture(id: u64, claim_key: B256, mut active: Vec<Address>, timestamp: u64) -> Self {
        active.sort_unstable();
        Snapshot {
            id,
            claim_key,
            verifiers: active,
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// Index of `verifier` in the sorted set. Linear scan; sets are at most
    /// 16 entries.
    pub fn verifier_index(&self, verifier: Address) -> Option<u8> {
        self.verifiers
            .iter()
            .position(|v| *v == verifier)
            .map(|i| i as u8)
    }

    pub fn verifier_at(&self, index: u8) -> Option<Address> {
        self.verifiers.get(index as usize).copied()
    }

    /// Resolve a bitmap against this snapshot, e.g. to list the winning
    /// verifiers behind a finalized claim. Indices past the set are ignored.
    pub fn verifiers_in(&self, bitmap: VerifierBitmap) -> Vec<Address> {
        bitmap
            .indices()
            .filter_map(|index| self.verifier_at(index))
            .collect()
    }
}
