//! Protocol event log.
//!
//! Components append to one shared log so the cross-component order of a
//! settlement (mint, finalize, rewards, faults) is preserved exactly as it
//! happened. The log is the audit trail off-chain services consume; nothing
//! in the core reads it back.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::bitmap::VerifierBitmap;

/// Why a fault was recorded against a verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Submitted a value that lost a finalized vote.
    WrongValue,
    /// Submitted after the claim deadline.
    LateSubmission,
    /// Submitted twice to the same claim.
    DuplicateSubmission,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::WrongValue => write!(f, "WRONG_VALUE"),
            FaultKind::LateSubmission => write!(f, "LATE_SUBMISSION"),
            FaultKind::DuplicateSubmission => write!(f, "DUPLICATE_SUBMISSION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Submitted {
        claim_key: B256,
        verifier: Address,
        energy_wh: u64,
        value_hash: B256,
    },
    Finalized {
        claim_key: B256,
        subject_id: B256,
        hour_id: u64,
        energy_wh: u64,
        evidence_root: B256,
    },
    ClaimDisputed {
        claim_key: B256,
        subject_id: B256,
        hour_id: u64,
        reason: String,
    },
    ForceFinalized {
        claim_key: B256,
        admin: Address,
        energy_wh: u64,
    },
    SnapshotCreated {
        claim_key: B256,
        snapshot_id: u64,
        verifier_count: u32,
    },
    RewardsDistributed {
        winner_bitmap: VerifierBitmap,
        snapshot_id: u64,
        total_distributed: U256,
    },
    FaultRecorded {
        verifier: Address,
        kind: FaultKind,
        total_faults: u32,
    },
    Slashed {
        verifier: Address,
        amount: U256,
    },
    Minted {
        hour_id: u64,
        to: Address,
        energy_wh: u64,
        claim_key: B256,
    },
    RewardsClaimed {
        verifier: Address,
        amount: U256,
    },
}

/// Append-only event sink shared by every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        log::debug!("event: {:?}", event);
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_preserves_order() {
        let mut log = EventLog::new();
        log.emit(Event::SnapshotCreated {
            claim_key: B256::repeat_byte(1),
            snapshot_id: 1,
            verifier_count: 3,
        });
        log.emit(Event::Slashed {
            verifier: Address::with_last_byte(9),
            amount: U256::from(10),
        });

        assert_eq!(log.len(), 2);
        assert!(matches!(log.events()[0], Event::SnapshotCreated { .. }));
        assert!(matches!(log.events()[1], Event::Slashed { .. }));
    }
}
