//! Claim identity and the signed-claim wire contract.
//!
//! Everything externally observable about a claim is a keccak-256 derivation
//! over Ethereum-packed bytes:
//!
//! - `claim_key   = keccak256(tag ‖ oracle ‖ subjectId ‖ hourId)`
//! - `value_hash  = keccak256(energyWh ‖ evidenceRoot)`
//! - `digest      = keccak256(chainId ‖ oracle ‖ subjectId ‖ hourId ‖ energyWh ‖ evidenceRoot)`
//!
//! Verifiers sign the digest under the EIP-191 personal-message prefix and
//! hand the 65-byte ECDSA signature to whoever carries it on-chain; only the
//! recovered signer matters, never the transport caller.

use alloy::primitives::{eip191_hash_message, Address, Signature, B256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Claims settle on hour boundaries: `hour_id = unix_seconds / 3600`.
pub const SECONDS_PER_HOUR: u64 = 3600;

/// Domain-separation tag baked into every claim key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimKind {
    /// Energy produced by a registered producer.
    Production,
    /// Energy consumed by a registered consumer.
    Consumption,
    /// Retirement-derived keys. Domain separation only; the core never
    /// settles claims under this tag.
    Retirement,
}

impl ClaimKind {
    /// The single-byte wire tag.
    pub fn tag(self) -> u8 {
        match self {
            ClaimKind::Production => 0x01,
            ClaimKind::Consumption => 0x02,
            ClaimKind::Retirement => 0x03,
        }
    }
}

/// The hour bucket containing `unix_seconds`.
pub fn hour_id_at(unix_seconds: u64) -> u64 {
    unix_seconds / SECONDS_PER_HOUR
}

/// Identifier of the claim bucket for `(kind, oracle, subject, hour)`.
///
/// Separation by both tag and oracle address prevents cross-oracle and
/// cross-chain replay of an otherwise identical claim.
pub fn claim_key(kind: ClaimKind, oracle: Address, subject_id: B256, hour_id: u64) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update([kind.tag()]);
    hasher.update(oracle.as_slice());
    hasher.update(subject_id.as_slice());
    hasher.update(U256::from(hour_id).to_be_bytes::<32>());
    B256::from_slice(&hasher.finalize())
}

/// Identifier of one claimed value within a bucket. Two submissions agree
/// exactly when both their energy reading and evidence root agree.
pub fn value_hash(energy_wh: u64, evidence_root: B256) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(energy_wh.to_be_bytes());
    hasher.update(evidence_root.as_slice());
    B256::from_slice(&hasher.finalize())
}

/// The digest a verifier signs for one claim submission.
///
/// Packed exactly as `abi.encodePacked(uint256 chainId, address oracle,
/// bytes32 subjectId, uint256 hourId, uint64 energyWh, bytes32 evidenceRoot)`.
pub fn submission_digest(
    chain_id: u64,
    oracle: Address,
    subject_id: B256,
    hour_id: u64,
    energy_wh: u64,
    evidence_root: B256,
) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(U256::from(chain_id).to_be_bytes::<32>());
    hasher.update(oracle.as_slice());
    hasher.update(subject_id.as_slice());
    hasher.update(U256::from(hour_id).to_be_bytes::<32>());
    hasher.update(energy_wh.to_be_bytes());
    hasher.update(evidence_root.as_slice());
    B256::from_slice(&hasher.finalize())
}

/// Recover the signing verifier from a 65-byte ECDSA signature over
/// `digest` under the EIP-191 prefix. `None` when the bytes are not a
/// well-formed signature or recovery yields the zero address.
pub fn recover_verifier(digest: B256, signature: &[u8]) -> Option<Address> {
    let signature = Signature::from_raw(signature).ok()?;
    let signer = signature
        .recover_address_from_prehash(&eip191_hash_message(digest))
        .ok()?;
    if signer == Address::ZERO {
        return None;
    }
    Some(signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn signer(seed: u64) -> PrivateKeySigner {
        PrivateKeySigner::from_bytes(&B256::from(U256::from(seed))).unwrap()
    }

    #[test]
    fn test_hour_id_at() {
        assert_eq!(hour_id_at(0), 0);
        assert_eq!(hour_id_at(3599), 0);
        assert_eq!(hour_id_at(3600), 1);
        assert_eq!(hour_id_at(1_800_000_000), 500_000);
    }

    #[test]
    fn test_claim_key_domain_separation() {
        let oracle_a = Address::with_last_byte(0xA1);
        let oracle_b = Address::with_last_byte(0xB2);
        let subject = B256::repeat_byte(0x11);

        let key = claim_key(ClaimKind::Production, oracle_a, subject, 500_000);

        // Same inputs, same key.
        assert_eq!(
            key,
            claim_key(ClaimKind::Production, oracle_a, subject, 500_000)
        );
        // Any differing field changes the key.
        assert_ne!(
            key,
            claim_key(ClaimKind::Consumption, oracle_a, subject, 500_000)
        );
        assert_ne!(
            key,
            claim_key(ClaimKind::Production, oracle_b, subject, 500_000)
        );
        assert_ne!(
            key,
            claim_key(ClaimKind::Production, oracle_a, subject, 500_001)
        );
    }

    #[test]
    fn test_value_hash_binds_both_fields() {
        let root = B256::repeat_byte(0xAA);
        let vh = value_hash(5000, root);
        assert_ne!(vh, value_hash(5001, root));
        assert_ne!(vh, value_hash(5000, B256::repeat_byte(0xBB)));
    }

    #[test]
    fn test_sign_and_recover_round_trip() {
        let verifier = signer(7);
        let oracle = Address::with_last_byte(0x0A);
        let subject = B256::repeat_byte(0x22);

        let digest = submission_digest(31337, oracle, subject, 500_000, 5000, B256::repeat_byte(0xAA));
        let sig = verifier.sign_message_sync(digest.as_slice()).unwrap();

        let recovered = recover_verifier(digest, &sig.as_bytes());
        assert_eq!(recovered, Some(verifier.address()));
    }

    #[test]
    fn test_recovery_rejects_tampered_fields() {
        let verifier = signer(9);
        let oracle_a = Address::with_last_byte(0x0A);
        let oracle_b = Address::with_last_byte(0x0B);
        let subject = B256::repeat_byte(0x22);

        let digest = submission_digest(31337, oracle_a, subject, 500_000, 5000, B256::repeat_byte(0xAA));
        let sig = verifier.sign_message_sync(digest.as_slice()).unwrap();

        // A signature bound to oracle A recovers to a different (useless)
        // address under oracle B's digest.
        let foreign = submission_digest(31337, oracle_b, subject, 500_000, 5000, B256::repeat_byte(0xAA));
        assert_ne!(
            recover_verifier(foreign, &sig.as_bytes()),
            Some(verifier.address())
        );

        let bumped = submission_digest(31337, oracle_a, subject, 500_000, 5001, B256::repeat_byte(0xAA));
        assert_ne!(
            recover_verifier(bumped, &sig.as_bytes()),
            Some(verifier.address())
        );
    }

    #[test]
    fn test_recovery_rejects_garbage() {
        assert_eq!(recover_verifier(B256::repeat_byte(0x01), &[0u8; 10]), None);
        assert_eq!(recover_verifier(B256::repeat_byte(0x01), &[0u8; 65]), None);
    }
}
