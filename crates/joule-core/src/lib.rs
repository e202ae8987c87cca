//! Shared primitives for the Joule settlement core.
//!
//! Everything that more than one component must agree on lives here: the
//! keccak-256 derivations of the signed-claim wire contract, the 16-bit
//! verifier bitmap that indices of a snapshot are packed into, the shared
//! parameter block, and the ordered protocol event log.

pub mod bitmap;
pub mod claim;
pub mod events;
pub mod params;

pub use bitmap::{VerifierBitmap, MAX_ACTIVE_VERIFIERS};
pub use claim::{
    claim_key, hour_id_at, recover_verifier, submission_digest, value_hash, ClaimKind,
    SECONDS_PER_HOUR,
};
pub use events::{Event, EventLog, FaultKind};
pub use params::{ParamsError, ProtocolParams, BPS_DENOMINATOR};
