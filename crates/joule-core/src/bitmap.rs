//! 16-bit verifier bitmaps.
//!
//! Every component encodes a subset of a snapshot's verifiers as one 16-bit
//! integer: bit `i` stands for the verifier at index `i` of the snapshot the
//! bitmap travels with. The width is part of the wire format and caps the
//! active verifier set at 16; the registry refuses activations past that
//! ceiling, so a valid index always fits.

use serde::{Deserialize, Serialize};

/// Hard ceiling on the active verifier set, fixed by the 16-bit wire format.
pub const MAX_ACTIVE_VERIFIERS: usize = 16;

/// A subset of snapshot verifier indices packed into a `u16`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifierBitmap(u16);

impl VerifierBitmap {
    pub const EMPTY: VerifierBitmap = VerifierBitmap(0);

    /// Wrap a raw 16-bit field (wire decoding).
    pub fn from_bits(bits: u16) -> Self {
        VerifierBitmap(bits)
    }

    /// The raw 16-bit field (wire encoding).
    pub fn bits(self) -> u16 {
        self.0
    }

    /// A bitmap with exactly one bit set.
    ///
    /// `index` must be a snapshot index, i.e. `< MAX_ACTIVE_VERIFIERS`.
    pub fn single(index: u8) -> Self {
        VerifierBitmap(1 << index)
    }

    /// Set the bit for a snapshot index. `index < MAX_ACTIVE_VERIFIERS`.
    pub fn set(&mut self, index: u8) {
        self.0 |= 1 << index;
    }

    pub fn contains(self, index: u8) -> bool {
        self.0 & (1 << index) != 0
    }

    /// Number of set bits (`popcount`).
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set difference: bits in `self` that are not in `other`.
    pub fn minus(self, other: VerifierBitmap) -> VerifierBitmap {
        VerifierBitmap(self.0 & !other.0)
    }

    /// True when every bit of `self` is also set in `other`.
    pub fn is_subset_of(self, other: VerifierBitmap) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterate the set indices in ascending order.
    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0..MAX_ACTIVE_VERIFIERS as u8).filter(move |i| self.contains(*i))
    }
}

impl std::fmt::Display for VerifierBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018b}", self.0)
    }
}
