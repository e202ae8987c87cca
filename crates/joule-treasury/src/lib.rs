//! Treasury for the Joule settlement core: rewards, faults, slashing.

pub mod treasury;

pub use treasury::{Treasury, TreasuryError};
