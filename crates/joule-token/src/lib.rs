//! Token ledgers the settlement core is sole authority over.
//!
//! Two tokens back the protocol economics: a fungible stake token escrowed
//! by the registry and treasury, and the per-hour credit token minted one
//! unit per verified Wh. Both are plain in-memory balance ledgers with the
//! same authority discipline the on-chain versions carry; the settlement
//! core must be the only minter of credits and the only recipient of staked
//! tokens.

pub mod credit_token;
pub mod stake_token;

use thiserror::Error;

pub use credit_token::HourCreditToken;
pub use stake_token::StakeToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("zero address")]
    ZeroAddress,
    #[error("zero amount")]
    ZeroAmount,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("insufficient allowance")]
    InsufficientAllowance,
    #[error("caller is not the token owner")]
    NotOwner,
    #[error("caller is not the authorized minter")]
    NotMinter,
    #[error("caller is not the authorized burner")]
    NotBurner,
}
