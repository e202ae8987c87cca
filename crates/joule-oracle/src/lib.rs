//! Production/consumption oracle for the Joule settlement core.

pub mod bucket;
pub mod oracle;

pub use bucket::{ClaimBucket, ValueLedger, ValueTally};
pub use oracle::{Oracle, OracleError, OracleKind};
