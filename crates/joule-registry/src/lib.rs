//! Verifier, producer and consumer registry for the Joule settlement core.

pub mod registry;
pub mod snapshot;

pub use registry::{Consumer, Producer, Registry, RegistryError, VerifierAccount};
pub use snapshot::Snapshot;
