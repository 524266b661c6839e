//! Connection registry: durable batch-to-connection bookkeeping (C2).

pub mod store;
pub mod types;

pub use store::{CommitOutcome, DurableStore, InMemoryStore, RegistryStore, ReleaseOutcome};
pub use types::{BatchRegistration, BatchStatus, ConnectionLimits, DEFAULT_TTL_SECONDS};
