//! Persistence backends behind the broker.
//!
//! - `storage`: the [`PersistenceStore`] contract and the byte-level [`Storage`] trait.
//! - `memory`: volatile byte store.
//! - `aof`: append-only log used by the durable backend.
//! - `persistent`: file-backed byte store replaying the log on open.
//! - `engine`: backend selection from configuration.
//! - `tiered`: default `PersistenceStore` combining both tiers.

pub mod aof;
pub mod engine;
pub mod memory;
pub mod persistent;
pub mod storage;
pub mod tiered;

pub use aof::*;
pub use engine::*;
pub use memory::*;
pub use persistent::*;
pub use storage::*;
pub use tiered::*;
