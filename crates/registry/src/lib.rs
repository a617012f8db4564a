//! Snapshot registry: tracks live snapshot handles and the model records they
//! persist into, orders models for serialization, and reconnects references
//! after a load.
//!
//! # Invariants
//! - No two registered snapshots (or models) share an SMRI.
//! - Registration, update and removal fail fast and leave the registry untouched on error.
//! - Serialization order depends only on declared type priorities and SMRIs.
//! - Reference resolution runs only once every referenced SMRI is registered.

pub mod model;
pub mod ordering;
pub mod registry;
pub mod snapshot;
pub mod types;

pub use model::{ModelRecord, SnapshotModel, TypeTag};
pub use ordering::{ModelGroups, order_and_group};
pub use registry::{Registry, RegistryError};
pub use snapshot::Snapshot;
pub use types::{ModelTypeEntry, ModelTypeTable, ValueError};

pub use snapreg_common::{ModelHeader, Smri, SmriAllocator};
