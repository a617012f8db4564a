//! Persistence for the snapshot registry: capture-then-serialize saves,
//! the reference artifact codec, and two-phase loading.
//!
//! # Invariants
//! - Capture finishes on the caller before any background work starts.
//! - The background writer only ever sees a point-in-time copy of the models.
//! - At most one save is in flight per manager; overlapping requests are rejected.
//! - An artifact is replaced atomically (temp file + rename), never truncated in place.
//! - Every save reports its outcome exactly once to completion hooks.

pub mod codec;
pub mod config;
pub mod load;
pub mod pipeline;
pub mod writer;

pub use codec::{ARTIFACT_SCHEMA_VERSION, CborCodec, CodecError, ModelSerializer};
pub use config::{ConfigError, SaveConfig};
pub use load::{ArtifactSummary, LoadError, LoadReport, load_into, read_artifact, verify_artifact};
pub use pipeline::{SaveError, SaveHandle, SaveOutcome, SaveReport, SnapshotManager};
pub use writer::{SaveTarget, write_atomic};

pub fn crate_info() -> &'static str {
    concat!("snapreg-persist v", env!("CARGO_PKG_VERSION"))
}
