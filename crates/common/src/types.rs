use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot Manager Resource Identifier.
///
/// Keys one snapshot/model pair inside a registry. Serialized as a bare integer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Smri(pub u32);

impl Smri {
    /// The unassigned value. Allocators never return it from `next()`.
    pub const NONE: Smri = Smri(0);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for Smri {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Smri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fields shared by every model record: the owner and the outgoing references.
///
/// `ref_smris` is ordered and may contain the owner itself or SMRIs that in
/// turn reference back to the owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHeader {
    pub smri: Smri,
    pub ref_smris: Vec<Smri>,
}

impl ModelHeader {
    /// A header owned by `smri` with no references.
    pub fn new(smri: Smri) -> Self {
        Self {
            smri,
            ref_smris: Vec::new(),
        }
    }

    /// Builder-style helper for tests and demo data.
    pub fn with_refs(smri: Smri, refs: impl IntoIterator<Item = Smri>) -> Self {
        Self {
            smri,
            ref_smris: refs.into_iter().collect(),
        }
    }

    pub fn references(&self, target: Smri) -> bool {
        self.ref_smris.contains(&target)
    }
}
