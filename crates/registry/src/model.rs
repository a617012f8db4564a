//! Model records: the plain data side of a snapshot.
//!
//! Concrete model types implement [`ModelRecord`]. The registry stores them
//! type-erased as `Box<dyn SnapshotModel>`; the blanket impl below bridges the two.

use serde::Serialize;
use serde::de::DeserializeOwned;
use snapreg_common::{ModelHeader, Smri};
use std::any::Any;
use std::fmt;

/// Stable name of a concrete model type. Written into artifacts, so it must
/// not change between the build that saves and the build that loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(&'static str);

impl TypeTag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.0)
    }
}

/// A concrete, serializable model type.
///
/// `SERIALIZE_ORDER` is the save-order priority for the whole type: lower
/// values are written first, `None` sorts after every declared type.
pub trait ModelRecord:
    Any + Send + Sync + Clone + Default + fmt::Debug + Serialize + DeserializeOwned
{
    const TYPE_TAG: TypeTag;
    const SERIALIZE_ORDER: Option<u32> = None;

    fn header(&self) -> &ModelHeader;
    fn header_mut(&mut self) -> &mut ModelHeader;
}

/// Object-safe view of a model record, as held by the registry.
pub trait SnapshotModel: Any + Send + Sync + fmt::Debug + 'static {
    fn type_tag(&self) -> TypeTag;
    fn smri(&self) -> Smri;
    fn set_smri(&mut self, smri: Smri);
    fn ref_smris(&self) -> &[Smri];
    fn ref_smris_mut(&mut self) -> &mut Vec<Smri>;
    fn clone_model(&self) -> Box<dyn SnapshotModel>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ModelRecord> SnapshotModel for T {
    fn type_tag(&self) -> TypeTag {
        T::TYPE_TAG
    }

    fn smri(&self) -> Smri {
        self.header().smri
    }

    fn set_smri(&mut self, smri: Smri) {
        self.header_mut().smri = smri;
    }

    fn ref_smris(&self) -> &[Smri] {
        &self.header().ref_smris
    }

    fn ref_smris_mut(&mut self) -> &mut Vec<Smri> {
        &mut self.header_mut().ref_smris
    }

    fn clone_model(&self) -> Box<dyn SnapshotModel> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn SnapshotModel {
    pub fn is<T: ModelRecord>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: ModelRecord>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ModelRecord>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

impl Clone for Box<dyn SnapshotModel> {
    fn clone(&self) -> Self {
        self.clone_model()
    }
}
