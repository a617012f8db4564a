//! Explicit per-type registration table.
//!
//! Every model type that takes part in saving or loading is registered once
//! at startup. The table answers "what is this type's save priority", "build
//! an empty instance of this tag", and converts models to and from CBOR values.

use ciborium::Value;
use indexmap::IndexMap;

use crate::model::{ModelRecord, SnapshotModel, TypeTag};
use crate::registry::RegistryError;

/// Errors converting a model to or from its CBOR value form.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("model type `{0}` is not registered")]
    UnknownType(String),
    #[error("model is `{actual}`, table entry expects `{expected}`")]
    WrongType { expected: TypeTag, actual: TypeTag },
    #[error("CBOR value conversion failed: {0}")]
    Cbor(String),
}

/// Everything the engine knows about one model type.
#[derive(Debug, Clone, Copy)]
pub struct ModelTypeEntry {
    pub tag: TypeTag,
    pub type_name: &'static str,
    pub serialize_order: Option<u32>,
    construct: fn() -> Box<dyn SnapshotModel>,
    to_value: fn(&dyn SnapshotModel) -> Result<Value, ValueError>,
    from_value: fn(Value) -> Result<Box<dyn SnapshotModel>, ValueError>,
}

impl ModelTypeEntry {
    fn of<T: ModelRecord>() -> Self {
        Self {
            tag: T::TYPE_TAG,
            type_name: std::any::type_name::<T>(),
            serialize_order: T::SERIALIZE_ORDER,
            construct: construct::<T>,
            to_value: to_value::<T>,
            from_value: from_value::<T>,
        }
    }

    /// Sort key used by the ordering stage.
    pub fn priority(&self) -> u32 {
        self.serialize_order.unwrap_or(u32::MAX)
    }

    pub fn construct(&self) -> Box<dyn SnapshotModel> {
        (self.construct)()
    }

    pub fn to_value(&self, model: &dyn SnapshotModel) -> Result<Value, ValueError> {
        (self.to_value)(model)
    }

    pub fn from_value(&self, value: Value) -> Result<Box<dyn SnapshotModel>, ValueError> {
        (self.from_value)(value)
    }
}

fn construct<T: ModelRecord>() -> Box<dyn SnapshotModel> {
    Box::new(T::default())
}

fn to_value<T: ModelRecord>(model: &dyn SnapshotModel) -> Result<Value, ValueError> {
    let typed = model
        .downcast_ref::<T>()
        .ok_or_else(|| ValueError::WrongType {
            expected: T::TYPE_TAG,
            actual: model.type_tag(),
        })?;
    Value::serialized(typed).map_err(|e| ValueError::Cbor(e.to_string()))
}

fn from_value<T: ModelRecord>(value: Value) -> Result<Box<dyn SnapshotModel>, ValueError> {
    let typed: T = value
        .deserialized()
        .map_err(|e| ValueError::Cbor(e.to_string()))?;
    Ok(Box::new(typed))
}

/// Registration table keyed by [`TypeTag`], in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelTypeTable {
    entries: IndexMap<&'static str, ModelTypeEntry>,
}

impl ModelTypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`. Registering the same type again is a no-op; a different
    /// type claiming an existing tag is rejected.
    pub fn register<T: ModelRecord>(&mut self) -> Result<&mut Self, RegistryError> {
        let entry = ModelTypeEntry::of::<T>();
        if let Some(existing) = self.entries.get(entry.tag.as_str()) {
            if existing.type_name != entry.type_name {
                return Err(RegistryError::DuplicateTypeTag(entry.tag));
            }
            return Ok(self);
        }
        tracing::debug!(
            tag = %entry.tag,
            order = ?entry.serialize_order,
            "registered model type"
        );
        self.entries.insert(entry.tag.as_str(), entry);
        Ok(self)
    }

    pub fn get(&self, tag: &str) -> Option<&ModelTypeEntry> {
        self.entries.get(tag)
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.entries.contains_key(tag.as_str())
    }

    /// Declared priority of `tag`, or `u32::MAX` for unknown or undeclared types.
    pub fn priority_of(&self, tag: TypeTag) -> u32 {
        self.get(tag.as_str())
            .map_or(u32::MAX, ModelTypeEntry::priority)
    }

    /// Build an empty model of the given tag.
    pub fn construct(&self, tag: &str) -> Option<Box<dyn SnapshotModel>> {
        self.get(tag).map(ModelTypeEntry::construct)
    }

    pub fn encode_model(&self, model: &dyn SnapshotModel) -> Result<Value, ValueError> {
        let tag = model.type_tag();
        self.get(tag.as_str())
            .ok_or_else(|| ValueError::UnknownType(tag.as_str().to_owned()))?
            .to_value(model)
    }

    pub fn decode_model(
        &self,
        tag: &str,
        value: Value,
    ) -> Result<Box<dyn SnapshotModel>, ValueError> {
        self.get(tag)
            .ok_or_else(|| ValueError::UnknownType(tag.to_owned()))?
            .from_value(value)
    }

    pub fn tags(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.entries.values().map(|e| e.tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
