//! Ordering & grouping stage of the save pipeline.
//!
//! Models are stable-sorted by their type's declared priority (then SMRI), and
//! the sorted run is split into homogeneous per-type groups. Groups keep the
//! order in which their type first appears after sorting, so inter-type
//! precedence survives the grouping.

use indexmap::IndexMap;

use crate::model::{SnapshotModel, TypeTag};
use crate::types::ModelTypeTable;

/// Models partitioned by type tag, in emission order.
#[derive(Debug, Clone, Default)]
pub struct ModelGroups {
    groups: IndexMap<TypeTag, Vec<Box<dyn SnapshotModel>>>,
}

impl ModelGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `model` to its type's group, opening a new group at the end if
    /// this is the first model of that type.
    pub fn push(&mut self, model: Box<dyn SnapshotModel>) {
        self.groups.entry(model.type_tag()).or_default().push(model);
    }

    /// Tags in emission order.
    pub fn group_order(&self) -> Vec<TypeTag> {
        self.groups.keys().copied().collect()
    }

    pub fn get(&self, tag: TypeTag) -> Option<&[Box<dyn SnapshotModel>]> {
        self.groups.get(&tag).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeTag, &[Box<dyn SnapshotModel>])> {
        self.groups.iter().map(|(tag, models)| (*tag, models.as_slice()))
    }

    /// All models, group by group.
    pub fn models(&self) -> impl Iterator<Item = &dyn SnapshotModel> {
        self.groups.values().flatten().map(|m| &**m)
    }

    pub fn into_models(self) -> impl Iterator<Item = Box<dyn SnapshotModel>> {
        self.groups.into_values().flatten()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn model_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Sort `models` by declared type priority and group them by type.
///
/// Ties (same priority, including every undeclared type) are broken by SMRI,
/// so the result does not depend on the order models are handed in.
pub fn order_and_group(
    models: impl IntoIterator<Item = Box<dyn SnapshotModel>>,
    table: &ModelTypeTable,
) -> ModelGroups {
    let _span = tracing::debug_span!("order_and_group").entered();

    let mut sorted: Vec<Box<dyn SnapshotModel>> = models.into_iter().collect();
    sorted.sort_by_key(|m| (table.priority_of(m.type_tag()), m.smri()));

    let mut groups = ModelGroups::new();
    for model in sorted {
        groups.push(model);
    }

    tracing::trace!(
        groups = groups.group_count(),
        models = groups.model_count(),
        "models ordered"
    );
    groups
}
