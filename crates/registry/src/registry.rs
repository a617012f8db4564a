use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use snapreg_common::{ModelHeader, Smri, SmriAllocator};

use crate::model::{ModelRecord, SnapshotModel, TypeTag};
use crate::snapshot::Snapshot;
use crate::types::ModelTypeTable;

/// Errors from registry operations. All of them are caller errors and are
/// reported immediately; the registry is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("SMRI {0} is already registered")]
    DuplicateIdentifier(Smri),
    #[error("SMRI {0} is not registered")]
    NotFound(Smri),
    #[error("model {smri} is `{actual}`, requested `{expected}`")]
    TypeMismatch {
        smri: Smri,
        expected: TypeTag,
        actual: TypeTag,
    },
    #[error("snapshot handle {handle} cannot own model {model}")]
    HandleMismatch { handle: Smri, model: Smri },
    #[error("model {from} references unregistered SMRI {to}")]
    DanglingReference { from: Smri, to: Smri },
    #[error("model type `{0}` is not registered")]
    UnknownType(String),
    #[error("type tag `{0}` is already claimed by another model type")]
    DuplicateTypeTag(TypeTag),
    #[error("snapshot {smri}: {message}")]
    Snapshot { smri: Smri, message: String },
}

/// The authoritative SMRI → snapshot and SMRI → model maps.
///
/// All mutation goes through `&mut self`, so capture, registration and
/// removal can never interleave. Uses BTreeMap so capture and copies walk
/// SMRIs in ascending order.
pub struct Registry {
    allocator: Arc<SmriAllocator>,
    snapshots: BTreeMap<Smri, Arc<dyn Snapshot>>,
    models: BTreeMap<Smri, Box<dyn SnapshotModel>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("current_smri", &self.allocator.current())
            .field("snapshots", &self.snapshots.keys().collect::<Vec<_>>())
            .field("models", &self.models)
            .finish()
    }
}

impl Registry {
    /// An empty registry with its own allocator.
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(SmriAllocator::new()))
    }

    /// An empty registry drawing SMRIs from a shared allocator.
    pub fn with_allocator(allocator: Arc<SmriAllocator>) -> Self {
        Self {
            allocator,
            snapshots: BTreeMap::new(),
            models: BTreeMap::new(),
        }
    }

    pub fn allocator(&self) -> &Arc<SmriAllocator> {
        &self.allocator
    }

    /// Allocate a fresh SMRI for a new snapshot.
    pub fn allocate(&self) -> Smri {
        self.allocator.next()
    }

    pub fn register_snapshot(
        &mut self,
        smri: Smri,
        handle: Arc<dyn Snapshot>,
    ) -> Result<(), RegistryError> {
        if self.snapshots.contains_key(&smri) {
            return Err(RegistryError::DuplicateIdentifier(smri));
        }
        self.snapshots.insert(smri, handle);
        self.allocator.adopt(smri);
        tracing::trace!(smri = %smri, "snapshot registered");
        Ok(())
    }

    /// Insert `model` under `smri`, stamping its header with that SMRI.
    pub fn register_model(
        &mut self,
        smri: Smri,
        mut model: Box<dyn SnapshotModel>,
    ) -> Result<(), RegistryError> {
        if self.models.contains_key(&smri) {
            return Err(RegistryError::DuplicateIdentifier(smri));
        }
        model.set_smri(smri);
        self.models.insert(smri, model);
        self.allocator.adopt(smri);
        tracing::trace!(smri = %smri, "model registered");
        Ok(())
    }

    /// Register an empty `T` under `smri`.
    pub fn create_model<T: ModelRecord>(&mut self, smri: Smri) -> Result<(), RegistryError> {
        let mut model = T::default();
        *model.header_mut() = ModelHeader::new(smri);
        self.register_model(smri, Box::new(model))
    }

    /// Register an empty model of the type registered under `tag`.
    pub fn create_model_tagged(
        &mut self,
        smri: Smri,
        tag: &str,
        table: &ModelTypeTable,
    ) -> Result<(), RegistryError> {
        let mut model = table
            .construct(tag)
            .ok_or_else(|| RegistryError::UnknownType(tag.to_owned()))?;
        model.ref_smris_mut().clear();
        self.register_model(smri, model)
    }

    /// Register a freshly created object: allocate an SMRI, build its handle,
    /// and pair it with an empty `T` model.
    pub fn register_new<T: ModelRecord>(
        &mut self,
        make_handle: impl FnOnce(Smri) -> Arc<dyn Snapshot>,
    ) -> Result<Smri, RegistryError> {
        let smri = self.allocate();
        let handle = make_handle(smri);
        if handle.smri() != smri {
            return Err(RegistryError::HandleMismatch {
                handle: handle.smri(),
                model: smri,
            });
        }
        self.register_snapshot(smri, handle)?;
        if let Err(e) = self.create_model::<T>(smri) {
            self.snapshots.remove(&smri);
            return Err(e);
        }
        Ok(smri)
    }

    pub fn get_model<T: ModelRecord>(&self, smri: Smri) -> Result<&T, RegistryError> {
        let model = self
            .models
            .get(&smri)
            .ok_or(RegistryError::NotFound(smri))?;
        let actual = model.type_tag();
        model
            .downcast_ref::<T>()
            .ok_or(RegistryError::TypeMismatch {
                smri,
                expected: T::TYPE_TAG,
                actual,
            })
    }

    pub fn get_model_mut<T: ModelRecord>(&mut self, smri: Smri) -> Result<&mut T, RegistryError> {
        let model = self
            .models
            .get_mut(&smri)
            .ok_or(RegistryError::NotFound(smri))?;
        let actual = model.type_tag();
        model
            .downcast_mut::<T>()
            .ok_or(RegistryError::TypeMismatch {
                smri,
                expected: T::TYPE_TAG,
                actual,
            })
    }

    /// Replace the model at `smri`. Never inserts.
    pub fn put_model(
        &mut self,
        smri: Smri,
        mut model: Box<dyn SnapshotModel>,
    ) -> Result<(), RegistryError> {
        let slot = self
            .models
            .get_mut(&smri)
            .ok_or(RegistryError::NotFound(smri))?;
        model.set_smri(smri);
        *slot = model;
        Ok(())
    }

    /// Drop the snapshot and model at `smri`. Returns whether anything was
    /// removed; removing an unknown SMRI is a no-op.
    ///
    /// Models that still reference `smri` are left as they are; the stale
    /// reference surfaces as `DanglingReference` on the next resolve pass.
    pub fn remove(&mut self, smri: Smri) -> bool {
        let snapshot = self.snapshots.remove(&smri).is_some();
        let model = self.models.remove(&smri).is_some();
        if snapshot || model {
            tracing::trace!(smri = %smri, "removed from registry");
        }
        snapshot || model
    }

    /// Ask every handle, in SMRI order, to push its live state into its model.
    /// Returns the number of handles captured.
    pub fn capture_all(&mut self) -> Result<usize, RegistryError> {
        let _span = tracing::info_span!("capture").entered();
        let handles: Vec<Arc<dyn Snapshot>> = self.snapshots.values().cloned().collect();
        for handle in &handles {
            handle.update_model(self)?;
        }
        tracing::debug!(snapshots = handles.len(), "capture complete");
        Ok(handles.len())
    }

    /// Point-in-time deep copy of every model, in SMRI order.
    pub fn model_copies(&self) -> Vec<Box<dyn SnapshotModel>> {
        self.models.values().map(|m| m.clone_model()).collect()
    }

    /// Load phase 1: register a revived handle and its decoded model under
    /// the model's original SMRI. Both inserts happen or neither does.
    pub fn load_snapshot(
        &mut self,
        handle: Arc<dyn Snapshot>,
        model: Box<dyn SnapshotModel>,
    ) -> Result<Smri, RegistryError> {
        let smri = model.smri();
        if handle.smri() != smri {
            return Err(RegistryError::HandleMismatch {
                handle: handle.smri(),
                model: smri,
            });
        }
        if self.snapshots.contains_key(&smri) || self.models.contains_key(&smri) {
            return Err(RegistryError::DuplicateIdentifier(smri));
        }
        self.register_snapshot(smri, handle)?;
        self.register_model(smri, model)?;
        Ok(smri)
    }

    /// Load phase 2: let every handle resolve its model's references.
    ///
    /// Refuses to start while any model references an SMRI that has no
    /// registered model, so handles never observe a half-loaded graph.
    /// Returns the number of handles resolved.
    pub fn resolve_references(&self) -> Result<usize, RegistryError> {
        let _span = tracing::info_span!("resolve_references").entered();
        if let Some((from, to)) = self.dangling_references().into_iter().next() {
            return Err(RegistryError::DanglingReference { from, to });
        }
        for handle in self.snapshots.values() {
            handle.resolve_references(self)?;
        }
        tracing::debug!(snapshots = self.snapshots.len(), "references resolved");
        Ok(self.snapshots.len())
    }

    /// Load phase 2 limited to `smris`, e.g. the models one load just
    /// registered. Other handles keep their links untouched, and stale
    /// references elsewhere in the registry do not block the call.
    /// Returns the number of handles resolved.
    pub fn resolve_references_for(&self, smris: &[Smri]) -> Result<usize, RegistryError> {
        let _span = tracing::info_span!("resolve_references", scoped = smris.len()).entered();
        for &from in smris {
            let model = self.models.get(&from).ok_or(RegistryError::NotFound(from))?;
            if let Some(&to) = model
                .ref_smris()
                .iter()
                .find(|to| !self.models.contains_key(to))
            {
                return Err(RegistryError::DanglingReference { from, to });
            }
        }
        let mut resolved = 0;
        for smri in smris {
            if let Some(handle) = self.snapshots.get(smri) {
                handle.resolve_references(self)?;
                resolved += 1;
            }
        }
        tracing::debug!(snapshots = resolved, "references resolved");
        Ok(resolved)
    }

    /// Every `(from, to)` pair where model `from` references an SMRI with no
    /// registered model.
    pub fn dangling_references(&self) -> Vec<(Smri, Smri)> {
        self.models
            .iter()
            .flat_map(|(from, model)| model.ref_smris().iter().map(move |to| (*from, *to)))
            .filter(|(_, to)| !self.models.contains_key(to))
            .collect()
    }

    /// SMRIs of every model whose references include `target`.
    pub fn referrers(&self, target: Smri) -> Vec<Smri> {
        self.models
            .iter()
            .filter(|(_, model)| model.ref_smris().contains(&target))
            .map(|(smri, _)| *smri)
            .collect()
    }

    pub fn snapshot(&self, smri: Smri) -> Option<&Arc<dyn Snapshot>> {
        self.snapshots.get(&smri)
    }

    pub fn model(&self, smri: Smri) -> Option<&dyn SnapshotModel> {
        self.models.get(&smri).map(|m| &**m)
    }

    /// Read-only view of all registered snapshot handles.
    pub fn snapshots(&self) -> &BTreeMap<Smri, Arc<dyn Snapshot>> {
        &self.snapshots
    }

    /// Read-only view of all registered models.
    pub fn models(&self) -> &BTreeMap<Smri, Box<dyn SnapshotModel>> {
        &self.models
    }

    pub fn contains(&self, smri: Smri) -> bool {
        self.snapshots.contains_key(&smri) || self.models.contains_key(&smri)
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.models.is_empty()
    }
}
