use snapreg_common::Smri;

use crate::registry::{Registry, RegistryError};

/// A live, stateful object tracked by a [`Registry`].
///
/// Handles are shared (`Arc<dyn Snapshot>`) and use interior mutability for
/// their live state. A handle never owns its model: it reads and writes it
/// through the registry passed into each call.
pub trait Snapshot: Send + Sync {
    /// The SMRI this handle was registered under.
    fn smri(&self) -> Smri;

    /// Push live state into the model stored at `self.smri()`.
    ///
    /// Called for every registered handle during capture, before the model map
    /// is copied for encoding. Use `Registry::get_model_mut` or
    /// `Registry::put_model`.
    fn update_model(&self, registry: &mut Registry) -> Result<(), RegistryError>;

    /// Turn the model's `ref_smris` back into live references after a load.
    ///
    /// Only called once every model of the artifact is registered, so every
    /// referenced SMRI can be looked up. Handles without references keep the
    /// default.
    fn resolve_references(&self, _registry: &Registry) -> Result<(), RegistryError> {
        Ok(())
    }
}
