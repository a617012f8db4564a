use std::collections::BTreeMap;
use std::fmt;

use snapreg_registry::{Registry, Smri, TypeTag};

/// Registry inspector for developer tooling.
///
/// Provides read-only queries against a registry for debugging and
/// diagnostics output.
pub struct RegistryInspector;

impl RegistryInspector {
    /// Produce a summary of the registry state.
    pub fn summary(registry: &Registry) -> RegistrySummary {
        let mut per_type: BTreeMap<TypeTag, usize> = BTreeMap::new();
        for model in registry.models().values() {
            *per_type.entry(model.type_tag()).or_default() += 1;
        }
        RegistrySummary {
            snapshot_count: registry.snapshots().len(),
            model_count: registry.models().len(),
            current_smri: registry.allocator().current(),
            per_type: per_type.into_iter().collect(),
        }
    }

    /// Describe the model registered under `smri`.
    pub fn inspect_model(registry: &Registry, smri: Smri) -> Option<ModelInfo> {
        registry.model(smri).map(|model| ModelInfo {
            smri,
            tag: model.type_tag(),
            ref_smris: model.ref_smris().to_vec(),
            has_snapshot: registry.snapshot(smri).is_some(),
        })
    }

    /// List all model SMRIs in ascending order.
    pub fn list_models(registry: &Registry) -> Vec<Smri> {
        registry.models().keys().copied().collect()
    }

    pub fn dangling_references(registry: &Registry) -> Vec<(Smri, Smri)> {
        registry.dangling_references()
    }
}

/// Summary of registry state for the inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySummary {
    pub snapshot_count: usize,
    pub model_count: usize,
    /// Highest SMRI handed out or adopted so far.
    pub current_smri: Smri,
    /// Model count per type tag, sorted by tag.
    pub per_type: Vec<(TypeTag, usize)>,
}

impl fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry: snapshots={} models={} current_smri={}",
            self.snapshot_count, self.model_count, self.current_smri
        )?;
        for (tag, count) in &self.per_type {
            write!(f, "\n  {tag:<16} {count}")?;
        }
        Ok(())
    }
}

/// Detailed info about a single model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub smri: Smri,
    pub tag: TypeTag,
    pub ref_smris: Vec<Smri>,
    /// Whether a live handle is registered under the same SMRI.
    pub has_snapshot: bool,
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let refs: Vec<String> = self.ref_smris.iter().map(Smri::to_string).collect();
        write!(
            f,
            "Model {} [{}] refs=[{}]{}",
            self.smri,
            self.tag,
            refs.join(", "),
            if self.has_snapshot { "" } else { " (no handle)" }
        )
    }
}
