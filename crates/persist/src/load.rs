//! Two-phase artifact loading.
//!
//! Phase 1 revives a handle for every decoded model and registers the pair
//! under the model's original SMRI. Phase 2 runs only once every model is in
//! place, so forward references and cycles resolve against a complete graph.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapreg_registry::{
    ModelGroups, Registry, RegistryError, Smri, Snapshot, SnapshotModel, TypeTag,
};
use tracing::{info, warn};

use crate::codec::{CodecError, ModelSerializer, sha256_hex};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),
    #[error("registry rejected load: {0}")]
    Registry(#[from] RegistryError),
    #[error("snapshot factory failed: {0}")]
    Factory(String),
}

/// What a completed load put into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub model_count: usize,
    pub group_order: Vec<TypeTag>,
    /// Loaded handles that ran reference resolution.
    pub resolved: usize,
}

/// Read and decode the artifact at `path`.
pub fn read_artifact(path: &Path, serializer: &dyn ModelSerializer) -> Result<ModelGroups, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serializer.decode(&bytes)?)
}

/// Load decoded `groups` into `registry`.
///
/// `factory` builds the live handle for each model; its `smri()` must equal
/// the model's. Models are registered in group order, then each handle this
/// call registered resolves its references. Objects already in the registry
/// are not re-resolved. On any failure the SMRIs registered by this call
/// are removed again, leaving the registry as it was.
pub fn load_into(
    registry: &mut Registry,
    groups: ModelGroups,
    mut factory: impl FnMut(&dyn SnapshotModel) -> Result<Arc<dyn Snapshot>, LoadError>,
) -> Result<LoadReport, LoadError> {
    let _span = tracing::info_span!("load").entered();
    let model_count = groups.model_count();
    let group_order = groups.group_order();

    let mut loaded = Vec::with_capacity(model_count);
    let result = register_all(registry, groups, &mut factory, &mut loaded)
        .and_then(|()| {
            registry
                .resolve_references_for(&loaded)
                .map_err(LoadError::from)
        });

    match result {
        Ok(resolved) => {
            info!(models = model_count, resolved, "artifact loaded");
            Ok(LoadReport {
                model_count,
                group_order,
                resolved,
            })
        }
        Err(e) => {
            warn!(error = %e, rolled_back = loaded.len(), "load failed, rolling back");
            for smri in loaded {
                registry.remove(smri);
            }
            Err(e)
        }
    }
}

fn register_all(
    registry: &mut Registry,
    groups: ModelGroups,
    factory: &mut impl FnMut(&dyn SnapshotModel) -> Result<Arc<dyn Snapshot>, LoadError>,
    loaded: &mut Vec<Smri>,
) -> Result<(), LoadError> {
    for model in groups.into_models() {
        let handle = factory(&*model)?;
        loaded.push(registry.load_snapshot(handle, model)?);
    }
    Ok(())
}

/// Contents of an artifact, gathered without touching a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub path: PathBuf,
    pub bytes: u64,
    /// sha256 of the file on disk.
    pub sha256: String,
    /// Model count per type, in group order.
    pub groups: Vec<(TypeTag, usize)>,
    pub model_count: usize,
    /// `(from, to)` references whose target is not in the artifact.
    pub dangling: Vec<(Smri, Smri)>,
}

impl fmt::Display for ArtifactSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Artifact: {}", self.path.display())?;
        writeln!(f, "  size:    {} bytes", self.bytes)?;
        writeln!(f, "  sha256:  {}", self.sha256)?;
        writeln!(f, "  models:  {}", self.model_count)?;
        for (tag, count) in &self.groups {
            writeln!(f, "    {tag:<16} {count}")?;
        }
        if self.dangling.is_empty() {
            write!(f, "  references: all resolved")
        } else {
            write!(f, "  dangling references: {}", self.dangling.len())?;
            for (from, to) in &self.dangling {
                write!(f, "\n    {from} -> {to}")?;
            }
            Ok(())
        }
    }
}

/// Decode the artifact at `path` and summarize it.
pub fn verify_artifact(
    path: &Path,
    serializer: &dyn ModelSerializer,
) -> Result<ArtifactSummary, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let groups = serializer.decode(&bytes)?;

    let present: BTreeSet<Smri> = groups.models().map(|m| m.smri()).collect();
    let dangling = groups
        .models()
        .flat_map(|m| m.ref_smris().iter().map(move |to| (m.smri(), *to)))
        .filter(|(_, to)| !present.contains(to))
        .collect();

    Ok(ArtifactSummary {
        path: path.to_path_buf(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
        groups: groups.iter().map(|(tag, models)| (tag, models.len())).collect(),
        model_count: groups.model_count(),
        dangling,
    })
}
