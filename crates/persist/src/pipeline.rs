//! Capture-then-serialize save pipeline.
//!
//! ```text
//!   take_snapshot()                        (caller thread)
//!     |- take-snapshot hooks
//!     |- Registry::capture_all             every handle pushes live state
//!     |- Registry::model_copies            point-in-time copy
//!     '- spawn worker ----------------->   (background thread)
//!                                            order_and_group
//!                                            ModelSerializer::encode
//!                                            write_atomic
//!                                            completion hooks (exactly once)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use snapreg_registry::{
    ModelTypeTable, Registry, RegistryError, Snapshot, SnapshotModel, TypeTag, order_and_group,
};
use tracing::{error, info, warn};

use crate::codec::{CborCodec, CodecError, ModelSerializer, sha256_hex};
use crate::config::SaveConfig;
use crate::load::{LoadError, LoadReport, load_into, read_artifact};
use crate::writer::{SaveTarget, write_atomic};

/// Errors from a save cycle.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("a snapshot save is already in progress")]
    SaveInProgress,
    #[error("capture failed: {0}")]
    Capture(#[from] RegistryError),
    #[error("encoding failed: {0}")]
    Encode(#[from] CodecError),
    #[error("failed to create save folder {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to spawn save worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
    #[error("save worker panicked")]
    WorkerPanicked,
}

/// What a successful save produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Handles asked to update their model during capture.
    pub snapshots_captured: usize,
    pub model_count: usize,
    pub group_order: Vec<TypeTag>,
    /// sha256 of the bytes on disk.
    pub sha256: String,
}

pub type SaveOutcome = Result<SaveReport, SaveError>;

type TakeSnapshotHook = Box<dyn FnMut(&mut Registry) -> Result<(), RegistryError> + Send>;
type CompletionHook = Box<dyn Fn(&SaveOutcome) + Send + Sync>;

/// Handle to one in-flight save.
#[derive(Debug)]
pub struct SaveHandle {
    target: SaveTarget,
    worker: JoinHandle<SaveOutcome>,
}

impl SaveHandle {
    pub fn target(&self) -> &SaveTarget {
        &self.target
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the background write concludes and return its outcome.
    pub fn wait(self) -> SaveOutcome {
        self.worker
            .join()
            .unwrap_or_else(|_| Err(SaveError::WorkerPanicked))
    }
}

/// Clears the in-flight flag when dropped, including on early returns and unwinds.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns a [`Registry`] and drives saves and loads for it.
pub struct SnapshotManager {
    registry: Registry,
    table: Arc<ModelTypeTable>,
    serializer: Arc<dyn ModelSerializer>,
    config: SaveConfig,
    take_snapshot_hooks: Vec<TakeSnapshotHook>,
    completion_hooks: Arc<Mutex<Vec<CompletionHook>>>,
    in_flight: Arc<AtomicBool>,
}

impl SnapshotManager {
    pub fn new(
        table: Arc<ModelTypeTable>,
        serializer: Arc<dyn ModelSerializer>,
        config: SaveConfig,
    ) -> Self {
        Self {
            registry: Registry::new(),
            table,
            serializer,
            config,
            take_snapshot_hooks: Vec::new(),
            completion_hooks: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Manager using the reference [`CborCodec`] at the configured compression level.
    pub fn with_cbor(table: ModelTypeTable, config: SaveConfig) -> Self {
        let table = Arc::new(table);
        let codec =
            CborCodec::new(Arc::clone(&table)).with_compression_level(config.compression_level);
        Self::new(table, Arc::new(codec), config)
    }

    /// Replace the (empty) default registry, e.g. to inject a shared allocator.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn table(&self) -> &Arc<ModelTypeTable> {
        &self.table
    }

    pub fn serializer(&self) -> &Arc<dyn ModelSerializer> {
        &self.serializer
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    /// Run `hook` at the start of every save, before the registry capture.
    pub fn on_take_snapshot(
        &mut self,
        hook: impl FnMut(&mut Registry) -> Result<(), RegistryError> + Send + 'static,
    ) {
        self.take_snapshot_hooks.push(Box::new(hook));
    }

    /// Run `hook` once per save cycle, on the worker thread, after the write
    /// attempt concludes. Hooks must not register further hooks from inside
    /// the callback.
    pub fn on_snapshot_completed(&self, hook: impl Fn(&SaveOutcome) + Send + Sync + 'static) {
        self.completion_hooks.lock().push(Box::new(hook));
    }

    /// True from the start of capture until the worker has written the
    /// artifact and run every completion hook.
    pub fn is_saving(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Save to the configured target.
    pub fn take_snapshot(&mut self) -> Result<SaveHandle, SaveError> {
        let target = self.config.target();
        self.take_snapshot_to(target)
    }

    /// Capture synchronously, then encode and write `target` on a background
    /// thread. Rejects the request while a previous save is still writing.
    pub fn take_snapshot_to(&mut self, target: SaveTarget) -> Result<SaveHandle, SaveError> {
        let _span = tracing::info_span!("take_snapshot", path = %target.path().display()).entered();

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("save requested while another is in flight");
            return Err(SaveError::SaveInProgress);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        for hook in &mut self.take_snapshot_hooks {
            hook(&mut self.registry)?;
        }
        let snapshots_captured = self.registry.capture_all()?;
        let models = self.registry.model_copies();

        let job = SaveJob {
            models,
            snapshots_captured,
            table: Arc::clone(&self.table),
            serializer: Arc::clone(&self.serializer),
            target: target.clone(),
            hooks: Arc::clone(&self.completion_hooks),
        };
        let worker = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || job.run(guard))
            .map_err(SaveError::WorkerSpawn)?;

        Ok(SaveHandle { target, worker })
    }

    /// Read `target`, decode it, and load it into the registry. See [`load_into`].
    pub fn load(
        &mut self,
        target: &SaveTarget,
        factory: impl FnMut(&dyn SnapshotModel) -> Result<Arc<dyn Snapshot>, LoadError>,
    ) -> Result<LoadReport, LoadError> {
        let groups = read_artifact(&target.path(), self.serializer.as_ref())?;
        load_into(&mut self.registry, groups, factory)
    }
}

/// Everything the background worker needs; owns its model copy outright.
struct SaveJob {
    models: Vec<Box<dyn SnapshotModel>>,
    snapshots_captured: usize,
    table: Arc<ModelTypeTable>,
    serializer: Arc<dyn ModelSerializer>,
    target: SaveTarget,
    hooks: Arc<Mutex<Vec<CompletionHook>>>,
}

impl SaveJob {
    fn run(self, guard: InFlightGuard) -> SaveOutcome {
        let SaveJob {
            models,
            snapshots_captured,
            table,
            serializer,
            target,
            hooks,
        } = self;
        let _span = tracing::info_span!("snapshot_write", path = %target.path().display()).entered();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            encode_and_write(models, snapshots_captured, &table, serializer.as_ref(), &target)
        }))
        .unwrap_or_else(|_| Err(SaveError::WorkerPanicked));

        match &outcome {
            Ok(report) => info!(
                path = %report.path.display(),
                models = report.model_count,
                bytes = report.bytes_written,
                "snapshot saved"
            ),
            Err(e) => error!(error = %e, "snapshot save failed"),
        }

        for (index, hook) in hooks.lock().iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| hook(&outcome))).is_err() {
                error!(hook = index, "completion hook panicked");
            }
        }
        // Released only after every hook has seen this cycle's outcome.
        drop(guard);
        outcome
    }
}

fn encode_and_write(
    models: Vec<Box<dyn SnapshotModel>>,
    snapshots_captured: usize,
    table: &ModelTypeTable,
    serializer: &dyn ModelSerializer,
    target: &SaveTarget,
) -> SaveOutcome {
    let model_count = models.len();
    let groups = order_and_group(models, table);
    let group_order = groups.group_order();
    let bytes = serializer.encode(&groups)?;
    let sha256 = sha256_hex(&bytes);
    let path = write_atomic(target, &bytes)?;

    Ok(SaveReport {
        path,
        bytes_written: bytes.len() as u64,
        snapshots_captured,
        model_count,
        group_order,
        sha256,
    })
}
