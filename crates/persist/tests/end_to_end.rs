//! Full save/load cycle through the public API.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snapreg_persist::{
    CborCodec, LoadError, ModelSerializer, SaveConfig, SaveError, SaveTarget, SnapshotManager,
    read_artifact, verify_artifact,
};
use snapreg_registry::{
    ModelHeader, ModelRecord, ModelTypeTable, Registry, RegistryError, Smri, Snapshot,
    SnapshotModel, TypeTag,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Crate {
    header: ModelHeader,
    contents: Vec<String>,
}

impl ModelRecord for Crate {
    const TYPE_TAG: TypeTag = TypeTag::new("x-crate");
    const SERIALIZE_ORDER: Option<u32> = Some(5);

    fn header(&self) -> &ModelHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ModelHeader {
        &mut self.header
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Shelf {
    header: ModelHeader,
    slots: u8,
}

impl ModelRecord for Shelf {
    const TYPE_TAG: TypeTag = TypeTag::new("y-shelf");
    const SERIALIZE_ORDER: Option<u32> = Some(1);

    fn header(&self) -> &ModelHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ModelHeader {
        &mut self.header
    }
}

/// Live object: either kind, holding its state and the objects it points at.
struct Thing {
    smri: Smri,
    label: Mutex<String>,
    targets: Mutex<Vec<Smri>>,
    resolved: Mutex<Vec<Weak<dyn Snapshot>>>,
}

impl Thing {
    fn new(smri: Smri) -> Arc<Self> {
        Arc::new(Self {
            smri,
            label: Mutex::new(String::new()),
            targets: Mutex::new(Vec::new()),
            resolved: Mutex::new(Vec::new()),
        })
    }
}

impl Snapshot for Thing {
    fn smri(&self) -> Smri {
        self.smri
    }

    fn update_model(&self, registry: &mut Registry) -> Result<(), RegistryError> {
        let targets = self.targets.lock().clone();
        if let Ok(model) = registry.get_model_mut::<Crate>(self.smri) {
            model.contents = vec![self.label.lock().clone()];
            model.header.ref_smris = targets;
            return Ok(());
        }
        let model = registry.get_model_mut::<Shelf>(self.smri)?;
        model.slots = self.label.lock().len() as u8;
        model.header.ref_smris = targets;
        Ok(())
    }

    fn resolve_references(&self, registry: &Registry) -> Result<(), RegistryError> {
        let model = registry
            .model(self.smri)
            .ok_or(RegistryError::NotFound(self.smri))?;
        let mut resolved = self.resolved.lock();
        resolved.clear();
        for &to in model.ref_smris() {
            let handle = registry
                .snapshot(to)
                .ok_or(RegistryError::DanglingReference { from: self.smri, to })?;
            resolved.push(Arc::downgrade(handle));
        }
        *self.targets.lock() = model.ref_smris().to_vec();
        Ok(())
    }
}

fn table() -> ModelTypeTable {
    let mut table = ModelTypeTable::new();
    table
        .register::<Crate>()
        .and_then(|t| t.register::<Shelf>())
        .unwrap();
    table
}

fn config(dir: &std::path::Path) -> SaveConfig {
    SaveConfig {
        folder: dir.join("slot"),
        filename: "world.cbor.zst".into(),
        ..SaveConfig::default()
    }
}

/// Registers X at 1, Y at 2, X at 3, with 1 -> 2 -> 3 -> 1.
fn populate(manager: &mut SnapshotManager) -> Vec<Arc<Thing>> {
    let registry = manager.registry_mut();
    let mut things = Vec::new();
    for (label, is_crate) in [("apples", true), ("oak", false), ("pears", true)] {
        let smri = registry.allocate();
        let thing = Thing::new(smri);
        *thing.label.lock() = label.into();
        registry.register_snapshot(smri, thing.clone()).unwrap();
        if is_crate {
            registry.create_model::<Crate>(smri).unwrap();
        } else {
            registry.create_model::<Shelf>(smri).unwrap();
        }
        things.push(thing);
    }
    let ids: Vec<Smri> = things.iter().map(|t| t.smri).collect();
    assert_eq!(ids, vec![Smri(1), Smri(2), Smri(3)]);

    *things[0].targets.lock() = vec![Smri(2)];
    *things[1].targets.lock() = vec![Smri(3)];
    *things[2].targets.lock() = vec![Smri(1)];
    things
}

#[test]
fn save_then_decode_groups_by_priority() {
    let tmp = tempfile::tempdir().unwrap();
    let mut manager = SnapshotManager::with_cbor(table(), config(tmp.path()));
    populate(&mut manager);

    let completions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completions);
    manager.on_snapshot_completed(move |outcome| {
        assert!(outcome.is_ok());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let report = manager.take_snapshot().unwrap().wait().unwrap();
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(report.model_count, 3);
    assert_eq!(report.group_order, vec![Shelf::TYPE_TAG, Crate::TYPE_TAG]);

    let codec = CborCodec::new(Arc::clone(manager.table()));
    let groups = read_artifact(&report.path, &codec).unwrap();
    assert_eq!(groups.group_order(), vec![Shelf::TYPE_TAG, Crate::TYPE_TAG]);
    let ids: BTreeSet<Smri> = groups.models().map(|m| m.smri()).collect();
    assert_eq!(ids, BTreeSet::from([Smri(1), Smri(2), Smri(3)]));

    let crates: Vec<Smri> = groups
        .get(Crate::TYPE_TAG)
        .unwrap()
        .iter()
        .map(|m| m.smri())
        .collect();
    assert_eq!(crates, vec![Smri(1), Smri(3)]);
    let first = groups.get(Crate::TYPE_TAG).unwrap()[0]
        .downcast_ref::<Crate>()
        .unwrap();
    assert_eq!(first.contents, vec!["apples".to_string()]);
    assert_eq!(first.header.ref_smris, vec![Smri(2)]);

    let summary = verify_artifact(&report.path, &codec).unwrap();
    assert_eq!(summary.sha256, report.sha256);
    assert!(summary.dangling.is_empty());
}

#[test]
fn saved_cycle_loads_into_fresh_manager() {
    let tmp = tempfile::tempdir().unwrap();
    let mut saver = SnapshotManager::with_cbor(table(), config(tmp.path()));
    populate(&mut saver);
    let target = saver.config().target();
    saver.take_snapshot().unwrap().wait().unwrap();

    let mut loader = SnapshotManager::with_cbor(table(), config(tmp.path()));
    let revived: Arc<Mutex<Vec<Arc<Thing>>>> = Arc::default();
    let sink = Arc::clone(&revived);
    let report = loader
        .load(&target, move |model: &dyn SnapshotModel| {
            let thing = Thing::new(model.smri());
            sink.lock().push(Arc::clone(&thing));
            Ok(thing as Arc<dyn Snapshot>)
        })
        .unwrap();

    assert_eq!(report.model_count, 3);
    assert_eq!(report.resolved, 3);
    assert_eq!(loader.registry().get_model::<Shelf>(Smri(2)).unwrap().slots, 3);

    let revived = revived.lock();
    let by_smri = |smri: Smri| revived.iter().find(|t| t.smri == smri).unwrap();
    for (from, to) in [(1, 2), (2, 3), (3, 1)] {
        let links = by_smri(Smri(from)).resolved.lock();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].upgrade().unwrap().smri(), Smri(to));
    }

    // Fresh objects never collide with loaded ones.
    assert_eq!(loader.registry().allocate(), Smri(4));
}

#[test]
fn load_into_occupied_registry_is_rolled_back() {
    let tmp = tempfile::tempdir().unwrap();
    let mut manager = SnapshotManager::with_cbor(table(), config(tmp.path()));
    populate(&mut manager);
    let target = manager.config().target();
    manager.take_snapshot().unwrap().wait().unwrap();

    // Same manager still holds SMRIs 1..=3.
    let err = manager
        .load(&target, |model| Ok(Thing::new(model.smri()) as Arc<dyn Snapshot>))
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Registry(RegistryError::DuplicateIdentifier(_))
    ));
    assert_eq!(manager.registry().len(), 3);
}

#[test]
fn corrupted_artifact_fails_to_load() {
    let tmp = tempfile::tempdir().unwrap();
    let mut manager = SnapshotManager::with_cbor(table(), config(tmp.path()));
    populate(&mut manager);
    let report = manager.take_snapshot().unwrap().wait().unwrap();

    let mut bytes = std::fs::read(&report.path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&report.path, bytes).unwrap();

    let codec = CborCodec::new(Arc::clone(manager.table()));
    assert!(matches!(
        read_artifact(&report.path, &codec),
        Err(LoadError::Decode(_))
    ));
}

#[test]
fn unwritable_target_reports_once() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();

    let mut manager = SnapshotManager::with_cbor(table(), config(tmp.path()));
    populate(&mut manager);
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    manager.on_snapshot_completed(move |outcome| {
        if outcome.is_err() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let outcome = manager
        .take_snapshot_to(SaveTarget::new(blocker.join("inner"), "world.bin"))
        .unwrap()
        .wait();
    assert!(matches!(outcome, Err(SaveError::CreateDir { .. })));
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    // The manager is free for the next save.
    assert!(manager.take_snapshot().unwrap().wait().is_ok());
    let codec = CborCodec::new(Arc::clone(manager.table()));
    let bytes = std::fs::read(manager.config().target().path()).unwrap();
    assert_eq!(codec.decode(&bytes).unwrap().model_count(), 3);
}
