//! Demo colony used by the CLI: settlers, the buildings that house them, and
//! a ledger note.

use std::sync::{Arc, Weak};

use glam::Vec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snapreg_persist::LoadError;
use snapreg_registry::{
    ModelHeader, ModelRecord, ModelTypeTable, Registry, RegistryError, Smri, Snapshot,
    SnapshotModel, TypeTag,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settler {
    pub header: ModelHeader,
    pub name: String,
    pub position: Vec3,
    pub hunger: f32,
}

impl ModelRecord for Settler {
    const TYPE_TAG: TypeTag = TypeTag::new("settler");
    const SERIALIZE_ORDER: Option<u32> = Some(10);

    fn header(&self) -> &ModelHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ModelHeader {
        &mut self.header
    }
}

/// Buildings are written before the settlers living in them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Building {
    pub header: ModelHeader,
    pub kind: String,
    pub position: Vec3,
}

impl ModelRecord for Building {
    const TYPE_TAG: TypeTag = TypeTag::new("building");
    const SERIALIZE_ORDER: Option<u32> = Some(1);

    fn header(&self) -> &ModelHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ModelHeader {
        &mut self.header
    }
}

/// No declared priority; always lands in the last group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Note {
    pub header: ModelHeader,
    pub text: String,
}

impl ModelRecord for Note {
    const TYPE_TAG: TypeTag = TypeTag::new("note");

    fn header(&self) -> &ModelHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ModelHeader {
        &mut self.header
    }
}

pub fn model_types() -> Result<ModelTypeTable, RegistryError> {
    let mut table = ModelTypeTable::new();
    table
        .register::<Settler>()?
        .register::<Building>()?
        .register::<Note>()?;
    Ok(table)
}

/// Live object backed by a model of type `M`.
///
/// The live state is kept as a model value; links to other objects are held
/// weakly and written back as `ref_smris` on capture.
pub struct Live<M: ModelRecord> {
    smri: Smri,
    state: Mutex<M>,
    links: Mutex<Vec<Weak<dyn Snapshot>>>,
}

impl<M: ModelRecord> Live<M> {
    pub fn new(state: M) -> Arc<Self> {
        Arc::new(Self {
            smri: state.header().smri,
            state: Mutex::new(state),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn link(&self, target: &Arc<dyn Snapshot>) {
        self.links.lock().push(Arc::downgrade(target));
    }

    pub fn update(&self, f: impl FnOnce(&mut M)) {
        f(&mut self.state.lock());
    }

    /// SMRIs of the still-alive linked objects.
    pub fn linked(&self) -> Vec<Smri> {
        self.links
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|h| h.smri())
            .collect()
    }
}

impl<M: ModelRecord> Snapshot for Live<M> {
    fn smri(&self) -> Smri {
        self.smri
    }

    fn update_model(&self, registry: &mut Registry) -> Result<(), RegistryError> {
        let mut model = self.state.lock().clone();
        *model.header_mut() = ModelHeader::with_refs(self.smri, self.linked());
        *registry.get_model_mut::<M>(self.smri)? = model;
        Ok(())
    }

    fn resolve_references(&self, registry: &Registry) -> Result<(), RegistryError> {
        let model = registry.get_model::<M>(self.smri)?;
        let mut links = Vec::with_capacity(model.header().ref_smris.len());
        for &to in &model.header().ref_smris {
            let target = registry
                .snapshot(to)
                .ok_or(RegistryError::DanglingReference { from: self.smri, to })?;
            links.push(Arc::downgrade(target));
        }
        *self.links.lock() = links;
        Ok(())
    }
}

/// Live handles of a freshly built colony.
pub struct Colony {
    pub settlers: Vec<Arc<Live<Settler>>>,
    pub buildings: Vec<Arc<Live<Building>>>,
    pub ledger: Arc<Live<Note>>,
}

fn spawn<M: ModelRecord>(
    registry: &mut Registry,
    make: impl FnOnce(Smri) -> M,
) -> Result<Arc<Live<M>>, RegistryError> {
    let smri = registry.allocate();
    let live = Live::new(make(smri));
    registry.register_snapshot(smri, live.clone())?;
    registry.create_model::<M>(smri)?;
    Ok(live)
}

/// Build `settlers` settlers in a friendship ring, houses of four, and a
/// ledger note listing every house.
pub fn build(registry: &mut Registry, settlers: usize) -> Result<Colony, RegistryError> {
    let settlers = (0..settlers)
        .map(|i| {
            spawn(registry, |smri| Settler {
                header: ModelHeader::new(smri),
                name: format!("settler-{i}"),
                position: Vec3::new(i as f32 * 2.0, 0.0, (i % 3) as f32),
                hunger: 0.1 * (i % 10) as f32,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (i, settler) in settlers.iter().enumerate() {
        let friend: Arc<dyn Snapshot> = settlers[(i + 1) % settlers.len()].clone();
        settler.link(&friend);
    }

    let mut buildings = Vec::new();
    for (n, household) in settlers.chunks(4).enumerate() {
        let house = spawn(registry, |smri| Building {
            header: ModelHeader::new(smri),
            kind: "house".into(),
            position: Vec3::new(n as f32 * 10.0, 0.0, -5.0),
        })?;
        for settler in household {
            let occupant: Arc<dyn Snapshot> = settler.clone();
            house.link(&occupant);
        }
        buildings.push(house);
    }

    let ledger = spawn(registry, |smri| Note {
        header: ModelHeader::new(smri),
        text: format!("{} settlers, {} houses", settlers.len(), buildings.len()),
    })?;
    for house in &buildings {
        let target: Arc<dyn Snapshot> = house.clone();
        ledger.link(&target);
    }

    Ok(Colony {
        settlers,
        buildings,
        ledger,
    })
}

/// Load factory: revive the live object for a decoded model.
pub fn revive(model: &dyn SnapshotModel) -> Result<Arc<dyn Snapshot>, LoadError> {
    if let Some(settler) = model.downcast_ref::<Settler>() {
        return Ok(Live::new(settler.clone()));
    }
    if let Some(building) = model.downcast_ref::<Building>() {
        return Ok(Live::new(building.clone()));
    }
    if let Some(note) = model.downcast_ref::<Note>() {
        return Ok(Live::new(note.clone()));
    }
    Err(LoadError::Factory(format!(
        "no live object for model type `{}`",
        model.type_tag()
    )))
}
