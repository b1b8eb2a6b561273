//! Material state cache
//!
//! Dimming and highlighting overwrite material opacity in place. Before a
//! material is altered for the first time its original `{opacity,
//! transparent}` is recorded here, so any number of dim/highlight cycles can
//! be undone exactly. Snapshots are never overwritten; they are dropped only
//! when the owning model is unloaded.
//!
//! Records live in a dense slot table. A material is addressed by the slot
//! handle assigned at first touch.

use bimlink_core::{LocalId, ModelId};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::scene::{MaterialId, MaterialProps, SceneEngine};

/// Original visual state of a material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSnapshot {
    pub original_opacity: f32,
    pub original_transparent: bool,
}

/// Handle of a record in the cache's slot table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(u32);

#[derive(Debug, Clone)]
struct MaterialRecord {
    material: MaterialId,
    snapshot: MaterialSnapshot,
}

/// Which elements of a model an operation applies to
#[derive(Debug, Clone, Copy)]
pub enum Elements<'a> {
    All,
    Only(&'a BTreeSet<LocalId>),
}

impl Elements<'_> {
    fn contains(&self, id: LocalId) -> bool {
        match self {
            Elements::All => true,
            Elements::Only(ids) => ids.contains(&id),
        }
    }
}

#[derive(Debug, Default)]
pub struct MaterialStateCache {
    slots: Vec<Option<MaterialRecord>>,
    free: Vec<SlotHandle>,
    by_material: HashMap<MaterialId, SlotHandle>,
    by_model: HashMap<ModelId, Vec<SlotHandle>>,
}

impl MaterialStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of materials with a recorded snapshot
    pub fn len(&self) -> usize {
        self.by_material.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_material.is_empty()
    }

    /// Models that own at least one snapshot
    pub fn models(&self) -> Vec<ModelId> {
        let mut models: Vec<ModelId> = self
            .by_model
            .iter()
            .filter(|(_, slots)| !slots.is_empty())
            .map(|(model, _)| *model)
            .collect();
        models.sort();
        models
    }

    pub fn snapshot(&self, material: MaterialId) -> Option<MaterialSnapshot> {
        let handle = self.by_material.get(&material)?;
        self.record(*handle).map(|r| r.snapshot)
    }

    /// Set `opacity` on every material of the selected elements.
    /// Returns the number of materials touched.
    pub fn dim(
        &mut self,
        scene: &dyn SceneEngine,
        model: ModelId,
        elements: Elements<'_>,
        opacity: f32,
    ) -> usize {
        let opacity = opacity.clamp(0.0, 1.0);
        let mut touched = 0;
        for material in Self::materials_of(scene, model, elements) {
            let Some(snapshot) = self.touch(scene, model, material) else {
                continue;
            };
            scene.set_material(material, Self::props_for(&snapshot, opacity));
            touched += 1;
        }
        debug!(model = %model, opacity, materials = touched, "Dimmed materials");
        touched
    }

    /// Force the selected elements to full opacity
    pub fn highlight_full(
        &mut self,
        scene: &dyn SceneEngine,
        model: ModelId,
        elements: Elements<'_>,
    ) -> usize {
        self.dim(scene, model, elements, 1.0)
    }

    /// Re-apply recorded snapshots for the selected elements.
    ///
    /// Materials never touched have no snapshot and are left alone. Nothing
    /// is removed from the cache, so calling this twice is harmless.
    pub fn restore(
        &mut self,
        scene: &dyn SceneEngine,
        model: ModelId,
        elements: Elements<'_>,
    ) -> usize {
        let mut restored = 0;
        for material in Self::materials_of(scene, model, elements) {
            if let Some(snapshot) = self.snapshot(material) {
                scene.set_material(material, Self::original_props(&snapshot));
                restored += 1;
            }
        }
        restored
    }

    /// Re-apply every snapshot owned by `model`
    pub fn restore_all(&mut self, scene: &dyn SceneEngine, model: ModelId) -> usize {
        let Some(handles) = self.by_model.get(&model) else {
            return 0;
        };
        let mut restored = 0;
        for handle in handles {
            if let Some(record) = self.slots.get(handle.0 as usize).and_then(Option::as_ref) {
                scene.set_material(record.material, Self::original_props(&record.snapshot));
                restored += 1;
            }
        }
        debug!(model = %model, materials = restored, "Restored materials");
        restored
    }

    /// Drop every snapshot owned by `model` (model unloaded)
    pub fn forget_model(&mut self, model: ModelId) -> usize {
        let Some(handles) = self.by_model.remove(&model) else {
            return 0;
        };
        let count = handles.len();
        for handle in handles {
            if let Some(record) = self.slots.get_mut(handle.0 as usize).and_then(Option::take) {
                self.by_material.remove(&record.material);
                self.free.push(handle);
            }
        }
        count
    }

    fn record(&self, handle: SlotHandle) -> Option<&MaterialRecord> {
        self.slots.get(handle.0 as usize).and_then(Option::as_ref)
    }

    /// Snapshot on first touch; existing snapshots are returned unchanged
    fn touch(
        &mut self,
        scene: &dyn SceneEngine,
        model: ModelId,
        material: MaterialId,
    ) -> Option<MaterialSnapshot> {
        if let Some(snapshot) = self.snapshot(material) {
            return Some(snapshot);
        }

        let current = scene.material(material)?;
        let snapshot = MaterialSnapshot {
            original_opacity: current.opacity,
            original_transparent: current.transparent,
        };
        let record = MaterialRecord { material, snapshot };

        let handle = match self.free.pop() {
            Some(handle) => {
                self.slots[handle.0 as usize] = Some(record);
                handle
            }
            None => {
                self.slots.push(Some(record));
                SlotHandle((self.slots.len() - 1) as u32)
            }
        };
        self.by_material.insert(material, handle);
        self.by_model.entry(model).or_default().push(handle);
        Some(snapshot)
    }

    /// Translucency needs `transparent`; at full opacity the original flag comes back
    fn props_for(snapshot: &MaterialSnapshot, opacity: f32) -> MaterialProps {
        MaterialProps {
            opacity,
            transparent: if opacity < 1.0 {
                true
            } else {
                snapshot.original_transparent
            },
        }
    }

    fn original_props(snapshot: &MaterialSnapshot) -> MaterialProps {
        MaterialProps {
            opacity: snapshot.original_opacity,
            transparent: snapshot.original_transparent,
        }
    }

    fn materials_of(
        scene: &dyn SceneEngine,
        model: ModelId,
        elements: Elements<'_>,
    ) -> Vec<MaterialId> {
        let mut seen = BTreeSet::new();
        scene
            .primitives(model)
            .into_iter()
            .filter(|p| elements.contains(p.element_id))
            .flat_map(|p| p.materials)
            .filter(|m| seen.insert(*m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ElementSpec, MemoryScene};

    fn scene() -> (MemoryScene, ModelId) {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![
            ElementSpec::new(1, "G1"),
            ElementSpec::new(2, "G2").with_material(0.3, true),
            ElementSpec::new(3, "G3"),
        ]);
        (scene, model)
    }

    #[test]
    fn test_dim_then_restore_is_exact() {
        let (scene, model) = scene();
        let mut cache = MaterialStateCache::new();

        assert_eq!(cache.dim(&scene, model, Elements::All, 0.5), 3);
        let dimmed = scene.material_of(model, 1).unwrap();
        assert_eq!(dimmed.opacity, 0.5);
        assert!(dimmed.transparent);

        cache.restore(&scene, model, Elements::All);
        assert_eq!(scene.material_of(model, 1), Some(MaterialProps::OPAQUE));
        assert_eq!(
            scene.material_of(model, 2),
            Some(MaterialProps {
                opacity: 0.3,
                transparent: true
            })
        );
    }

    #[test]
    fn test_snapshot_survives_repeated_cycles() {
        let (scene, model) = scene();
        let mut cache = MaterialStateCache::new();
        let only_two: BTreeSet<LocalId> = [2].into_iter().collect();

        for _ in 0..3 {
            cache.dim(&scene, model, Elements::All, 0.5);
            cache.highlight_full(&scene, model, Elements::Only(&only_two));
            cache.dim(&scene, model, Elements::Only(&only_two), 0.1);
        }
        assert_eq!(cache.len(), 3);

        cache.restore_all(&scene, model);
        assert_eq!(
            scene.material_of(model, 2),
            Some(MaterialProps {
                opacity: 0.3,
                transparent: true
            })
        );
        assert_eq!(scene.material_of(model, 3), Some(MaterialProps::OPAQUE));
    }

    #[test]
    fn test_highlight_full_keeps_original_transparent_flag() {
        let (scene, model) = scene();
        let mut cache = MaterialStateCache::new();

        cache.dim(&scene, model, Elements::All, 0.5);
        cache.highlight_full(&scene, model, Elements::All);

        let opaque = scene.material_of(model, 1).unwrap();
        assert_eq!(opaque.opacity, 1.0);
        assert!(!opaque.transparent);

        let glass = scene.material_of(model, 2).unwrap();
        assert_eq!(glass.opacity, 1.0);
        assert!(glass.transparent);
    }

    #[test]
    fn test_restore_is_idempotent_and_ignores_untouched() {
        let (scene, model) = scene();
        let mut cache = MaterialStateCache::new();
        let first: BTreeSet<LocalId> = [1].into_iter().collect();

        cache.dim(&scene, model, Elements::Only(&first), 0.2);
        assert_eq!(cache.restore(&scene, model, Elements::All), 1);
        assert_eq!(cache.restore(&scene, model, Elements::All), 1);
        assert_eq!(scene.material_of(model, 1), Some(MaterialProps::OPAQUE));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_forget_model_frees_slots() {
        let (scene, model) = scene();
        let mut cache = MaterialStateCache::new();

        cache.dim(&scene, model, Elements::All, 0.5);
        assert_eq!(cache.forget_model(model), 3);
        assert!(cache.is_empty());
        assert!(cache.models().is_empty());

        // Freed slots are reused and the new snapshot is taken from current state
        cache.dim(&scene, model, Elements::All, 0.2);
        assert_eq!(cache.len(), 3);
        let material = scene.material_id_of(model, 1).unwrap();
        assert_eq!(cache.snapshot(material).unwrap().original_opacity, 0.5);
    }
}
