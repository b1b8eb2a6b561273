//! In-memory scene backend
//!
//! A [`SceneEngine`] that keeps models, materials and highlight layers in
//! plain collections. It backs headless sessions and the engine's tests; an
//! optional per-call latency simulates a renderer that answers asynchronously.

use async_trait::async_trait;
use bimlink_core::{ElementIdentity, LocalId, ModelId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::camera::{BoundingBox, CameraFocus};
use crate::scene::{
    ElementData, HighlightStyle, HighlightTargets, MaterialId, MaterialProps, Primitive, Rgb,
    SceneEngine, SceneError,
};

/// Description of one element to load
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub bounds: Option<BoundingBox>,
    pub material: MaterialProps,
}

impl ElementSpec {
    pub fn new(local_id: LocalId, guid: impl Into<String>) -> Self {
        Self {
            local_id,
            guid: Some(guid.into()),
            category: None,
            name: None,
            bounds: None,
            material: MaterialProps::OPAQUE,
        }
    }

    pub fn without_guid(local_id: LocalId) -> Self {
        Self {
            guid: None,
            ..Self::new(local_id, "")
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_material(mut self, opacity: f32, transparent: bool) -> Self {
        self.material = MaterialProps {
            opacity,
            transparent,
        };
        self
    }

    /// Unit cube placed along x by local id
    fn default_bounds(&self) -> BoundingBox {
        let x = self.local_id as f32;
        BoundingBox::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
    }
}

#[derive(Debug)]
struct MemoryElement {
    spec: ElementSpec,
    material: MaterialId,
}

#[derive(Debug, Default)]
struct MemoryState {
    models: BTreeMap<ModelId, Vec<MemoryElement>>,
    materials: HashMap<MaterialId, MaterialProps>,
    layers: Vec<(HighlightStyle, HighlightTargets)>,
    camera: Option<CameraFocus>,
    camera_moves: usize,
    updates: usize,
    next_model: u32,
    next_material: u64,
}

/// Scene graph held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryScene {
    state: Mutex<MemoryState>,
    latency: Mutex<Duration>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every async call sleeps this long before answering
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Load a model; every element gets its own material
    pub fn load_model(&self, elements: Vec<ElementSpec>) -> ModelId {
        let mut state = self.state();
        let model = ModelId(state.next_model);
        state.next_model += 1;

        let mut loaded = Vec::with_capacity(elements.len());
        for spec in elements {
            let material = MaterialId(state.next_material);
            state.next_material += 1;
            state.materials.insert(material, spec.material);
            loaded.push(MemoryElement { spec, material });
        }
        state.models.insert(model, loaded);
        model
    }

    pub fn unload_model(&self, model: ModelId) -> bool {
        let mut state = self.state();
        let Some(elements) = state.models.remove(&model) else {
            return false;
        };
        for element in elements {
            state.materials.remove(&element.material);
        }
        for (_, targets) in state.layers.iter_mut() {
            targets.remove(&model);
        }
        true
    }

    pub fn material_id_of(&self, model: ModelId, local_id: LocalId) -> Option<MaterialId> {
        let state = self.state();
        state
            .models
            .get(&model)?
            .iter()
            .find(|e| e.spec.local_id == local_id)
            .map(|e| e.material)
    }

    pub fn material_of(&self, model: ModelId, local_id: LocalId) -> Option<MaterialProps> {
        let material = self.material_id_of(model, local_id)?;
        self.state().materials.get(&material).copied()
    }

    /// Color of the topmost highlight layer covering the element
    pub fn highlight_color_of(&self, model: ModelId, local_id: LocalId) -> Option<Rgb> {
        let state = self.state();
        state
            .layers
            .iter()
            .rev()
            .find(|(_, targets)| targets.get(&model).is_some_and(|ids| ids.contains(&local_id)))
            .map(|(style, _)| style.color)
    }

    pub fn highlight_layers(&self) -> Vec<(HighlightStyle, HighlightTargets)> {
        self.state().layers.clone()
    }

    pub fn camera(&self) -> Option<CameraFocus> {
        self.state().camera
    }

    pub fn camera_moves(&self) -> usize {
        self.state().camera_moves
    }

    pub fn updates(&self) -> usize {
        self.state().updates
    }

    fn check_loaded(state: &MemoryState, model: ModelId) -> Result<(), SceneError> {
        if state.models.contains_key(&model) {
            Ok(())
        } else {
            Err(SceneError::ModelNotLoaded(model))
        }
    }
}

#[async_trait]
impl SceneEngine for MemoryScene {
    fn loaded_models(&self) -> Vec<ModelId> {
        self.state().models.keys().copied().collect()
    }

    async fn list_elements(&self, model: ModelId) -> Result<Vec<ElementIdentity>, SceneError> {
        self.delay().await;
        let state = self.state();
        let elements = state
            .models
            .get(&model)
            .ok_or(SceneError::ModelNotLoaded(model))?;
        Ok(elements
            .iter()
            .map(|e| ElementIdentity {
                local_id: e.spec.local_id,
                guid: e.spec.guid.clone(),
            })
            .collect())
    }

    async fn element_data(
        &self,
        model: ModelId,
        local_ids: &[LocalId],
    ) -> Result<Vec<ElementData>, SceneError> {
        self.delay().await;
        let state = self.state();
        let elements = state
            .models
            .get(&model)
            .ok_or(SceneError::ModelNotLoaded(model))?;
        Ok(local_ids
            .iter()
            .filter_map(|id| elements.iter().find(|e| e.spec.local_id == *id))
            .map(|e| ElementData {
                local_id: e.spec.local_id,
                guid: e.spec.guid.clone(),
                category: e.spec.category.clone(),
                name: e.spec.name.clone(),
            })
            .collect())
    }

    async fn bounding_box(
        &self,
        model: ModelId,
        local_ids: &[LocalId],
    ) -> Result<Option<BoundingBox>, SceneError> {
        self.delay().await;
        let state = self.state();
        let elements = state
            .models
            .get(&model)
            .ok_or(SceneError::ModelNotLoaded(model))?;
        Ok(BoundingBox::merge(
            elements
                .iter()
                .filter(|e| local_ids.is_empty() || local_ids.contains(&e.spec.local_id))
                .map(|e| e.spec.bounds.unwrap_or_else(|| e.spec.default_bounds())),
        ))
    }

    fn primitives(&self, model: ModelId) -> Vec<Primitive> {
        let state = self.state();
        state
            .models
            .get(&model)
            .map(|elements| {
                elements
                    .iter()
                    .map(|e| Primitive {
                        element_id: e.spec.local_id,
                        materials: vec![e.material],
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn material(&self, id: MaterialId) -> Option<MaterialProps> {
        self.state().materials.get(&id).copied()
    }

    fn set_material(&self, id: MaterialId, props: MaterialProps) {
        if let Some(material) = self.state().materials.get_mut(&id) {
            *material = props;
        }
    }

    async fn apply_highlight(
        &self,
        style: &HighlightStyle,
        targets: &HighlightTargets,
    ) -> Result<(), SceneError> {
        self.delay().await;
        let mut state = self.state();
        for model in targets.keys() {
            Self::check_loaded(&state, *model)?;
        }
        state.layers.push((*style, targets.clone()));
        Ok(())
    }

    async fn clear_highlight(&self) -> Result<(), SceneError> {
        self.delay().await;
        self.state().layers.clear();
        Ok(())
    }

    async fn force_update(&self) -> Result<(), SceneError> {
        self.state().updates += 1;
        Ok(())
    }

    fn fit_camera(&self, focus: CameraFocus) {
        let mut state = self.state();
        state.camera = Some(focus);
        state.camera_moves += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_list_and_query_elements() {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![
            ElementSpec::new(5, "G1")
                .with_name("Wall 01")
                .with_category("IfcWall"),
            ElementSpec::without_guid(6),
            ElementSpec::new(9, "G9")
                .with_bounds(BoundingBox::new([0.0, -2.0, 0.0], [1.0, 1.0, 4.0])),
        ]);

        let elements = scene.list_elements(model).await.unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[1].guid, None);

        let data = scene.element_data(model, &[5, 99]).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name.as_deref(), Some("Wall 01"));

        let bounds = scene.bounding_box(model, &[5, 6]).await.unwrap().unwrap();
        assert_eq!(bounds.min, [5.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [7.0, 1.0, 1.0]);

        let explicit = scene.bounding_box(model, &[9]).await.unwrap().unwrap();
        assert_eq!(explicit.min, [0.0, -2.0, 0.0]);
        assert_eq!(explicit.max, [1.0, 1.0, 4.0]);
    }

    #[tokio::test]
    async fn test_unloaded_model_errors() {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![ElementSpec::new(1, "G1")]);
        assert!(scene.unload_model(model));

        assert_eq!(
            scene.list_elements(model).await,
            Err(SceneError::ModelNotLoaded(model))
        );
        assert!(scene.primitives(model).is_empty());
    }

    #[tokio::test]
    async fn test_highlight_layers_stack() {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![ElementSpec::new(1, "G1"), ElementSpec::new(2, "G2")]);

        let gray = HighlightStyle {
            color: [0.5, 0.5, 0.5],
            opacity: 0.5,
            transparent: true,
        };
        let blue = HighlightStyle {
            color: [0.0, 0.0, 1.0],
            opacity: 1.0,
            transparent: false,
        };
        let all: HighlightTargets = [(model, BTreeSet::from([1, 2]))].into_iter().collect();
        let one: HighlightTargets = [(model, BTreeSet::from([2]))].into_iter().collect();

        scene.apply_highlight(&gray, &all).await.unwrap();
        scene.apply_highlight(&blue, &one).await.unwrap();
        assert_eq!(scene.highlight_color_of(model, 1), Some([0.5, 0.5, 0.5]));
        assert_eq!(scene.highlight_color_of(model, 2), Some([0.0, 0.0, 1.0]));

        scene.clear_highlight().await.unwrap();
        assert_eq!(scene.highlight_color_of(model, 2), None);
    }
}
