//! Rendering engine seam
//!
//! The viewer never talks to a concrete renderer. Everything it needs from
//! the scene graph goes through [`SceneEngine`]: element listing, attribute
//! lookup, bounds, per-primitive materials, the highlight overlay and the
//! camera.

use async_trait::async_trait;
use bimlink_core::{ElementIdentity, LocalId, ModelId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::camera::{BoundingBox, CameraFocus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Model {0} is not loaded")]
    ModelNotLoaded(ModelId),
    #[error("Rendering engine error: {0}")]
    Engine(String),
}

/// RGB color, components in 0.0-1.0
pub type Rgb = [f32; 3];

/// Engine-assigned handle of a material; stable for the material's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

/// The material properties the viewer alters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialProps {
    pub opacity: f32,
    pub transparent: bool,
}

impl MaterialProps {
    pub const OPAQUE: MaterialProps = MaterialProps {
        opacity: 1.0,
        transparent: false,
    };
}

/// A renderable primitive. `element_id` is the per-primitive identifier
/// attribute baked into the geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub element_id: LocalId,
    pub materials: Vec<MaterialId>,
}

/// Attribute bag of one element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementData {
    pub local_id: LocalId,
    pub guid: Option<String>,
    /// IFC class, e.g. "IfcWall"
    pub category: Option<String>,
    pub name: Option<String>,
}

/// Style for one highlight layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightStyle {
    pub color: Rgb,
    pub opacity: f32,
    pub transparent: bool,
}

/// Elements addressed per model
pub type HighlightTargets = BTreeMap<ModelId, BTreeSet<LocalId>>;

/// Number of elements across all models
pub fn target_count(targets: &HighlightTargets) -> usize {
    targets.values().map(BTreeSet::len).sum()
}

/// Raycast hit from a double-activation gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickResult {
    pub model_id: ModelId,
    pub local_id: LocalId,
}

/// Operations consumed from the rendering/model-loading collaborator.
///
/// Material access is synchronous; it only touches engine-side state. Calls
/// that may wait on the engine (queries, overlay changes, redraws) are async.
#[async_trait]
pub trait SceneEngine: Send + Sync {
    /// Models that are fully loaded and queryable
    fn loaded_models(&self) -> Vec<ModelId>;

    fn is_loaded(&self, model: ModelId) -> bool {
        self.loaded_models().contains(&model)
    }

    /// Every element of a model with its GUID (if any)
    async fn list_elements(&self, model: ModelId) -> Result<Vec<ElementIdentity>, SceneError>;

    /// Attribute bags for the given elements; unknown ids are omitted
    async fn element_data(
        &self,
        model: ModelId,
        local_ids: &[LocalId],
    ) -> Result<Vec<ElementData>, SceneError>;

    /// Bounds of the given elements, or of the whole model when `local_ids` is empty
    async fn bounding_box(
        &self,
        model: ModelId,
        local_ids: &[LocalId],
    ) -> Result<Option<BoundingBox>, SceneError>;

    /// Renderable primitives of a model
    fn primitives(&self, model: ModelId) -> Vec<Primitive>;

    fn material(&self, id: MaterialId) -> Option<MaterialProps>;

    fn set_material(&self, id: MaterialId, props: MaterialProps);

    /// Add a highlight layer over `targets`. One opacity applies to the whole set.
    async fn apply_highlight(
        &self,
        style: &HighlightStyle,
        targets: &HighlightTargets,
    ) -> Result<(), SceneError>;

    /// Remove every highlight layer
    async fn clear_highlight(&self) -> Result<(), SceneError>;

    /// Push pending material/overlay changes to the screen
    async fn force_update(&self) -> Result<(), SceneError>;

    /// Start a camera move; returns immediately, a later call interrupts it
    fn fit_camera(&self, focus: CameraFocus);
}
