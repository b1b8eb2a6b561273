//! Selection session controller
//!
//! Turns user intent (device selection, element pick, reset, mapping refresh)
//! into guarded highlight, camera, detail and telemetry updates.
//!
//! Every entry point mints a [`SessionToken`]. Work carries its token through
//! each suspension point and stops as soon as a newer token exists, so only
//! the latest intent ever reaches the screen. Abandoned work still uses its
//! turn in the highlight queue; the token check at the start of the queued
//! task turns it into a no-op.

use bimlink_core::{Device, DeviceId, DeviceIndex, ModelId, TelemetryQuery};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::camera::{BoundingBox, CameraFocus};
use crate::config::ViewerConfig;
use crate::coordinator::HighlightCoordinator;
use crate::data::DataSource;
use crate::error::ViewerError;
use crate::events::{EventBus, PickPayload, TelemetryStatus, ViewerEvent};
use crate::registry::IdentityRegistry;
use crate::scene::{ElementData, HighlightTargets, PickResult, SceneEngine};

/// Monotonic selection counter; the highest minted value is current
#[derive(Debug, Default)]
pub struct SessionTokens {
    current: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersede all outstanding work
    pub fn mint(&self) -> SessionToken {
        SessionToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> SessionToken {
        SessionToken(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, token: SessionToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }
}

/// How a selection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Visual state reflects this selection
    Committed { elements: usize },
    /// A newer selection took over; nothing more was applied
    Superseded,
    /// Unknown device id
    NotFound,
    /// None of the requested elements exist in the loaded models
    NoGeometry,
}

impl SelectionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SelectionOutcome::Committed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickOutcome {
    /// The pick resolved to a device and ran the device flow
    pub device_selected: bool,
    pub outcome: SelectionOutcome,
}

/// Detail panel line for one element: "Name (IfcClass) GUID"
pub fn detail_line(data: &ElementData) -> String {
    format!(
        "{} ({}) {}",
        data.name.as_deref().unwrap_or("Unnamed"),
        data.category.as_deref().unwrap_or("Unknown"),
        data.guid.as_deref().unwrap_or("-")
    )
}

pub struct SelectionController {
    scene: Arc<dyn SceneEngine>,
    data: Arc<dyn DataSource>,
    registry: Arc<IdentityRegistry>,
    coordinator: HighlightCoordinator,
    index: RwLock<Arc<DeviceIndex>>,
    tokens: Arc<SessionTokens>,
    events: EventBus,
    config: ViewerConfig,
}

impl SelectionController {
    /// Must be called inside a Tokio runtime (spawns the highlight worker)
    pub fn new(
        scene: Arc<dyn SceneEngine>,
        data: Arc<dyn DataSource>,
        config: ViewerConfig,
    ) -> Self {
        let coordinator = HighlightCoordinator::new(scene.clone(), config.highlight);
        Self {
            scene,
            data,
            registry: Arc::new(IdentityRegistry::new()),
            coordinator,
            index: RwLock::new(Arc::new(DeviceIndex::new())),
            tokens: Arc::new(SessionTokens::new()),
            events: EventBus::new(),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &HighlightCoordinator {
        &self.coordinator
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    /// Current device index snapshot
    pub async fn devices(&self) -> Arc<DeviceIndex> {
        self.index.read().await.clone()
    }

    fn is_current(&self, token: SessionToken) -> bool {
        self.tokens.is_current(token)
    }

    /// Register a freshly loaded model and announce readiness
    pub async fn model_loaded(&self, model: ModelId) -> Result<(), ViewerError> {
        self.registry.build(self.scene.as_ref(), model).await?;
        self.events.publish(ViewerEvent::ViewerReady);
        Ok(())
    }

    /// Drop identity and material state for an unloaded model
    pub async fn model_unloaded(&self, model: ModelId) -> Result<(), ViewerError> {
        self.registry.remove(model).await;
        let forgotten = self.coordinator.forget_model(model).await?;
        debug!(model = %model, materials = forgotten, "Model unloaded");
        Ok(())
    }

    /// Highlight a device's elements, frame them, show details and telemetry
    pub async fn select(&self, device: Arc<Device>) -> Result<SelectionOutcome, ViewerError> {
        let token = self.tokens.mint();
        info!(device = %device.id, token = token.value(), "Selecting device");
        self.run_device_selection(token, vec![device]).await
    }

    pub async fn select_by_id(&self, id: &str) -> Result<SelectionOutcome, ViewerError> {
        let device = self.devices().await.device_by_id(id).cloned();
        match device {
            Some(device) => self.select(device).await,
            None => {
                warn!(device = %id, "Unknown device");
                Ok(SelectionOutcome::NotFound)
            }
        }
    }

    /// Select several devices at once; unknown ids are skipped
    pub async fn select_devices(&self, ids: &[String]) -> Result<SelectionOutcome, ViewerError> {
        let index = self.devices().await;
        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            match index.device_by_id(id) {
                Some(device) if !devices.iter().any(|d: &Arc<Device>| d.id == device.id) => {
                    devices.push(device.clone())
                }
                Some(_) => {}
                None => warn!(device = %id, "Unknown device in multi-selection"),
            }
        }
        if devices.is_empty() {
            return Ok(SelectionOutcome::NotFound);
        }

        let token = self.tokens.mint();
        info!(devices = devices.len(), token = token.value(), "Selecting devices");
        self.run_device_selection(token, devices).await
    }

    /// Handle a double-activation pick on a model element
    pub async fn select_by_element(&self, pick: PickResult) -> Result<PickOutcome, ViewerError> {
        let token = self.tokens.mint();
        let not_device = |outcome| PickOutcome {
            device_selected: false,
            outcome,
        };

        if !self.scene.is_loaded(pick.model_id) {
            debug!(model = %pick.model_id, "Pick on a model that is not loaded");
            return Ok(not_device(SelectionOutcome::NoGeometry));
        }

        let data = self
            .scene
            .element_data(pick.model_id, &[pick.local_id])
            .await?
            .into_iter()
            .next();
        if !self.is_current(token) {
            return Ok(not_device(SelectionOutcome::Superseded));
        }
        self.events.publish(ViewerEvent::ElementPicked(PickPayload::from_element(
            pick.local_id,
            data.as_ref(),
        )));

        // The engine's attribute bag carries the GUID even while the registry
        // for a just-loaded model is still being built
        let guid = match data
            .as_ref()
            .and_then(|d| d.guid.as_deref())
            .map(str::trim)
            .filter(|g| !g.is_empty())
        {
            Some(guid) => Some(guid.to_string()),
            None => {
                self.registry
                    .wait_ready(self.config.selection.resolve_timeout())
                    .await;
                self.registry.guid_of(pick.model_id, pick.local_id).await
            }
        };
        let device = match &guid {
            Some(guid) => self.devices().await.device_by_guid(guid).cloned(),
            None => None,
        };
        if !self.is_current(token) {
            return Ok(not_device(SelectionOutcome::Superseded));
        }

        if let Some(device) = device {
            info!(device = %device.id, local_id = pick.local_id, "Pick resolved to device");
            let outcome = self.run_device_selection(token, vec![device]).await?;
            return Ok(PickOutcome {
                device_selected: true,
                outcome,
            });
        }

        debug!(model = %pick.model_id, local_id = pick.local_id, "Pick has no device");
        let targets: HighlightTargets = [(pick.model_id, BTreeSet::from([pick.local_id]))]
            .into_iter()
            .collect();
        if !self.highlight_guarded(token, targets).await? {
            return Ok(not_device(SelectionOutcome::Superseded));
        }

        let details = data.iter().map(detail_line).collect();
        self.events.publish(ViewerEvent::Selection {
            device_ids: Vec::new(),
            details,
        });
        Ok(not_device(SelectionOutcome::Committed { elements: 1 }))
    }

    /// Clear every highlight and restore all materials
    pub async fn reset(&self) -> Result<(), ViewerError> {
        let token = self.tokens.mint();
        debug!(token = token.value(), "Resetting selection");
        self.coordinator.reset_all().await?;
        if self.is_current(token) {
            self.events.publish(ViewerEvent::SelectionCleared);
        }
        Ok(())
    }

    /// Re-read the device mapping from the data collaborator.
    ///
    /// On failure the previous index stays in place and the error is returned.
    pub async fn refresh_mapping(&self) -> Result<usize, ViewerError> {
        if let Err(e) = self.data.trigger_refresh().await {
            warn!(error = %e, "Mapping refresh trigger failed, fetching current mapping");
        }
        let document = self.data.fetch_mapping().await?;
        let index = Arc::new(DeviceIndex::build(&document));
        let count = index.len();
        *self.index.write().await = index.clone();
        info!(devices = count, "Device mapping refreshed");

        let token = self.tokens.mint();
        self.coordinator.reset_all().await?;
        if self.is_current(token) {
            self.events.publish(ViewerEvent::SelectionCleared);
        }
        self.events
            .publish(ViewerEvent::DevicesUpdated(index.devices().to_vec()));
        Ok(count)
    }

    /// Frame a device's elements without touching the highlight
    pub async fn focus_device(&self, id: &str) -> Result<SelectionOutcome, ViewerError> {
        let Some(device) = self.devices().await.device_by_id(id).cloned() else {
            return Ok(SelectionOutcome::NotFound);
        };
        let token = self.tokens.mint();

        let resolution = self
            .registry
            .resolve(&device.element_guids, self.config.selection.resolve_timeout())
            .await;
        if !self.is_current(token) {
            return Ok(SelectionOutcome::Superseded);
        }
        if resolution.is_empty() {
            return Ok(SelectionOutcome::NoGeometry);
        }

        let bounds = self.bounds_of(&resolution.targets()).await;
        if !self.is_current(token) {
            return Ok(SelectionOutcome::Superseded);
        }
        self.move_camera(bounds);
        Ok(SelectionOutcome::Committed {
            elements: resolution.resolved.len(),
        })
    }

    /// Frame every loaded model
    pub async fn focus_model(&self) -> Result<SelectionOutcome, ViewerError> {
        let token = self.tokens.mint();
        let whole: HighlightTargets = self
            .scene
            .loaded_models()
            .into_iter()
            .map(|model| (model, Default::default()))
            .collect();
        if whole.is_empty() {
            return Ok(SelectionOutcome::NoGeometry);
        }

        let bounds = self.bounds_of(&whole).await;
        if !self.is_current(token) {
            return Ok(SelectionOutcome::Superseded);
        }
        self.move_camera(bounds);
        Ok(SelectionOutcome::Committed { elements: 0 })
    }

    async fn run_device_selection(
        &self,
        token: SessionToken,
        devices: Vec<Arc<Device>>,
    ) -> Result<SelectionOutcome, ViewerError> {
        let guids: Vec<String> = devices
            .iter()
            .flat_map(|d| d.element_guids.iter().cloned())
            .collect();

        let resolution = self
            .registry
            .resolve(&guids, self.config.selection.resolve_timeout())
            .await;
        if !self.is_current(token) {
            debug!(token = token.value(), "Selection superseded during resolution");
            return Ok(SelectionOutcome::Superseded);
        }
        if resolution.is_empty() {
            info!(guids = guids.len(), "Selected devices have no geometry in the loaded models");
            return Ok(SelectionOutcome::NoGeometry);
        }

        let targets = resolution.targets();
        if !self.highlight_guarded(token, targets.clone()).await? {
            return Ok(SelectionOutcome::Superseded);
        }

        let bounds = self.bounds_of(&targets).await;
        if !self.is_current(token) {
            return Ok(SelectionOutcome::Superseded);
        }
        self.move_camera(bounds);

        let details = self.detail_lines(&targets).await;
        if !self.is_current(token) {
            return Ok(SelectionOutcome::Superseded);
        }
        self.events.publish(ViewerEvent::Selection {
            device_ids: devices.iter().map(|d| d.id.clone()).collect(),
            details,
        });

        for device in &devices {
            if !self.fetch_telemetry(token, device).await {
                return Ok(SelectionOutcome::Superseded);
            }
        }

        Ok(SelectionOutcome::Committed {
            elements: resolution.resolved.len(),
        })
    }

    /// Queue a highlight that only runs if `token` is still current when its
    /// turn comes. Returns `false` if it was skipped or superseded meanwhile.
    async fn highlight_guarded(
        &self,
        token: SessionToken,
        targets: HighlightTargets,
    ) -> Result<bool, ViewerError> {
        let tokens = self.tokens.clone();
        let applied = self
            .coordinator
            .highlight_many_if(targets, move || tokens.is_current(token))
            .await??;
        Ok(applied && self.is_current(token))
    }

    async fn bounds_of(&self, targets: &HighlightTargets) -> Option<BoundingBox> {
        let mut boxes = Vec::new();
        for (model, ids) in targets {
            let ids: Vec<_> = ids.iter().copied().collect();
            match self.scene.bounding_box(*model, &ids).await {
                Ok(Some(bounds)) => boxes.push(bounds),
                Ok(None) => {}
                Err(e) => debug!(model = %model, error = %e, "No bounds for model"),
            }
        }
        BoundingBox::merge(boxes)
    }

    fn move_camera(&self, bounds: Option<BoundingBox>) {
        let Some(bounds) = bounds else {
            return;
        };
        let selection = &self.config.selection;
        let focus = CameraFocus::frame(&bounds, selection.fov_radians(), selection.padding);
        self.scene.fit_camera(focus);
    }

    async fn detail_lines(&self, targets: &HighlightTargets) -> Vec<String> {
        let mut lines = Vec::new();
        for (model, ids) in targets {
            let ids: Vec<_> = ids.iter().copied().collect();
            match self.scene.element_data(*model, &ids).await {
                Ok(data) => lines.extend(data.iter().map(detail_line)),
                Err(e) => debug!(model = %model, error = %e, "No element data"),
            }
        }
        lines
    }

    /// Fetch and publish telemetry. Returns `false` if superseded.
    async fn fetch_telemetry(&self, token: SessionToken, device: &Device) -> bool {
        if !self.is_current(token) {
            return false;
        }
        let query = TelemetryQuery {
            limit: self.config.telemetry.limit,
            hours: self.config.telemetry.hours,
            ..TelemetryQuery::default()
        };
        let result = self.data.fetch_telemetry(device, &query).await;
        if !self.is_current(token) {
            debug!(device = %device.id, "Dropping telemetry for superseded selection");
            return false;
        }

        let status = match result {
            Ok(response) if !response.is_empty() => TelemetryStatus::Loaded(response),
            Ok(_) => TelemetryStatus::unavailable(),
            Err(e) => {
                warn!(device = %device.id, error = %e, "Telemetry unavailable");
                TelemetryStatus::unavailable()
            }
        };
        self.events.publish(ViewerEvent::Telemetry {
            device_id: device.id.clone(),
            status,
        });
        true
    }
}

/// Device ids carried by a selection event, as plain strings
pub fn device_id_strings(ids: &[DeviceId]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
