//! Geometry identity registry for the loaded models
//!
//! Holds one [`IdentityMap`] snapshot per loaded model. Maps are replaced
//! wholesale on reload, never edited, so a reader holding an `Arc` keeps a
//! consistent view.

use bimlink_core::{ElementRef, IdentityMap, LocalId, ModelId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::scene::{HighlightTargets, SceneEngine, SceneError};

/// Outcome of resolving a list of GUIDs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// GUID and element, in request order
    pub resolved: Vec<(String, ElementRef)>,
    /// GUIDs with no geometry in any loaded model
    pub missing: Vec<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn targets(&self) -> HighlightTargets {
        let mut targets = HighlightTargets::new();
        for (_, element) in &self.resolved {
            targets
                .entry(element.model)
                .or_default()
                .insert(element.local_id);
        }
        targets
    }
}

pub struct IdentityRegistry {
    maps: RwLock<BTreeMap<ModelId, Arc<IdentityMap>>>,
    generation: AtomicU64,
    /// Number of registered models
    ready: watch::Sender<usize>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityRegistry {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(0);
        Self {
            maps: RwLock::new(BTreeMap::new()),
            generation: AtomicU64::new(0),
            ready,
        }
    }

    /// Build (or rebuild) the map for a freshly loaded model
    pub async fn build(
        &self,
        scene: &dyn SceneEngine,
        model: ModelId,
    ) -> Result<Arc<IdentityMap>, SceneError> {
        let elements = scene.list_elements(model).await?;
        let total = elements.len();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let map = Arc::new(IdentityMap::build(model, generation, elements));

        info!(
            model = %model,
            generation,
            elements = total,
            mapped = map.len(),
            "Built geometry identity map"
        );

        let count = {
            let mut maps = self.maps.write().await;
            maps.insert(model, map.clone());
            maps.len()
        };
        self.ready.send_replace(count);
        Ok(map)
    }

    /// Drop a model's map; later lookups against it return nothing
    pub async fn remove(&self, model: ModelId) -> bool {
        let (removed, count) = {
            let mut maps = self.maps.write().await;
            let removed = maps.remove(&model).is_some();
            (removed, maps.len())
        };
        self.ready.send_replace(count);
        removed
    }

    pub async fn map(&self, model: ModelId) -> Option<Arc<IdentityMap>> {
        self.maps.read().await.get(&model).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Arc<IdentityMap>> {
        self.maps.read().await.values().cloned().collect()
    }

    /// First loaded model containing the GUID
    pub async fn lookup(&self, guid: &str) -> Option<ElementRef> {
        self.maps
            .read()
            .await
            .values()
            .find_map(|map| map.element(guid))
    }

    pub async fn guid_of(&self, model: ModelId, local_id: LocalId) -> Option<String> {
        let map = self.map(model).await?;
        map.guid_of(local_id).map(str::to_string)
    }

    /// Wait until at least one model is registered. `false` on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|count| *count > 0)).await;
        matches!(outcome, Ok(Ok(_)))
    }

    /// Resolve GUIDs against every loaded model.
    ///
    /// Waits for model load (bounded by `timeout`); unresolvable GUIDs are
    /// reported in [`Resolution::missing`] rather than failing the call.
    pub async fn resolve(&self, guids: &[String], timeout: Duration) -> Resolution {
        if !self.wait_ready(timeout).await {
            debug!(guids = guids.len(), "No model loaded, nothing to resolve");
            return Resolution {
                resolved: Vec::new(),
                missing: guids.to_vec(),
            };
        }

        let maps = self.snapshot().await;
        let mut resolution = Resolution::default();
        for guid in guids {
            match maps.iter().find_map(|map| map.element(guid)) {
                Some(element) => {
                    if !resolution.resolved.iter().any(|(_, e)| *e == element) {
                        resolution.resolved.push((guid.clone(), element));
                    }
                }
                None => resolution.missing.push(guid.clone()),
            }
        }

        if !resolution.missing.is_empty() {
            debug!(
                resolved = resolution.resolved.len(),
                missing = resolution.missing.len(),
                "Some GUIDs have no geometry in the loaded models"
            );
        }
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ElementSpec, MemoryScene};

    #[tokio::test]
    async fn test_resolve_partial() {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![ElementSpec::new(5, "G1"), ElementSpec::new(6, "G3")]);
        let registry = IdentityRegistry::new();
        registry.build(&scene, model).await.unwrap();

        let resolution = registry
            .resolve(&["G1".to_string(), "G2".to_string()], Duration::from_secs(1))
            .await;
        assert_eq!(resolution.resolved.len(), 1);
        assert_eq!(resolution.resolved[0].1.local_id, 5);
        assert_eq!(resolution.missing, vec!["G2".to_string()]);
        assert_eq!(resolution.targets()[&model].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_times_out_without_model() {
        let registry = IdentityRegistry::new();
        let resolution = registry
            .resolve(&["G1".to_string()], Duration::from_millis(50))
            .await;
        assert!(resolution.is_empty());
        assert_eq!(resolution.missing.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_waits_for_load() {
        let scene = Arc::new(MemoryScene::new());
        let model = scene.load_model(vec![ElementSpec::new(1, "G1")]);
        let registry = Arc::new(IdentityRegistry::new());

        let waiting = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .resolve(&["G1".to_string()], Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.build(scene.as_ref(), model).await.unwrap();

        let resolution = waiting.await.unwrap();
        assert_eq!(resolution.resolved.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready() {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![ElementSpec::new(1, "G1")]);
        let registry = IdentityRegistry::new();

        assert!(!registry.wait_ready(Duration::from_millis(20)).await);
        registry.build(&scene, model).await.unwrap();
        assert!(registry.wait_ready(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_rebuild_invalidates_old_references() {
        let scene = MemoryScene::new();
        let model = scene.load_model(vec![ElementSpec::new(1, "G1")]);
        let registry = IdentityRegistry::new();

        let first = registry.build(&scene, model).await.unwrap();
        let stale = first.element("G1").unwrap();
        let second = registry.build(&scene, model).await.unwrap();

        assert!(second.generation() > first.generation());
        assert_eq!(second.guid_of_ref(&stale), None);
        assert_eq!(registry.guid_of(model, 1).await.as_deref(), Some("G1"));

        assert!(registry.remove(model).await);
        assert_eq!(registry.lookup("G1").await, None);
    }
}
