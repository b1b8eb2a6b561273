//! Highlight coordinator
//!
//! Owns the only write path into scene materials and the highlight overlay.
//! All mutations run on a single worker task that drains a FIFO queue, so at
//! most one highlight cycle touches the scene at a time. The queue does not
//! look at what a task is for: stale work is filtered by whoever submits it.
//!
//! One highlight cycle moves through `Idle -> Dimming -> Highlighting ->
//! Restoring -> Idle`. The highlight primitive applies one opacity to its
//! whole target set, so targets are first dimmed with everything else and
//! then forced back to full opacity.

use bimlink_core::{LocalId, ModelId};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::config::HighlightConfig;
use crate::material::{Elements, MaterialStateCache};
use crate::scene::{target_count, HighlightStyle, HighlightTargets, SceneEngine, SceneError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Highlight queue is closed")]
    Closed,
    #[error("Exclusive task panicked")]
    TaskPanicked,
}

/// Where the current highlight cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighlightPhase {
    #[default]
    Idle,
    Dimming,
    Highlighting,
    Restoring,
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Scene mutations. Only ever invoked from inside an exclusive task.
#[derive(Clone)]
pub struct Highlighter {
    scene: Arc<dyn SceneEngine>,
    cache: Arc<Mutex<MaterialStateCache>>,
    phase: Arc<watch::Sender<HighlightPhase>>,
    config: HighlightConfig,
}

impl Highlighter {
    fn set_phase(&self, phase: HighlightPhase) {
        self.phase.send_replace(phase);
    }

    fn dim_style(&self) -> HighlightStyle {
        HighlightStyle {
            color: self.config.dim_color,
            opacity: self.config.dim_opacity,
            transparent: true,
        }
    }

    fn target_style(&self) -> HighlightStyle {
        HighlightStyle {
            color: self.config.highlight_color,
            opacity: 1.0,
            transparent: false,
        }
    }

    /// Dim every loaded model, color `targets`, force `targets` opaque.
    ///
    /// Targets in models that are not loaded are dropped; with nothing left
    /// the call is a no-op.
    pub async fn highlight(&self, targets: &HighlightTargets) -> Result<(), SceneError> {
        let loaded = self.scene.loaded_models();
        let targets: HighlightTargets = targets
            .iter()
            .filter(|(model, ids)| !ids.is_empty() && loaded.contains(model))
            .map(|(model, ids)| (*model, ids.clone()))
            .collect();
        if targets.is_empty() {
            debug!("No loaded geometry to highlight");
            return Ok(());
        }

        let mut cache = self.cache.lock().await;
        let result = self.run_cycle(&mut cache, &loaded, &targets).await;
        self.set_phase(HighlightPhase::Idle);

        match &result {
            Ok(()) => debug!(elements = target_count(&targets), "Highlight applied"),
            Err(e) => warn!(error = %e, "Highlight cycle failed"),
        }
        result
    }

    async fn run_cycle(
        &self,
        cache: &mut MaterialStateCache,
        loaded: &[ModelId],
        targets: &HighlightTargets,
    ) -> Result<(), SceneError> {
        let scene = self.scene.as_ref();

        self.set_phase(HighlightPhase::Dimming);
        scene.clear_highlight().await?;
        let mut everything = HighlightTargets::new();
        for model in loaded {
            cache.dim(scene, *model, Elements::All, self.config.dim_opacity);
            let ids: BTreeSet<LocalId> = scene
                .primitives(*model)
                .into_iter()
                .map(|p| p.element_id)
                .collect();
            everything.insert(*model, ids);
        }
        scene.apply_highlight(&self.dim_style(), &everything).await?;

        self.set_phase(HighlightPhase::Highlighting);
        scene.apply_highlight(&self.target_style(), targets).await?;

        self.set_phase(HighlightPhase::Restoring);
        for (model, ids) in targets {
            cache.highlight_full(scene, *model, Elements::Only(ids));
        }

        scene.force_update().await
    }

    /// Clear the overlay and restore every cached material
    pub async fn reset_all(&self) -> Result<(), SceneError> {
        if self.scene.loaded_models().is_empty() {
            debug!("Reset with no model loaded");
            return Ok(());
        }

        let mut cache = self.cache.lock().await;
        let scene = self.scene.as_ref();
        scene.clear_highlight().await?;
        let mut restored = 0;
        for model in cache.models() {
            restored += cache.restore_all(scene, model);
        }
        scene.force_update().await?;
        debug!(materials = restored, "Selection reset");
        Ok(())
    }

    /// Drop the cached snapshots of an unloaded model
    pub async fn forget_model(&self, model: ModelId) -> usize {
        self.cache.lock().await.forget_model(model)
    }
}

/// FIFO queue of scene mutations plus the mutations themselves
pub struct HighlightCoordinator {
    queue: mpsc::UnboundedSender<Job>,
    highlighter: Highlighter,
    phase: watch::Receiver<HighlightPhase>,
}

impl HighlightCoordinator {
    /// Create the coordinator and spawn its worker. Must be called inside a
    /// Tokio runtime.
    pub fn new(scene: Arc<dyn SceneEngine>, config: HighlightConfig) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(HighlightPhase::Idle);

        tokio::spawn(drain(jobs));

        Self {
            queue,
            highlighter: Highlighter {
                scene,
                cache: Arc::new(Mutex::new(MaterialStateCache::new())),
                phase: Arc::new(phase_tx),
                config,
            },
            phase,
        }
    }

    /// Handle for building exclusive tasks
    pub fn highlighter(&self) -> Highlighter {
        self.highlighter.clone()
    }

    pub fn phase(&self) -> HighlightPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<HighlightPhase> {
        self.phase.clone()
    }

    /// Queue `task` behind everything submitted so far.
    ///
    /// The task is enqueued when this method is called, not when the returned
    /// future is first polled. A panic inside the task is contained by the
    /// worker and reported as [`QueueError::TaskPanicked`]; errors returned by
    /// the task travel back to the caller untouched.
    pub fn run_exclusive<F, Fut, T>(
        &self,
        task: F,
    ) -> impl Future<Output = Result<T, QueueError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let output = task().await;
                let _ = tx.send(output);
            }
            .boxed()
        });
        let submitted = self.queue.send(job).map_err(|_| QueueError::Closed);

        async move {
            submitted?;
            rx.await.map_err(|_| QueueError::TaskPanicked)
        }
    }

    pub fn highlight_elements(
        &self,
        model: ModelId,
        element_ids: BTreeSet<LocalId>,
    ) -> impl Future<Output = Result<(), QueueError>> + Send + 'static {
        let targets: HighlightTargets = [(model, element_ids)].into_iter().collect();
        self.highlight_many(targets)
    }

    /// Highlight elements across several models in one cycle
    pub fn highlight_many(
        &self,
        targets: HighlightTargets,
    ) -> impl Future<Output = Result<(), QueueError>> + Send + 'static {
        let done = self.highlight_many_if(targets, || true);
        async move {
            // Scene failures were already logged by the highlighter
            let _ = done.await?;
            Ok(())
        }
    }

    /// Like [`Self::highlight_many`], but `guard` is checked when the cycle's
    /// turn comes and the cycle is skipped if it returns `false`.
    ///
    /// Resolves to `Ok(Ok(true))` when the highlight was applied.
    pub fn highlight_many_if<G>(
        &self,
        targets: HighlightTargets,
        guard: G,
    ) -> impl Future<Output = Result<Result<bool, SceneError>, QueueError>> + Send + 'static
    where
        G: FnOnce() -> bool + Send + 'static,
    {
        let highlighter = self.highlighter();
        self.run_exclusive(move || async move {
            if !guard() {
                debug!(models = targets.len(), "Highlight skipped");
                return Ok(false);
            }
            highlighter.highlight(&targets).await.map(|()| true)
        })
    }

    pub fn reset_all(&self) -> impl Future<Output = Result<(), QueueError>> + Send + 'static {
        let highlighter = self.highlighter();
        let done = self.run_exclusive(move || async move { highlighter.reset_all().await });
        async move {
            if let Err(e) = done.await? {
                warn!(error = %e, "Reset failed");
            }
            Ok(())
        }
    }

    pub fn forget_model(
        &self,
        model: ModelId,
    ) -> impl Future<Output = Result<usize, QueueError>> + Send + 'static {
        let highlighter = self.highlighter();
        self.run_exclusive(move || async move { highlighter.forget_model(model).await })
    }
}

/// Worker loop: one job at a time, in submission order
async fn drain(mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
            warn!("Exclusive task panicked; continuing with next task");
        }
    }
    debug!("Highlight queue closed");
}
