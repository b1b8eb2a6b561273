//! Application state management

use anyhow::{Context, Result};
use bimlink_core::{MappingDocument, MappingError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::telemetry::TelemetryService;

#[derive(Error, Debug)]
pub enum ModelPathError {
    #[error("Missing model filename.")]
    Missing,
    #[error("Invalid model filename.")]
    Invalid,
    #[error("Model not found: {0}")]
    NotFound(String),
}

/// Shared application state
pub struct AppState {
    /// Mapping document, `None` until the first successful refresh
    mapping: RwLock<Option<Arc<MappingDocument>>>,
    /// Telemetry proxy
    pub telemetry: TelemetryService,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create new application state and try an initial mapping load
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let telemetry = TelemetryService::new(config.thingsboard.clone())
            .context("Failed to create HTTP client")?;

        let state = Arc::new(Self {
            mapping: RwLock::new(None),
            telemetry,
            config,
        });

        match state.refresh_mapping().await {
            Ok(mapping) => info!(devices = mapping.device_count(), "Initial mapping loaded"),
            Err(e) => warn!(
                path = %state.config.mapping.path,
                error = %e,
                "Initial mapping load failed; waiting for POST /refresh_mapping"
            ),
        }
        Ok(state)
    }

    /// Cached mapping document
    pub async fn mapping(&self) -> Option<Arc<MappingDocument>> {
        self.mapping.read().await.clone()
    }

    /// Re-read the mapping file; the cache is replaced only on success
    pub async fn refresh_mapping(&self) -> Result<Arc<MappingDocument>, MappingError> {
        let path = Path::new(&self.config.mapping.path);
        let document = Arc::new(MappingDocument::from_file(path)?);
        *self.mapping.write().await = Some(document.clone());
        info!(
            path = %path.display(),
            devices = document.device_count(),
            "Mapping refreshed"
        );
        Ok(document)
    }

    pub fn model_dir(&self) -> PathBuf {
        self.config.mapping.model_dir()
    }

    /// Resolve a model filename inside the model directory.
    ///
    /// Only the final path component of `filename` is used.
    pub fn resolve_model_path(&self, filename: &str) -> Result<PathBuf, ModelPathError> {
        let safe_name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or(if filename.trim().is_empty() {
                ModelPathError::Missing
            } else {
                ModelPathError::Invalid
            })?;

        let dir = self.model_dir();
        let path = dir.join(safe_name);
        if !path.is_file() {
            return Err(ModelPathError::NotFound(safe_name.to_string()));
        }

        let canonical_dir = dir.canonicalize().map_err(|_| ModelPathError::Invalid)?;
        let canonical = path.canonicalize().map_err(|_| ModelPathError::Invalid)?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(ModelPathError::Invalid);
        }
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state_in(dir: &Path) -> Arc<AppState> {
        let mut config = Config::default();
        config.mapping.path = dir.join("devices.ifc.json").display().to_string();
        AppState::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_mapping_starts_empty_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path()).await;
        assert!(state.mapping().await.is_none());
        assert!(state.refresh_mapping().await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.ifc.json");
        std::fs::write(&path, r#"{"devices":{"DEV_1":{"type":"t"}}}"#).unwrap();
        let state = state_in(dir.path()).await;
        assert_eq!(state.mapping().await.unwrap().device_count(), 1);

        std::fs::write(&path, "{ broken").unwrap();
        assert!(state.refresh_mapping().await.is_err());
        assert_eq!(state.mapping().await.unwrap().device_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_model_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("building.ifc"), b"ISO-10303-21;").unwrap();
        let state = state_in(dir.path()).await;

        assert!(state.resolve_model_path("building.ifc").is_ok());
        assert!(state.resolve_model_path("../../building.ifc").is_ok());
        assert!(matches!(
            state.resolve_model_path("missing.ifc"),
            Err(ModelPathError::NotFound(name)) if name == "missing.ifc"
        ));
        assert!(matches!(
            state.resolve_model_path(".."),
            Err(ModelPathError::Invalid)
        ));
        assert!(matches!(
            state.resolve_model_path(""),
            Err(ModelPathError::Missing)
        ));
    }
}
