//! Viewer configuration

use bimlink_core::telemetry::{DEFAULT_HOURS, DEFAULT_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ViewerError;
use crate::scene::Rgb;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default)]
    pub highlight: HighlightConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub telemetry: TelemetryDefaults,
    #[serde(default)]
    pub data: DataSourceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightConfig {
    /// Opacity of everything that is not highlighted
    #[serde(default = "default_dim_opacity")]
    pub dim_opacity: f32,
    #[serde(default = "default_dim_color")]
    pub dim_color: Rgb,
    #[serde(default = "default_highlight_color")]
    pub highlight_color: Rgb,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            dim_opacity: default_dim_opacity(),
            dim_color: default_dim_color(),
            highlight_color: default_highlight_color(),
        }
    }
}

fn default_dim_opacity() -> f32 {
    0.5
}

fn default_dim_color() -> Rgb {
    [0.5, 0.5, 0.5]
}

fn default_highlight_color() -> Rgb {
    [0.0, 0.6, 1.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// How long a selection waits for the first model to load
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Camera field of view in degrees, used to frame selections
    #[serde(default = "default_fov_degrees")]
    pub fov_degrees: f32,
    /// Extra distance factor around framed bounds
    #[serde(default = "default_padding")]
    pub padding: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: default_resolve_timeout_ms(),
            fov_degrees: default_fov_degrees(),
            padding: default_padding(),
        }
    }
}

impl SelectionConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn fov_radians(&self) -> f32 {
        self.fov_degrees.to_radians()
    }
}

fn default_resolve_timeout_ms() -> u64 {
    5000
}

fn default_fov_degrees() -> f32 {
    60.0
}

fn default_padding() -> f32 {
    1.2
}

/// Query parameters for the telemetry shown after a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDefaults {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_hours")]
    pub hours: u32,
}

impl Default for TelemetryDefaults {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            hours: default_hours(),
        }
    }
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_hours() -> u32 {
    DEFAULT_HOURS
}

/// Where the middleware daemon lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl ViewerConfig {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        if !path.exists() {
            info!("Viewer config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ViewerError> {
        let mut config: ViewerConfig = toml::from_str(content)?;
        config.highlight.dim_opacity = config.highlight.dim_opacity.clamp(0.0, 1.0);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.highlight.dim_opacity, 0.5);
        assert_eq!(config.highlight.dim_color, [0.5, 0.5, 0.5]);
        assert_eq!(config.selection.resolve_timeout(), Duration::from_secs(5));
        assert_eq!(config.telemetry.limit, 24);
    }

    #[test]
    fn test_partial_toml() {
        let config = ViewerConfig::from_toml(
            r#"
            [highlight]
            dim_opacity = 1.7
            highlight_color = [1.0, 0.0, 0.0]

            [data]
            base_url = "http://middleware:8000"
            "#,
        )
        .unwrap();

        assert_eq!(config.highlight.dim_opacity, 1.0);
        assert_eq!(config.highlight.highlight_color, [1.0, 0.0, 0.0]);
        assert_eq!(config.highlight.dim_color, [0.5, 0.5, 0.5]);
        assert_eq!(config.data.base_url, "http://middleware:8000");
        assert_eq!(config.telemetry.hours, 24);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join("viewer.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }
}
