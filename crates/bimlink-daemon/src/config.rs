//! Configuration loading and environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub thingsboard: ThingsBoardConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Path to the device/mapping document
    #[serde(default = "default_mapping_path")]
    pub path: String,
    /// Directory model files are served from; defaults to the mapping's directory
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: default_mapping_path(),
            dir: None,
        }
    }
}

fn default_mapping_path() -> String {
    "data/devices.ifc.json".to_string()
}

impl MappingConfig {
    pub fn model_dir(&self) -> PathBuf {
        match self.dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// ThingsBoard backend; values here take precedence over the mapping document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingsBoardConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ThingsBoardConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    #[serde(default = "default_origins")]
    pub origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_origins(),
        }
    }
}

fn default_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

impl Config {
    /// Apply `DEVICE_MAPPING_PATH`, `MAPPING_DIR`, `TB_BASE_URL`, `TB_API_KEY`
    /// and `CORS_ORIGINS` from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("DEVICE_MAPPING_PATH") {
            self.mapping.path = path;
        }
        if let Some(dir) = var("MAPPING_DIR") {
            self.mapping.dir = Some(dir);
        }
        if let Some(url) = var("TB_BASE_URL") {
            self.thingsboard.base_url = Some(url);
        }
        if let Some(key) = var("TB_API_KEY") {
            self.thingsboard.api_key = Some(key);
        }
        if let Some(origins) = var("CORS_ORIGINS") {
            self.cors.origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
    }
}

/// Load configuration from file, then apply the process environment
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };

    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.daemon.bind, "0.0.0.0:8000");
        assert_eq!(config.mapping.path, "data/devices.ifc.json");
        assert_eq!(config.mapping.model_dir(), PathBuf::from("data"));
        assert_eq!(config.thingsboard.timeout_secs, 10);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bimlink.toml");
        std::fs::write(
            &path,
            r#"
            [mapping]
            path = "/srv/bim/devices.ifc.json"

            [thingsboard]
            base_url = "https://tb.example.com"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.mapping.model_dir(), PathBuf::from("/srv/bim"));
        assert_eq!(
            config.thingsboard.base_url.as_deref(),
            Some("https://tb.example.com")
        );
        assert_eq!(config.daemon.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DEVICE_MAPPING_PATH", "mapping.json"),
            ("MAPPING_DIR", "/models"),
            ("TB_API_KEY", "secret"),
            ("TB_BASE_URL", ""),
            ("CORS_ORIGINS", "http://a, http://b,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.mapping.path, "mapping.json");
        assert_eq!(config.mapping.model_dir(), PathBuf::from("/models"));
        assert_eq!(config.thingsboard.api_key.as_deref(), Some("secret"));
        assert_eq!(config.thingsboard.base_url, None);
        assert_eq!(config.cors.origins, vec!["http://a", "http://b"]);
    }

    #[test]
    fn test_bare_filename_serves_from_cwd() {
        let mut config = Config::default();
        config.mapping.path = "devices.ifc.json".into();
        assert_eq!(config.mapping.model_dir(), PathBuf::from("."));
    }
}
