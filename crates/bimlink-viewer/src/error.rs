//! Error types for the viewer engine

use thiserror::Error;

use crate::coordinator::QueueError;
use crate::data::DataError;
use crate::scene::SceneError;

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ConfigError(#[from] toml::de::Error),
    #[error("Data source error: {0}")]
    Data(#[from] DataError),
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),
    #[error("Highlight queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Malformed message: {0}")]
    Message(#[from] serde_json::Error),
}
