//! BIM-Link Viewer - Selection and highlight coordination engine
//!
//! This crate links a loaded building model to the device mapping:
//! - Identity registry mapping element GUIDs to per-session local ids
//! - Material state cache for reversible dimming and highlighting
//! - Highlight coordinator serializing every scene mutation
//! - Selection session controller with token-based staleness
//! - Cross-frame message bridge and the HTTP data source
//!
//! The renderer is reached only through [`SceneEngine`]; [`MemoryScene`] is
//! an in-memory implementation for headless use.

pub mod bridge;
pub mod camera;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod events;
pub mod material;
pub mod memory;
pub mod registry;
pub mod scene;
pub mod session;

pub use bridge::{InboundMessage, MessageBridge, OutboundMessage};
pub use camera::{BoundingBox, CameraFocus};
pub use config::ViewerConfig;
pub use coordinator::{HighlightCoordinator, HighlightPhase, QueueError};
pub use data::{DataError, DataSource, HttpDataSource};
pub use error::ViewerError;
pub use events::{PickPayload, TelemetryStatus, ViewerEvent};
pub use memory::{ElementSpec, MemoryScene};
pub use registry::{IdentityRegistry, Resolution};
pub use scene::{PickResult, SceneEngine, SceneError};
pub use session::{PickOutcome, SelectionController, SelectionOutcome, SessionToken};
