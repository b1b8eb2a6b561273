//! BIM-Link Core - Core types, element identity, and device mapping
//!
//! This crate provides the foundational types for the BIM-Link system:
//! - Device and connector types parsed from the device/mapping document
//! - Geometry identity maps (GUID <-> per-session local id) for loaded models
//! - The device-link index (device -> GUIDs and GUID -> owning device)
//! - Telemetry point types and query parameter parsing

pub mod device;
pub mod identity;
pub mod mapping;
pub mod telemetry;

pub use device::{Connector, ConnectorKind, Device, DeviceId};
pub use identity::{ElementIdentity, ElementRef, IdentityMap, LocalId, ModelId};
pub use mapping::{DeviceIndex, MappingDocument, MappingError};
pub use telemetry::{
    parse_interval_ms, TelemetryError, TelemetryPoint, TelemetryQuery, TelemetryResponse,
    TelemetryValue, TelemetryWindow,
};
