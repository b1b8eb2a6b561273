//! Device/mapping document and the device-link index derived from it
//!
//! The mapping document (`devices.ifc.json`) is the authority for which
//! devices exist and which model elements they are mounted on:
//!
//! ```json
//! {
//!   "devices": { "DEV_1": { "type": "temperature", "ifcGuids": ["G1"], "connector": { "type": "mock" } } },
//!   "model": { "file": "building.ifc" },
//!   "backend": { "middlewareUrl": "http://localhost:8000" }
//! }
//! ```
//!
//! [`DeviceIndex`] is a derived, read-only view of the device table. It is
//! rebuilt wholesale on every refresh and shared as an `Arc` snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::device::{Connector, Device, DeviceId};

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// `model` section of the mapping document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Model filename, served by the middleware under `/model/{file}`
    #[serde(default)]
    pub file: Option<String>,
}

/// ThingsBoard settings embedded in the mapping document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingsBoardSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// `backend` section of the mapping document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSection {
    #[serde(default)]
    pub middleware_url: Option<String>,
    #[serde(default)]
    pub thingsboard: Option<ThingsBoardSection>,
}

/// The device/mapping document.
///
/// Devices are kept as raw JSON so one malformed entry cannot fail the whole
/// document; they are validated per entry by [`DeviceIndex::build`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub devices: Map<String, Value>,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub backend: BackendSection,
    /// Sections this crate does not interpret, preserved for re-serving
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-device shape inside `devices`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    #[serde(rename = "type", default)]
    device_type: Option<String>,
    #[serde(default)]
    ifc_guids: Vec<String>,
    #[serde(default)]
    connector: Option<Connector>,
}

impl MappingDocument {
    pub fn from_json(content: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, MappingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Raw entry for one device, if present
    pub fn raw_device(&self, id: &str) -> Option<&Value> {
        self.devices.get(id)
    }

    /// Parse a single device entry; `None` if it is malformed
    pub fn parse_device(id: &str, value: &Value) -> Option<Device> {
        match serde_json::from_value::<RawDevice>(value.clone()) {
            Ok(raw) => Some(Device {
                id: DeviceId::new(id),
                device_type: raw.device_type.unwrap_or_default(),
                element_guids: raw
                    .ifc_guids
                    .into_iter()
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect(),
                connector: raw.connector,
            }),
            Err(e) => {
                warn!(device = %id, error = %e, "Skipping malformed device entry");
                None
            }
        }
    }
}

/// Device-link index: device id -> device, GUID -> owning device
#[derive(Debug, Clone, Default)]
pub struct DeviceIndex {
    devices: Vec<Arc<Device>>,
    by_id: HashMap<DeviceId, usize>,
    by_guid: HashMap<String, usize>,
}

impl DeviceIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a mapping document, skipping malformed device entries
    pub fn build(document: &MappingDocument) -> Self {
        let devices = document
            .devices
            .iter()
            .filter_map(|(id, value)| MappingDocument::parse_device(id, value));
        Self::from_devices(devices)
    }

    /// Build from already-parsed devices, in order.
    ///
    /// The first device claiming a GUID owns it; later claims are ignored.
    pub fn from_devices<I>(devices: I) -> Self
    where
        I: IntoIterator<Item = Device>,
    {
        let mut index = Self::new();

        for device in devices {
            if index.by_id.contains_key(&device.id) {
                warn!(device = %device.id, "Duplicate device id, keeping first");
                continue;
            }
            let slot = index.devices.len();
            for guid in &device.element_guids {
                match index.by_guid.get(guid) {
                    Some(&owner) => {
                        debug!(
                            guid = %guid,
                            owner = %index.devices[owner].id,
                            ignored = %device.id,
                            "GUID already claimed by another device"
                        );
                    }
                    None => {
                        index.by_guid.insert(guid.clone(), slot);
                    }
                }
            }
            index.by_id.insert(device.id.clone(), slot);
            index.devices.push(Arc::new(device));
        }

        index
    }

    /// All devices in document order
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device_by_id(&self, id: &str) -> Option<&Arc<Device>> {
        self.by_id
            .get(&DeviceId::from(id))
            .map(|&slot| &self.devices[slot])
    }

    pub fn device_by_guid(&self, guid: &str) -> Option<&Arc<Device>> {
        self.by_guid.get(guid.trim()).map(|&slot| &self.devices[slot])
    }

    pub fn element_guids_for_device(&self, id: &str) -> Option<&[String]> {
        self.device_by_id(id).map(|d| d.element_guids.as_slice())
    }
}
