//! Device types for sensors and actuators linked to model elements

use serde::{Deserialize, Serialize};

/// Unique identifier for a device, as keyed in the mapping document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Telemetry backend a device is wired to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorKind {
    /// Synthesized data, no backend involved
    Mock,
    /// ThingsBoard timeseries API
    ThingsBoard,
    /// Anything else the mapping names; kept verbatim
    Other(String),
}

impl ConnectorKind {
    pub fn parse(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "mock" => Self::Mock,
            "thingsboard" => Self::ThingsBoard,
            _ => Self::Other(kind.to_string()),
        }
    }
}

/// Connector description from the mapping document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    /// Connector type ("mock", "thingsboard", ...)
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Identifier of the device in the telemetry backend
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Telemetry key (or comma-separated keys) to fetch by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_key: Option<String>,
    /// Backend entity type (DEVICE or ASSET)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl Connector {
    pub fn kind(&self) -> ConnectorKind {
        ConnectorKind::parse(&self.kind)
    }
}

/// A device linked to one or more model elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    /// Device type (e.g. "temperature", "humidity")
    #[serde(rename = "type")]
    pub device_type: String,
    /// GUIDs of the model elements this device is mounted on, in document order
    pub element_guids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<Connector>,
}

impl Device {
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(id),
            device_type: device_type.into(),
            element_guids: Vec::new(),
            connector: None,
        }
    }

    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Default telemetry key: the connector's key, falling back to the device type
    pub fn telemetry_key(&self) -> Option<&str> {
        self.connector
            .as_ref()
            .and_then(|c| c.telemetry_key.as_deref())
            .filter(|k| !k.trim().is_empty())
            .or_else(|| Some(self.device_type.as_str()).filter(|t| !t.is_empty()))
    }

    /// Menu label, e.g. "DEV_1 (temperature)"
    pub fn label(&self) -> String {
        let kind = if self.device_type.is_empty() {
            "unknown"
        } else {
            &self.device_type
        };
        format!("{} ({})", self.id, kind)
    }
}
