//! Notifications published to the UI collaborator
//!
//! Events go out on a `tokio::sync::broadcast` channel. Every subscriber sees
//! every event published after it subscribed; a lagging subscriber loses the
//! oldest events, never the selection controller's progress.

use bimlink_core::{Device, DeviceId, LocalId, TelemetryResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::scene::ElementData;

/// Inline message shown in place of a chart
pub const NO_TELEMETRY: &str = "No telemetry data available";

const EVENT_CAPACITY: usize = 64;

/// Attributes of a picked element, as shown in the pick log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PickPayload {
    #[serde(rename = "expressID")]
    pub local_id: LocalId,
    #[serde(default)]
    pub guid: String,
    #[serde(rename = "ifcType", default)]
    pub ifc_type: String,
    #[serde(default)]
    pub name: String,
}

impl PickPayload {
    pub fn from_element(local_id: LocalId, data: Option<&ElementData>) -> Self {
        let Some(data) = data else {
            return Self {
                local_id,
                ..Self::default()
            };
        };
        Self {
            local_id,
            guid: data.guid.clone().unwrap_or_default(),
            ifc_type: data.category.clone().unwrap_or_default(),
            name: data.name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryStatus {
    Loaded(TelemetryResponse),
    /// Nothing to chart; carries the inline message
    Unavailable(String),
}

impl TelemetryStatus {
    pub fn unavailable() -> Self {
        Self::Unavailable(NO_TELEMETRY.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// First model is loaded and queryable
    ViewerReady,
    ElementPicked(PickPayload),
    /// Committed selection; `device_ids` is empty for a raw element pick
    Selection {
        device_ids: Vec<DeviceId>,
        details: Vec<String>,
    },
    SelectionCleared,
    DevicesUpdated(Vec<Arc<Device>>),
    Telemetry {
        device_id: DeviceId,
        status: TelemetryStatus,
    },
}

/// Fan-out of [`ViewerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ViewerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; without subscribers the event is dropped
    pub fn publish(&self, event: ViewerEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_payload_wire_names() {
        let data = ElementData {
            local_id: 5,
            guid: Some("G1".into()),
            category: Some("IfcSensor".into()),
            name: None,
        };
        let payload = PickPayload::from_element(5, Some(&data));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["expressID"], 5);
        assert_eq!(json["ifcType"], "IfcSensor");
        assert_eq!(json["name"], "");
    }

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = EventBus::new();
        bus.publish(ViewerEvent::ViewerReady);

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(ViewerEvent::SelectionCleared);

        assert_eq!(a.recv().await.unwrap(), ViewerEvent::SelectionCleared);
        assert_eq!(b.recv().await.unwrap(), ViewerEvent::SelectionCleared);
    }
}
