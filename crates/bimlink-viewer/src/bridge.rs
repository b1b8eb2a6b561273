//! Cross-frame message bridge
//!
//! The host page and the viewer exchange `type`-tagged JSON messages. Inbound
//! commands are decoded and handed to the [`SelectionController`]; controller
//! events are translated to outbound messages. The bridge is transport
//! agnostic: it reads and writes JSON text over channels.

use bimlink_core::Device;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ViewerError;
use crate::events::{PickPayload, ViewerEvent};
use crate::session::{device_id_strings, SelectionController};

/// Commands accepted from the host page
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    SelectDevice {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    SelectDevices {
        #[serde(rename = "deviceIds")]
        device_ids: Vec<String>,
    },
    ResetSelection,
    RefreshMapping,
    FocusDevice {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    FocusModel,
}

/// Menu entry for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub label: String,
}

impl From<&Device> for DeviceSummary {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.to_string(),
            device_type: device.device_type.clone(),
            label: device.label(),
        }
    }
}

/// Notifications sent to the host page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    ViewerSelection {
        /// First selected device; `null` for raw picks and cleared selections
        #[serde(rename = "deviceId")]
        device_id: Option<String>,
        #[serde(rename = "deviceIds")]
        device_ids: Vec<String>,
        details: Vec<String>,
    },
    DevicesUpdated {
        devices: Vec<DeviceSummary>,
    },
    ViewerReady,
    ViewerPick {
        payload: PickPayload,
    },
}

impl OutboundMessage {
    /// Outbound form of a controller event; `None` for events the host does
    /// not receive
    pub fn from_event(event: &ViewerEvent) -> Option<Self> {
        match event {
            ViewerEvent::ViewerReady => Some(Self::ViewerReady),
            ViewerEvent::ElementPicked(payload) => Some(Self::ViewerPick {
                payload: payload.clone(),
            }),
            ViewerEvent::Selection {
                device_ids,
                details,
            } => {
                let device_ids = device_id_strings(device_ids);
                Some(Self::ViewerSelection {
                    device_id: device_ids.first().cloned(),
                    device_ids,
                    details: details.clone(),
                })
            }
            ViewerEvent::SelectionCleared => Some(Self::ViewerSelection {
                device_id: None,
                device_ids: Vec::new(),
                details: Vec::new(),
            }),
            ViewerEvent::DevicesUpdated(devices) => Some(Self::DevicesUpdated {
                devices: devices.iter().map(|d| DeviceSummary::from(d.as_ref())).collect(),
            }),
            ViewerEvent::Telemetry { .. } => None,
        }
    }
}

pub struct MessageBridge {
    controller: Arc<SelectionController>,
}

impl MessageBridge {
    pub fn new(controller: Arc<SelectionController>) -> Self {
        Self { controller }
    }

    pub fn decode(text: &str) -> Result<InboundMessage, ViewerError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Run one command to completion
    pub async fn dispatch(&self, message: InboundMessage) -> Result<(), ViewerError> {
        dispatch(self.controller.clone(), message).await
    }

    /// Pump messages until the inbound side closes or the host goes away.
    ///
    /// Commands run concurrently so a newer command can supersede one that is
    /// still waiting; they are started in arrival order.
    pub async fn run(self, mut inbound: mpsc::Receiver<String>, outbound: mpsc::Sender<String>) {
        let mut events = self.controller.subscribe();
        let mut pending: FuturesUnordered<BoxFuture<'static, Result<(), ViewerError>>> =
            FuturesUnordered::new();

        info!("Message bridge started");

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(text) = message else {
                        break;
                    };
                    match Self::decode(&text) {
                        Ok(message) => {
                            debug!(?message, "Inbound message");
                            pending.push(dispatch(self.controller.clone(), message).boxed());
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed message"),
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            let Some(message) = OutboundMessage::from_event(&event) else {
                                continue;
                            };
                            match serde_json::to_string(&message) {
                                Ok(json) => {
                                    if outbound.send(json).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "Failed to encode outbound message"),
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Viewer event channel lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(result) = pending.next(), if !pending.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Command failed");
                    }
                }
            }
        }

        while let Some(result) = pending.next().await {
            if let Err(e) = result {
                warn!(error = %e, "Command failed");
            }
        }
        info!("Message bridge stopped");
    }
}

async fn dispatch(
    controller: Arc<SelectionController>,
    message: InboundMessage,
) -> Result<(), ViewerError> {
    match message {
        InboundMessage::SelectDevice { device_id } => {
            let outcome = controller.select_by_id(&device_id).await?;
            debug!(device = %device_id, ?outcome, "Selection finished");
        }
        InboundMessage::SelectDevices { device_ids } => {
            let outcome = controller.select_devices(&device_ids).await?;
            debug!(devices = device_ids.len(), ?outcome, "Selection finished");
        }
        InboundMessage::ResetSelection => controller.reset().await?,
        InboundMessage::RefreshMapping => {
            controller.refresh_mapping().await?;
        }
        InboundMessage::FocusDevice { device_id } => {
            controller.focus_device(&device_id).await?;
        }
        InboundMessage::FocusModel => {
            controller.focus_model().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewerConfig;
    use crate::data::testing::ScriptedSource;
    use crate::memory::{ElementSpec, MemoryScene};
    use serde_json::{json, Value};

    #[test]
    fn test_decode_inbound() {
        assert_eq!(
            MessageBridge::decode(r#"{"type":"selectDevice","deviceId":"DEV_1"}"#).unwrap(),
            InboundMessage::SelectDevice {
                device_id: "DEV_1".into()
            }
        );
        assert_eq!(
            MessageBridge::decode(r#"{"type":"selectDevices","deviceIds":["A","B"]}"#).unwrap(),
            InboundMessage::SelectDevices {
                device_ids: vec!["A".into(), "B".into()]
            }
        );
        assert_eq!(
            MessageBridge::decode(r#"{"type":"resetSelection"}"#).unwrap(),
            InboundMessage::ResetSelection
        );
        assert!(MessageBridge::decode(r#"{"type":"launchRockets"}"#).is_err());
    }

    #[test]
    fn test_encode_outbound() {
        let event = ViewerEvent::Selection {
            device_ids: vec!["DEV_1".into()],
            details: vec!["Sensor (IfcSensor) G1".into()],
        };
        let json = serde_json::to_value(OutboundMessage::from_event(&event).unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "viewerSelection",
                "deviceId": "DEV_1",
                "deviceIds": ["DEV_1"],
                "details": ["Sensor (IfcSensor) G1"]
            })
        );

        let ready = serde_json::to_value(OutboundMessage::ViewerReady).unwrap();
        assert_eq!(ready, json!({ "type": "viewerReady" }));
        assert!(OutboundMessage::from_event(&ViewerEvent::Telemetry {
            device_id: "DEV_1".into(),
            status: crate::events::TelemetryStatus::unavailable(),
        })
        .is_none());
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let scene = Arc::new(MemoryScene::new());
        let model = scene.load_model(vec![ElementSpec::new(5, "G1").with_name("Sensor")]);
        let source = Arc::new(ScriptedSource::with_mapping(
            r#"{ "devices": { "DEV_1": { "type": "temperature", "ifcGuids": ["G1"] } } }"#,
        ));
        let controller = Arc::new(SelectionController::new(
            scene,
            source,
            ViewerConfig::default(),
        ));
        controller.model_loaded(model).await.unwrap();

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let bridge = tokio::spawn(MessageBridge::new(controller).run(in_rx, out_tx));

        in_tx
            .send(r#"{"type":"refreshMapping"}"#.to_string())
            .await
            .unwrap();
        let mut updated = None;
        while updated.is_none() {
            let msg: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
            if msg["type"] == "devicesUpdated" {
                updated = Some(msg);
            }
        }
        assert_eq!(updated.unwrap()["devices"][0]["label"], "DEV_1 (temperature)");

        in_tx.send("not json".to_string()).await.unwrap();
        in_tx
            .send(r#"{"type":"selectDevice","deviceId":"DEV_1"}"#.to_string())
            .await
            .unwrap();
        let selection = loop {
            let msg: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
            if msg["type"] == "viewerSelection" && msg["deviceId"] == "DEV_1" {
                break msg;
            }
        };
        assert_eq!(selection["details"][0], "Sensor (Unknown) G1");

        drop(in_tx);
        bridge.await.unwrap();
    }
}
