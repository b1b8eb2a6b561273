//! Data collaborator seam
//!
//! [`DataSource`] is everything the engine asks of the middleware: the device
//! mapping, a refresh trigger and per-device telemetry. [`HttpDataSource`]
//! talks to the `bimlink` daemon over HTTP.

use async_trait::async_trait;
use bimlink_core::{Device, MappingDocument, MappingError, TelemetryQuery, TelemetryResponse};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DataSourceConfig;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
    #[error("Data source unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid data source URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Current device/mapping document
    async fn fetch_mapping(&self) -> Result<MappingDocument, DataError>;

    /// Ask the collaborator to re-read its mapping source. Returns the new
    /// device count when known.
    async fn trigger_refresh(&self) -> Result<Option<usize>, DataError>;

    async fn fetch_telemetry(
        &self,
        device: &Device,
        query: &TelemetryQuery,
    ) -> Result<TelemetryResponse, DataError>;
}

/// Client for the middleware daemon
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshReply {
    #[serde(default)]
    device_count: Option<usize>,
}

impl HttpDataSource {
    pub fn new(config: &DataSourceConfig) -> Result<Self, DataError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|e| DataError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DataError::InvalidUrl {
                url: config.base_url.clone(),
                reason: "not a base URL".into(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Endpoint below the base URL; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url, DataError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DataError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a base URL".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response, DataError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(DataError::Status {
                url: response.url().to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_mapping(&self) -> Result<MappingDocument, DataError> {
        let url = self.url(&["devices.ifc.json"])?;
        debug!(url = %url, "Fetching device mapping");
        let response = Self::check(self.client.get(url).send().await?)?;
        let document: MappingDocument = response.json().await?;
        info!(devices = document.device_count(), "Fetched device mapping");
        Ok(document)
    }

    async fn trigger_refresh(&self) -> Result<Option<usize>, DataError> {
        let url = self.url(&["refresh_mapping"])?;
        let response = Self::check(self.client.post(url).send().await?)?;
        let reply: RefreshReply = response.json().await?;
        Ok(reply.device_count)
    }

    async fn fetch_telemetry(
        &self,
        device: &Device,
        query: &TelemetryQuery,
    ) -> Result<TelemetryResponse, DataError> {
        let url = self.url(&["devices", device.id.as_str(), "telemetry"])?;
        let response = self.client.get(url).query(query).send().await?;
        let response = match Self::check(response) {
            Ok(response) => response,
            Err(e) => {
                warn!(device = %device.id, error = %e, "Telemetry request rejected");
                return Err(e);
            }
        };
        Ok(response.json().await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted data source for engine tests

    use super::*;
    use bimlink_core::TelemetryPoint;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedSource {
        pub mapping: Mutex<Option<String>>,
        pub telemetry: Mutex<HashMap<String, Vec<TelemetryPoint>>>,
        pub telemetry_delay: Mutex<Duration>,
        pub telemetry_calls: AtomicUsize,
        pub refreshes: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn with_mapping(json: &str) -> Self {
            let source = Self::default();
            source.set_mapping(Some(json));
            source
        }

        pub fn set_mapping(&self, json: Option<&str>) {
            *self.mapping.lock().unwrap() = json.map(str::to_string);
        }

        pub fn set_telemetry(&self, device: &str, points: Vec<TelemetryPoint>) {
            self.telemetry
                .lock()
                .unwrap()
                .insert(device.to_string(), points);
        }

        pub fn set_telemetry_delay(&self, delay: Duration) {
            *self.telemetry_delay.lock().unwrap() = delay;
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        async fn fetch_mapping(&self) -> Result<MappingDocument, DataError> {
            let json = self.mapping.lock().unwrap().clone();
            match json {
                Some(json) => Ok(MappingDocument::from_json(&json)?),
                None => Err(DataError::Unavailable("mapping offline".into())),
            }
        }

        async fn trigger_refresh(&self) -> Result<Option<usize>, DataError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn fetch_telemetry(
            &self,
            device: &Device,
            _query: &TelemetryQuery,
        ) -> Result<TelemetryResponse, DataError> {
            self.telemetry_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.telemetry_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let points = self.telemetry.lock().unwrap().get(device.id.as_str()).cloned();
            match points {
                Some(points) => Ok(TelemetryResponse::Single {
                    device_id: device.id.to_string(),
                    key: device.telemetry_key().unwrap_or("value").to_string(),
                    points,
                }),
                None => Err(DataError::Unavailable("no telemetry".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base_url: &str) -> HttpDataSource {
        HttpDataSource::new(&DataSourceConfig {
            base_url: base_url.into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let root = source("http://middleware:8000/");
        assert_eq!(
            root.url(&["devices.ifc.json"]).unwrap().as_str(),
            "http://middleware:8000/devices.ifc.json"
        );

        let prefixed = source("http://middleware:8000/api/");
        assert_eq!(
            prefixed.url(&["refresh_mapping"]).unwrap().as_str(),
            "http://middleware:8000/api/refresh_mapping"
        );
    }

    #[test]
    fn test_device_id_is_percent_encoded() {
        let source = source("http://middleware:8000");
        let url = source
            .url(&["devices", "AHU 1/zone#2?b", "telemetry"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://middleware:8000/devices/AHU%201%2Fzone%232%3Fb/telemetry"
        );
        assert_eq!(url.path_segments().unwrap().count(), 3);
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpDataSource::new(&DataSourceConfig {
            base_url: "not a url".into(),
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(DataError::InvalidUrl { .. })));
    }
}
