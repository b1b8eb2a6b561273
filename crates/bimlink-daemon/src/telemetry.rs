//! Telemetry proxy
//!
//! Resolves a device's connector from the mapping document and produces its
//! telemetry:
//! 1. `mock` connectors get synthesized hourly points (`value = i`)
//! 2. `thingsboard` connectors are proxied to the ThingsBoard timeseries API
//!    with a static API key
//! 3. Anything else is rejected as unsupported

use bimlink_core::{
    ConnectorKind, MappingDocument, TelemetryError, TelemetryPoint, TelemetryQuery,
    TelemetryResponse, TelemetryValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ThingsBoardConfig;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
    #[error("{0}")]
    Query(#[from] TelemetryError),
    #[error("Missing ThingsBoard deviceId in mapping.")]
    MissingExternalId,
    #[error("Invalid entityType in mapping. Use DEVICE or ASSET.")]
    InvalidEntityType,
    #[error("Unsupported connector type: {0}")]
    UnsupportedConnector(String),
    #[error("Missing TB_BASE_URL.")]
    MissingBaseUrl,
    #[error("Missing ThingsBoard credentials. Set TB_API_KEY.")]
    MissingCredentials,
    #[error("{0}")]
    Upstream(String),
}

/// Result of probing the ThingsBoard backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    fn ok() -> Self {
        Self {
            status: "ok",
            connected: true,
            detail: None,
        }
    }

    fn error(detail: impl Into<String>) -> Self {
        Self {
            status: "error",
            connected: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Deserialize)]
struct RawPoint {
    ts: i64,
    value: Value,
}

impl RawPoint {
    fn into_point(self) -> TelemetryPoint {
        let value = match self.value {
            Value::String(s) => TelemetryValue::parse(&s),
            Value::Number(n) => match n.as_f64() {
                Some(v) => TelemetryValue::Number(v),
                None => TelemetryValue::Text(n.to_string()),
            },
            other => TelemetryValue::Text(other.to_string()),
        };
        TelemetryPoint { ts: self.ts, value }
    }
}

/// Telemetry fetcher shared by the HTTP handlers
pub struct TelemetryService {
    /// HTTP client
    client: reqwest::Client,
    settings: ThingsBoardConfig,
}

impl TelemetryService {
    pub fn new(settings: ThingsBoardConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }

    /// Base URL and API key: daemon settings first, then the mapping document
    fn credentials(&self, document: &MappingDocument) -> (Option<String>, Option<String>) {
        let section = document.backend.thingsboard.as_ref();
        let pick = |configured: &Option<String>, mapped: Option<&String>| {
            configured
                .as_ref()
                .or(mapped)
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
        };
        (
            pick(&self.settings.base_url, section.and_then(|s| s.base_url.as_ref())),
            pick(&self.settings.api_key, section.and_then(|s| s.api_key.as_ref())),
        )
    }

    /// Telemetry for one device of the mapping
    pub async fn fetch(
        &self,
        document: &MappingDocument,
        device_id: &str,
        query: &TelemetryQuery,
        now: DateTime<Utc>,
    ) -> Result<TelemetryResponse, FetchError> {
        query.validate()?;

        let device = document
            .raw_device(device_id)
            .and_then(|raw| MappingDocument::parse_device(device_id, raw))
            .ok_or_else(|| FetchError::UnknownDevice(device_id.to_string()))?;
        let keys = query.keys(device.telemetry_key())?;
        let connector = device.connector.clone().unwrap_or_default();

        let series = match connector.kind() {
            ConnectorKind::Mock => mock_series(&keys, query.limit, now),
            ConnectorKind::ThingsBoard => {
                let external_id = connector
                    .external_id
                    .as_deref()
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(FetchError::MissingExternalId)?;
                let entity_type = connector
                    .entity_type
                    .as_deref()
                    .unwrap_or("DEVICE")
                    .to_ascii_uppercase();
                if entity_type != "DEVICE" && entity_type != "ASSET" {
                    return Err(FetchError::InvalidEntityType);
                }
                self.fetch_timeseries(document, &entity_type, external_id, &keys, query, now)
                    .await?
            }
            ConnectorKind::Other(kind) => return Err(FetchError::UnsupportedConnector(kind)),
        };

        debug!(device = %device_id, keys = keys.len(), "Telemetry fetched");

        Ok(TelemetryResponse::from_series(device_id, &keys, series))
    }

    async fn fetch_timeseries(
        &self,
        document: &MappingDocument,
        entity_type: &str,
        external_id: &str,
        keys: &[String],
        query: &TelemetryQuery,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<TelemetryPoint>>, FetchError> {
        let (base_url, api_key) = self.credentials(document);
        let base_url = base_url.ok_or(FetchError::MissingBaseUrl)?;
        let api_key = api_key.ok_or(FetchError::MissingCredentials)?;

        let window = query.window(now);
        let mut params: Vec<(&str, String)> = vec![
            ("keys", keys.join(",")),
            ("startTs", window.start_ts.to_string()),
            ("endTs", window.end_ts.to_string()),
            ("limit", query.limit.to_string()),
            (
                "agg",
                query
                    .agg
                    .clone()
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| "NONE".to_string()),
            ),
        ];
        if let Some(interval) = query.interval_ms()?.filter(|ms| *ms > 0) {
            params.push(("interval", interval.to_string()));
        }

        let url = format!(
            "{}/api/plugins/telemetry/{}/{}/values/timeseries",
            base_url, entity_type, external_id
        );
        info!(url = %url, keys = %keys.join(","), "Fetching ThingsBoard timeseries");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .header("X-Authorization", format!("ApiKey {}", api_key))
            .send()
            .await
            .map_err(|e| FetchError::Upstream(format!("ThingsBoard request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "ThingsBoard telemetry fetch failed");
            return Err(FetchError::Upstream(upstream_detail(&body)));
        }

        let payload: HashMap<String, Vec<RawPoint>> = response
            .json()
            .await
            .map_err(|e| FetchError::Upstream(format!("ThingsBoard error: {}", e)))?;

        Ok(payload
            .into_iter()
            .map(|(key, raw)| {
                let mut points: Vec<TelemetryPoint> =
                    raw.into_iter().map(RawPoint::into_point).collect();
                points.sort_by_key(|p| p.ts);
                (key, points)
            })
            .collect())
    }

    /// Probe `/api/system/info` with the configured credentials
    pub async fn health(&self, document: &MappingDocument) -> HealthReport {
        let (base_url, api_key) = self.credentials(document);
        let Some(base_url) = base_url else {
            return HealthReport::error("Missing ThingsBoard baseUrl.");
        };
        let Some(api_key) = api_key else {
            return HealthReport::error(FetchError::MissingCredentials.to_string());
        };

        let result = self
            .client
            .get(format!("{}/api/system/info", base_url))
            .header("X-Authorization", format!("ApiKey {}", api_key))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => HealthReport::ok(),
            Ok(response) => HealthReport::error(format!(
                "ThingsBoard response: {}",
                response.status().as_u16()
            )),
            Err(e) => HealthReport::error(e.to_string()),
        }
    }
}

/// `limit` hourly points per key ending at `now`, valued 0..limit
pub fn mock_series(
    keys: &[String],
    limit: u32,
    now: DateTime<Utc>,
) -> BTreeMap<String, Vec<TelemetryPoint>> {
    let now_ms = now.timestamp_millis();
    let limit = i64::from(limit);
    keys.iter()
        .map(|key| {
            let points = (0..limit)
                .map(|i| TelemetryPoint::new(now_ms - (limit - 1 - i) * HOUR_MS, i as f64))
                .collect();
            (key.clone(), points)
        })
        .collect()
}

/// Error message from a ThingsBoard error body
fn upstream_detail(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        let message = ["message", "error", "detail"]
            .iter()
            .find_map(|field| payload.get(field).and_then(Value::as_str));
        if let Some(message) = message {
            return format!("ThingsBoard error: {}", message);
        }
    }
    let text = body.trim();
    if text.is_empty() {
        "ThingsBoard telemetry fetch failed.".to_string()
    } else {
        format!("ThingsBoard error: {}", text)
    }
}
