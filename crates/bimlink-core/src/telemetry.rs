//! Telemetry points, responses, and query parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default number of points per key
pub const DEFAULT_LIMIT: u32 = 24;
/// Default look-back window in hours
pub const DEFAULT_HOURS: u32 = 24;
pub const MAX_LIMIT: u32 = 1000;
/// One week
pub const MAX_HOURS: u32 = 168;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: u64 = 86_400_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Invalid interval. Use minute, hour, day, week, month, year, or a numeric value in ms.")]
    InvalidInterval(String),
    #[error("limit must be between 1 and 1000, got {0}")]
    LimitOutOfRange(u32),
    #[error("hours must be between 1 and 168, got {0}")]
    HoursOutOfRange(u32),
    #[error("Missing telemetry key.")]
    MissingKey,
}

/// A telemetry sample value; numeric when the backend value parses as a number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Text(String),
}

impl TelemetryValue {
    /// Parse a backend value, keeping it as text if it is not numeric
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Number(v),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl std::fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One sample: timestamp in epoch milliseconds plus value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub ts: i64,
    pub value: TelemetryValue,
}

impl TelemetryPoint {
    pub fn new(ts: i64, value: f64) -> Self {
        Self {
            ts,
            value: TelemetryValue::Number(value),
        }
    }
}

/// Telemetry for a device: one key, or several keys as a series map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryResponse {
    Single {
        #[serde(rename = "deviceId")]
        device_id: String,
        key: String,
        points: Vec<TelemetryPoint>,
    },
    Series {
        #[serde(rename = "deviceId")]
        device_id: String,
        series: BTreeMap<String, Vec<TelemetryPoint>>,
    },
}

impl TelemetryResponse {
    /// Single-key response when exactly one key was requested, series otherwise.
    ///
    /// A requested key with no samples still yields an entry with no points.
    pub fn from_series(
        device_id: &str,
        keys: &[String],
        mut series: BTreeMap<String, Vec<TelemetryPoint>>,
    ) -> Self {
        if let [key] = keys {
            return Self::Single {
                device_id: device_id.to_string(),
                key: key.clone(),
                points: series.remove(key).unwrap_or_default(),
            };
        }
        Self::Series {
            device_id: device_id.to_string(),
            series,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Self::Single { device_id, .. } | Self::Series { device_id, .. } => device_id,
        }
    }

    pub fn point_count(&self) -> usize {
        match self {
            Self::Single { points, .. } => points.len(),
            Self::Series { series, .. } => series.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }
}

/// Absolute time window in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryWindow {
    pub start_ts: i64,
    pub end_ts: i64,
}

/// Query parameters for a telemetry fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryQuery {
    /// Single key or comma-separated keys; defaults to the device's key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<i64>,
    /// Aggregation interval: minute/hour/day/week/month/year or ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_hours() -> u32 {
    DEFAULT_HOURS
}

impl Default for TelemetryQuery {
    fn default() -> Self {
        Self {
            key: None,
            limit: DEFAULT_LIMIT,
            hours: DEFAULT_HOURS,
            agg: None,
            start_ts: None,
            end_ts: None,
            interval: None,
        }
    }
}

impl TelemetryQuery {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Check limit/hours bounds and the interval syntax
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(TelemetryError::LimitOutOfRange(self.limit));
        }
        if !(1..=MAX_HOURS).contains(&self.hours) {
            return Err(TelemetryError::HoursOutOfRange(self.hours));
        }
        self.interval_ms()?;
        Ok(())
    }

    pub fn interval_ms(&self) -> Result<Option<u64>, TelemetryError> {
        match self.interval.as_deref() {
            Some(raw) => parse_interval_ms(raw),
            None => Ok(None),
        }
    }

    /// Keys to fetch: the explicit key, else the fallback; split on commas
    pub fn keys(&self, fallback: Option<&str>) -> Result<Vec<String>, TelemetryError> {
        let raw = self
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .or(fallback)
            .ok_or(TelemetryError::MissingKey)?;
        let keys: Vec<String> = raw
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(TelemetryError::MissingKey);
        }
        Ok(keys)
    }

    /// Resolve the time window; missing bounds are derived from `now` and `hours`
    pub fn window(&self, now: DateTime<Utc>) -> TelemetryWindow {
        let end_ts = self.end_ts.unwrap_or_else(|| now.timestamp_millis());
        let start_ts = self
            .start_ts
            .unwrap_or(end_ts - i64::from(self.hours) * HOUR_MS);
        TelemetryWindow { start_ts, end_ts }
    }
}

/// Parse an aggregation interval into milliseconds.
///
/// Empty input means "no interval".
pub fn parse_interval_ms(value: &str) -> Result<Option<u64>, TelemetryError> {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Ok(None);
    }
    if normalized.bytes().all(|b| b.is_ascii_digit()) {
        return normalized
            .parse::<u64>()
            .map(Some)
            .map_err(|_| TelemetryError::InvalidInterval(value.to_string()));
    }
    let ms = match normalized.as_str() {
        "minute" => 60_000,
        "hour" => 3_600_000,
        "day" => DAY_MS,
        "week" => 7 * DAY_MS,
        "month" => 30 * DAY_MS,
        "year" => 365 * DAY_MS,
        _ => return Err(TelemetryError::InvalidInterval(value.to_string())),
    };
    Ok(Some(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval_ms(""), Ok(None));
        assert_eq!(parse_interval_ms("5000"), Ok(Some(5000)));
        assert_eq!(parse_interval_ms("Hour"), Ok(Some(3_600_000)));
        assert_eq!(parse_interval_ms("week"), Ok(Some(604_800_000)));
        assert!(matches!(
            parse_interval_ms("fortnight"),
            Err(TelemetryError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_query_validation() {
        assert!(TelemetryQuery::default().validate().is_ok());

        let query = TelemetryQuery {
            limit: 0,
            ..Default::default()
        };
        assert_eq!(query.validate(), Err(TelemetryError::LimitOutOfRange(0)));

        let query = TelemetryQuery {
            hours: 169,
            ..Default::default()
        };
        assert_eq!(query.validate(), Err(TelemetryError::HoursOutOfRange(169)));
    }

    #[test]
    fn test_query_keys() {
        let query = TelemetryQuery::default();
        assert_eq!(query.keys(Some("temperature")).unwrap(), vec!["temperature"]);
        assert_eq!(query.keys(None), Err(TelemetryError::MissingKey));

        let query = TelemetryQuery::default().with_key("temp, hum,");
        assert_eq!(query.keys(Some("ignored")).unwrap(), vec!["temp", "hum"]);
    }

    #[test]
    fn test_query_window() {
        let now = Utc.timestamp_millis_opt(10 * HOUR_MS).unwrap();
        let query = TelemetryQuery {
            hours: 2,
            ..Default::default()
        };
        assert_eq!(
            query.window(now),
            TelemetryWindow {
                start_ts: 8 * HOUR_MS,
                end_ts: 10 * HOUR_MS
            }
        );
    }

    #[test]
    fn test_query_from_camel_case() {
        let query: TelemetryQuery =
            serde_json::from_str(r#"{"key":"temp","startTs":1,"endTs":2}"#).unwrap();
        assert_eq!(query.start_ts, Some(1));
        assert_eq!(query.end_ts, Some(2));
        assert_eq!(query.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_response_shapes() {
        let mut series = BTreeMap::new();
        series.insert("temp".to_string(), vec![TelemetryPoint::new(1, 20.5)]);
        let single = TelemetryResponse::from_series("DEV_1", &["temp".to_string()], series.clone());
        assert!(matches!(single, TelemetryResponse::Single { ref key, .. } if key == "temp"));
        assert_eq!(single.point_count(), 1);

        let empty = TelemetryResponse::from_series("DEV_1", &["co2".to_string()], series.clone());
        assert!(matches!(empty, TelemetryResponse::Single { ref key, ref points, .. }
            if key == "co2" && points.is_empty()));

        series.insert("hum".to_string(), vec![]);
        let keys = ["temp".to_string(), "hum".to_string()];
        let multi = TelemetryResponse::from_series("DEV_1", &keys, series);
        assert_eq!(multi.point_count(), 1);

        let json = serde_json::to_value(&multi).unwrap();
        let back: TelemetryResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.device_id(), "DEV_1");
        assert!(matches!(back, TelemetryResponse::Series { .. }));
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(TelemetryValue::parse("21.5"), TelemetryValue::Number(21.5));
        assert_eq!(
            TelemetryValue::parse("open"),
            TelemetryValue::Text("open".to_string())
        );
    }
}
