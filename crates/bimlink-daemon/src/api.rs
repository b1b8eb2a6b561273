//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use bimlink_core::{MappingDocument, TelemetryQuery};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::{AppState, ModelPathError};
use crate::telemetry::FetchError;

/// API error response
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

pub type ApiFailure = (StatusCode, Json<ApiError>);

fn failure(status: StatusCode, msg: impl Into<String>) -> ApiFailure {
    (status, Json(ApiError::new(msg)))
}

/// Cached mapping or 503
async fn loaded_mapping(state: &AppState) -> Result<Arc<MappingDocument>, ApiFailure> {
    state.mapping().await.ok_or_else(|| {
        failure(
            StatusCode::SERVICE_UNAVAILABLE,
            "Mapping not loaded. Call POST /refresh_mapping to load devices.ifc.json.",
        )
    })
}

fn fetch_status(error: &FetchError) -> StatusCode {
    match error {
        FetchError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        FetchError::Query(_)
        | FetchError::MissingExternalId
        | FetchError::InvalidEntityType
        | FetchError::UnsupportedConnector(_) => StatusCode::BAD_REQUEST,
        FetchError::MissingBaseUrl | FetchError::MissingCredentials => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        FetchError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Connectivity probe of the ThingsBoard backend
pub async fn thingsboard_health(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    let mapping = loaded_mapping(&state).await?;
    Ok(Json(state.telemetry.health(&mapping).await))
}

/// List devices with their connector
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    let mapping = loaded_mapping(&state).await?;
    let devices: Vec<Value> = mapping
        .devices
        .iter()
        .map(|(id, raw)| {
            json!({
                "id": id,
                "type": raw.get("type").cloned().unwrap_or(Value::Null),
                "connector": raw.get("connector").cloned().unwrap_or_else(|| Value::Object(Map::new())),
            })
        })
        .collect();
    Ok(Json(json!({ "devices": devices })))
}

/// Raw mapping document
pub async fn get_mapping(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    let mapping = loaded_mapping(&state).await?;
    Ok(Json(mapping.as_ref().clone()))
}

/// Re-read the mapping file
pub async fn refresh_mapping(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    info!("Mapping refresh requested");
    match state.refresh_mapping().await {
        Ok(mapping) => Ok(Json(json!({
            "status": "ok",
            "path": state.config.mapping.path,
            "deviceCount": mapping.device_count(),
        }))),
        Err(e) => {
            warn!(error = %e, "Mapping refresh failed");
            Err(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Mapping not readable: {}: {}", state.config.mapping.path, e),
            ))
        }
    }
}

/// Serve a model file from the mapping directory
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiFailure> {
    let path = state.resolve_model_path(&filename).map_err(|e| {
        let status = match e {
            ModelPathError::NotFound(_) => StatusCode::NOT_FOUND,
            ModelPathError::Missing | ModelPathError::Invalid => StatusCode::BAD_REQUEST,
        };
        failure(status, e.to_string())
    })?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read model: {}", e),
        )
    })?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("model")
        .to_string();
    debug!(model = %name, size = bytes.len(), "Serving model");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        bytes,
    ))
}

/// Telemetry for one device through its connector
pub async fn device_telemetry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TelemetryQuery>,
) -> Result<impl IntoResponse, ApiFailure> {
    let mapping = loaded_mapping(&state).await?;
    match state
        .telemetry
        .fetch(&mapping, &id, &query, chrono::Utc::now())
        .await
    {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            debug!(device = %id, error = %e, "Telemetry request failed");
            Err(failure(fetch_status(&e), e.to_string()))
        }
    }
}
