use super::server::ControlState;
use crate::annotation::AnnotationSnapshot;
use crate::error::{FirewatchError, SessionError};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// JSON error body with a status derived from the failure kind
pub struct ApiError(FirewatchError);

impl<E: Into<FirewatchError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FirewatchError::Session(SessionError::InvalidProcessingFps { .. }) => {
                StatusCode::BAD_REQUEST
            }
            FirewatchError::Camera(_) => StatusCode::SERVICE_UNAVAILABLE,
            FirewatchError::Channel(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Control request failed: {}", self.0);

        let body = json!({
            "error": self.0.user_message(),
            "details": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StartParams {
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    /// Absent or null selects automatically
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessingFpsRequest {
    pub fps: u32,
}

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    pub enabled: bool,
}

fn annotation_summary(snapshot: Option<&AnnotationSnapshot>) -> serde_json::Value {
    match snapshot {
        Some(snapshot) => json!({
            "detections": snapshot.detections,
            "fire_detected": snapshot.fire_detected,
            "smoke_detected": snapshot.smoke_detected,
            "alert": snapshot.alert_text,
            "received_at": snapshot.received_at,
        }),
        None => serde_json::Value::Null,
    }
}

pub async fn health_handler(State(state): State<ControlState>) -> impl IntoResponse {
    let health = json!({
        "status": "healthy",
        "session": state.controller.state(),
        "subscribers": state.controller.event_bus().subscriber_count(),
    });
    (StatusCode::OK, Json(health))
}

pub async fn status_handler(State(state): State<ControlState>) -> impl IntoResponse {
    let annotations = state.controller.annotations();
    let status = json!({
        "session": state.controller.status(),
        "stats": state.controller.stats(),
        "annotations": annotation_summary(annotations.as_deref()),
    });
    Json(status)
}

/// Enumeration failures come back as a JSON error, never a crash
pub async fn cameras_handler(
    State(state): State<ControlState>,
) -> Result<impl IntoResponse, ApiError> {
    let devices = state.controller.refresh_devices().await?;
    Ok(Json(json!({
        "devices": devices,
        "selected": state.controller.selected_device(),
    })))
}

pub async fn start_handler(
    State(state): State<ControlState>,
    Query(params): Query<StartParams>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Start requested via control API");
    let status = state.controller.start(params.device_id).await?;
    Ok(Json(status))
}

pub async fn stop_handler(State(state): State<ControlState>) -> impl IntoResponse {
    info!("Stop requested via control API");
    Json(state.controller.stop().await)
}

pub async fn device_handler(
    State(state): State<ControlState>,
    Json(request): Json<DeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.controller.switch_device(request.device_id).await?;
    Ok(Json(status))
}

pub async fn processing_fps_handler(
    State(state): State<ControlState>,
    Json(request): Json<ProcessingFpsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let skip_interval = state.controller.set_processing_fps(request.fps)?;
    Ok(Json(json!({
        "processing_fps": request.fps,
        "skip_interval": skip_interval,
    })))
}

pub async fn voice_handler(
    State(state): State<ControlState>,
    Json(request): Json<VoiceRequest>,
) -> impl IntoResponse {
    state.controller.set_voice_enabled(request.enabled);
    Json(json!({ "voice_enabled": state.controller.voice_enabled() }))
}
