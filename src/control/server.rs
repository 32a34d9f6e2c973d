use super::handlers::{
    cameras_handler, device_handler, health_handler, processing_fps_handler, start_handler,
    status_handler, stop_handler, voice_handler,
};
use crate::config::ControlConfig;
use crate::error::FirewatchError;
use crate::session::StreamController;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ControlState {
    pub(crate) controller: Arc<StreamController>,
}

pub fn router(controller: Arc<StreamController>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/cameras", get(cameras_handler))
        .route("/session/start", post(start_handler))
        .route("/session/stop", post(stop_handler))
        .route("/session/device", put(device_handler))
        .route("/session/processing-fps", put(processing_fps_handler))
        .route("/alerts/voice", put(voice_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ControlState { controller })
}

/// HTTP control surface over the stream controller
pub struct ControlServer {
    config: ControlConfig,
    controller: Arc<StreamController>,
}

impl ControlServer {
    pub fn new(config: ControlConfig, controller: Arc<StreamController>) -> Self {
        Self { config, controller }
    }

    /// Serve until `cancel` fires
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), FirewatchError> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            FirewatchError::component("control_api".to_string(), format!("bind {}: {}", addr, e))
        })?;

        info!("Control API listening on {}", addr);

        axum::serve(listener, router(self.controller))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| {
                FirewatchError::component("control_api".to_string(), format!("server error: {}", e))
            })?;

        info!("Control API stopped");
        Ok(())
    }
}
