use super::backend::{
    CameraBackend, CameraDevice, CaptureConstraints, FacingMode, FrameReader, FrameSource,
};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::RawFrame;
use tracing::{debug, info};

/// Owns the capture handle for the lifetime of a stream session
pub struct CameraSession {
    source: Box<dyn FrameSource>,
    reader: FrameReader,
}

impl CameraSession {
    /// Start capturing. On constrained devices without an explicit device the
    /// rear camera is requested as a hint.
    pub async fn open(
        backend: &dyn CameraBackend,
        device_id: Option<&str>,
        config: &CameraConfig,
    ) -> Result<Self, CameraError> {
        let mut constraints = CaptureConstraints::from_config(config);
        if config.mobile && device_id.is_none() {
            constraints = constraints.with_facing_mode(FacingMode::Environment);
        }

        debug!(
            "Opening camera {:?} via {} with {:?}",
            device_id,
            backend.name(),
            constraints
        );

        let source = backend.open(device_id, &constraints).await?;
        let reader = source.reader();

        info!(
            "Camera session open on {} ({})",
            source.device().id,
            source.device().label
        );

        Ok(Self { source, reader })
    }

    /// Latest decoded frame; never waits
    pub fn pull(&self) -> Option<RawFrame> {
        self.reader.latest()
    }

    pub fn reader(&self) -> FrameReader {
        self.reader.clone()
    }

    pub fn device(&self) -> &CameraDevice {
        self.source.device()
    }

    pub fn is_open(&self) -> bool {
        self.source.is_active()
    }

    /// Stop all capture tracks; repeated calls are no-ops
    pub async fn close(&mut self) {
        if self.source.is_active() {
            info!("Closing camera session on {}", self.source.device().id);
        }
        self.source.stop().await;
    }
}
