mod backend;
mod device;
mod session;
mod synthetic;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod v4l2;
#[cfg(test)]
mod tests;

pub use backend::{
    resolve_device, CameraBackend, CameraDevice, CaptureConstraints, FacingMode, FrameReader,
    FrameSource,
};
pub use device::DeviceRegistry;
pub use session::CameraSession;
pub use synthetic::SyntheticBackend;
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use v4l2::V4l2Backend;

use crate::config::{CameraBackendKind, CameraConfig};
use crate::error::CameraError;
use std::sync::Arc;

/// Build the backend selected in the configuration
pub fn create_backend(config: &CameraConfig) -> Result<Arc<dyn CameraBackend>, CameraError> {
    match config.backend {
        CameraBackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::single())),
        #[cfg(all(target_os = "linux", feature = "camera"))]
        CameraBackendKind::V4l2 => Ok(Arc::new(V4l2Backend::new()?)),
        #[cfg(not(all(target_os = "linux", feature = "camera")))]
        CameraBackendKind::V4l2 => {
            tracing::warn!("V4L2 capture is not compiled in; using the synthetic camera");
            Ok(Arc::new(SyntheticBackend::single()))
        }
    }
}
