use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::RawFrame;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

/// An enumerated capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraDevice {
    /// Opaque identifier understood by the backend that reported it
    pub id: String,
    pub label: String,
}

impl CameraDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Which way the requested camera should point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FacingMode {
    User,
    Environment,
}

/// Ideal capture parameters; backends pick the closest supported mode
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_fps: u32,
    /// Hint only; ignored when an explicit device is requested
    pub facing_mode: Option<FacingMode>,
}

impl CaptureConstraints {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            ideal_width: config.resolution.0,
            ideal_height: config.resolution.1,
            ideal_fps: config.fps,
            facing_mode: None,
        }
    }

    pub fn with_facing_mode(mut self, facing_mode: FacingMode) -> Self {
        self.facing_mode = Some(facing_mode);
        self
    }
}

/// Platform camera access
#[async_trait]
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquire and immediately release a capture grant so labels become visible
    async fn request_access(&self) -> Result<(), CameraError>;

    /// List video input devices, in platform order
    async fn enumerate(&self) -> Result<Vec<CameraDevice>, CameraError>;

    /// Start capturing from `device_id`, or from an automatically chosen device
    async fn open(
        &self,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// A running capture; frames are published as they are decoded
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn device(&self) -> &CameraDevice;

    /// Handle for pulling the most recent decoded frame
    fn reader(&self) -> FrameReader;

    /// Stop every capture track. Safe to call more than once.
    async fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Non-blocking view of the latest frame produced by a [`FrameSource`]
#[derive(Clone)]
pub struct FrameReader {
    receiver: watch::Receiver<Option<RawFrame>>,
}

impl FrameReader {
    pub fn new(receiver: watch::Receiver<Option<RawFrame>>) -> Self {
        Self { receiver }
    }

    /// The most recently decoded frame, if any has arrived yet
    pub fn latest(&self) -> Option<RawFrame> {
        self.receiver.borrow().clone()
    }

    /// Wait for a new frame; `false` once the source has gone away
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

/// Create the sending half and a reader for a new capture
pub(crate) fn frame_channel() -> (watch::Sender<Option<RawFrame>>, FrameReader) {
    let (sender, receiver) = watch::channel(None);
    (sender, FrameReader::new(receiver))
}

/// Pick the device a capture should use
///
/// An explicit id must match exactly. Without one, an `Environment` hint prefers a
/// device whose label names a rear-facing camera; otherwise the first device wins.
pub fn resolve_device(
    devices: &[CameraDevice],
    device_id: Option<&str>,
    facing_mode: Option<FacingMode>,
) -> Result<CameraDevice, CameraError> {
    if devices.is_empty() {
        return Err(CameraError::NoCameraFound);
    }

    if let Some(id) = device_id {
        return devices
            .iter()
            .find(|device| device.id == id)
            .cloned()
            .ok_or_else(|| CameraError::DeviceOpen {
                device: id.to_string(),
                details: "no such device".to_string(),
            });
    }

    let preferred = match facing_mode {
        Some(FacingMode::Environment) => devices.iter().find(|d| label_is_rear(&d.label)),
        Some(FacingMode::User) => devices.iter().find(|d| label_is_front(&d.label)),
        None => None,
    };

    Ok(preferred.unwrap_or(&devices[0]).clone())
}

fn label_is_rear(label: &str) -> bool {
    let label = label.to_lowercase();
    ["rear", "back", "environment", "world"]
        .iter()
        .any(|word| label.contains(word))
}

fn label_is_front(label: &str) -> bool {
    let label = label.to_lowercase();
    ["front", "user", "facetime", "integrated"]
        .iter()
        .any(|word| label.contains(word))
}
