use super::backend::{CameraBackend, CameraDevice};
use crate::error::CameraError;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Enumerates cameras and remembers the last successful listing
pub struct DeviceRegistry {
    backend: Arc<dyn CameraBackend>,
    devices: RwLock<Vec<CameraDevice>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            devices: RwLock::new(Vec::new()),
        }
    }

    pub fn backend(&self) -> Arc<dyn CameraBackend> {
        Arc::clone(&self.backend)
    }

    /// Probe access, then enumerate. Empty labels become `Camera N`.
    pub async fn list(&self) -> Result<Vec<CameraDevice>, CameraError> {
        if let Err(e) = self.backend.request_access().await {
            warn!("Camera access probe failed: {}", e);
            return Err(e);
        }

        let devices: Vec<CameraDevice> = self
            .backend
            .enumerate()
            .await?
            .into_iter()
            .enumerate()
            .map(|(index, mut device)| {
                if device.label.trim().is_empty() {
                    device.label = format!("Camera {}", index + 1);
                }
                device
            })
            .collect();

        info!(
            "Found {} camera(s) via {} backend",
            devices.len(),
            self.backend.name()
        );

        *self.devices.write() = devices.clone();
        Ok(devices)
    }

    /// Look up a device from the last listing
    pub fn select(&self, id: &str) -> Option<CameraDevice> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }

    /// Devices from the last successful listing
    pub fn devices(&self) -> Vec<CameraDevice> {
        self.devices.read().clone()
    }

    /// The device after `current` in listing order, wrapping around
    pub fn next_after(&self, current: Option<&str>) -> Option<CameraDevice> {
        let devices = self.devices.read();
        if devices.is_empty() {
            return None;
        }

        let next = current
            .and_then(|id| devices.iter().position(|d| d.id == id))
            .map(|pos| (pos + 1) % devices.len())
            .unwrap_or(0);

        Some(devices[next].clone())
    }
}
