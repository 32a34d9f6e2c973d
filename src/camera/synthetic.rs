use super::backend::{
    frame_channel, resolve_device, CameraBackend, CameraDevice, CaptureConstraints, FrameReader,
    FrameSource,
};
use crate::error::CameraError;
use crate::frame::RawFrame;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Camera backend producing generated test-pattern frames
///
/// Used when no capture hardware is compiled in, and as the camera double in tests.
pub struct SyntheticBackend {
    devices: Vec<CameraDevice>,
    deny_access: AtomicBool,
    fail_enumeration: AtomicBool,
    access_requests: AtomicUsize,
    opened: Mutex<Vec<String>>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl SyntheticBackend {
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            deny_access: AtomicBool::new(false),
            fail_enumeration: AtomicBool::new(false),
            access_requests: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A single generic test camera
    pub fn single() -> Self {
        Self::new(vec![CameraDevice::new("synthetic:0", "Test Pattern")])
    }

    /// Refuse every capture grant from now on
    pub fn set_access_denied(&self, denied: bool) {
        self.deny_access.store(denied, Ordering::SeqCst);
    }

    pub fn set_enumeration_failure(&self, failing: bool) {
        self.fail_enumeration.store(failing, Ordering::SeqCst);
    }

    /// Device ids passed to successful opens, in order
    pub fn opened_devices(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn access_requests(&self) -> usize {
        self.access_requests.load(Ordering::SeqCst)
    }

    /// Captures that have been opened and not yet stopped
    pub fn active_captures(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active captures observed
    pub fn peak_active_captures(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn check_access(&self, device: &str) -> Result<(), CameraError> {
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(CameraError::PermissionDenied {
                device: device.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn request_access(&self) -> Result<(), CameraError> {
        self.access_requests.fetch_add(1, Ordering::SeqCst);
        self.check_access("synthetic")?;
        if self.devices.is_empty() {
            return Err(CameraError::NoCameraFound);
        }
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<CameraDevice>, CameraError> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(CameraError::DeviceEnumerationFailed {
                details: "synthetic enumeration failure".to_string(),
            });
        }
        Ok(self.devices.clone())
    }

    async fn open(
        &self,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        self.check_access(device_id.unwrap_or("synthetic"))?;
        let device = resolve_device(&self.devices, device_id, constraints.facing_mode)?;

        self.opened.lock().push(device.id.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);

        info!(
            "Opening synthetic camera {} ({}x{} @ {}fps)",
            device.id, constraints.ideal_width, constraints.ideal_height, constraints.ideal_fps
        );

        Ok(Box::new(SyntheticSource::start(
            device,
            constraints,
            Arc::clone(&self.active),
        )))
    }
}

struct SyntheticSource {
    device: CameraDevice,
    reader: FrameReader,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
    stopped: bool,
}

impl SyntheticSource {
    fn start(
        device: CameraDevice,
        constraints: &CaptureConstraints,
        active: Arc<AtomicUsize>,
    ) -> Self {
        let (sender, reader) = frame_channel();
        let cancel = CancellationToken::new();

        let width = constraints.ideal_width.max(1);
        let height = constraints.ideal_height.max(1);
        let fps = constraints.ideal_fps.max(1);

        // First frame is available immediately, like a warmed-up capture
        sender.send_replace(Some(test_pattern(0, width, height)));

        let task = tokio::spawn(run_pattern_loop(sender, width, height, fps, cancel.clone()));

        Self {
            device,
            reader,
            cancel,
            task: Some(task),
            active,
            stopped: false,
        }
    }

    fn release(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        self.cancel.cancel();
        self.active.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn reader(&self) -> FrameReader {
        self.reader.clone()
    }

    async fn stop(&mut self) {
        if !self.release() {
            debug!("Synthetic camera {} already stopped", self.device.id);
            return;
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Synthetic camera {} stopped", self.device.id);
    }

    fn is_active(&self) -> bool {
        !self.stopped
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.release();
    }
}

async fn run_pattern_loop(
    sender: watch::Sender<Option<RawFrame>>,
    width: u32,
    height: u32,
    fps: u32,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    let mut frame_id = 1u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                sender.send_replace(Some(test_pattern(frame_id, width, height)));
                trace!("Generated synthetic frame {}", frame_id);
                frame_id += 1;
            }
        }
    }

    // Readers holding the last frame keep it; no further frames arrive
    debug!("Synthetic pattern loop stopped after {} frames", frame_id);
}

/// Diagonal gradient with a bar that moves one step per frame
pub(crate) fn test_pattern(frame_id: u64, width: u32, height: u32) -> RawFrame {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    let bar = (frame_id * 8 % width as u64) as u32;

    for y in 0..height {
        for x in 0..width {
            if x >= bar && x < bar + 8 {
                pixels.extend_from_slice(&[255, 255, 255]);
            } else {
                pixels.push((x * 255 / width) as u8);
                pixels.push((y * 255 / height) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
    }

    RawFrame::new(frame_id, pixels, width, height, SystemTime::now())
}
