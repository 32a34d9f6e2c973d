use super::backend::{
    frame_channel, resolve_device, CameraBackend, CameraDevice, CaptureConstraints, FrameReader,
    FrameSource,
};
use crate::error::CameraError;
use crate::frame::RawFrame;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

const SYSFS_VIDEO4LINUX: &str = "/sys/class/video4linux";

/// V4L2 capture devices driven through a GStreamer pipeline
pub struct V4l2Backend {
    sysfs_root: PathBuf,
}

impl V4l2Backend {
    pub fn new() -> Result<Self, CameraError> {
        gstreamer::init().map_err(|e| CameraError::DeviceEnumerationFailed {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            sysfs_root: PathBuf::from(SYSFS_VIDEO4LINUX),
        })
    }

    /// Open the device node for reading and drop it straight away
    fn probe_node(device: &str) -> Result<(), CameraError> {
        std::fs::OpenOptions::new()
            .read(true)
            .open(device)
            .map(|_| ())
            .map_err(|e| CameraError::from_io(device, &e))
    }

    fn build_pipeline_string(device: &str, constraints: &CaptureConstraints) -> String {
        format!(
            "v4l2src device={} do-timestamp=true ! \
             videoconvert ! videoscale ! videorate ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true enable-last-sample=false",
            device,
            constraints.ideal_width,
            constraints.ideal_height,
            constraints.ideal_fps.max(1)
        )
    }
}

#[async_trait]
impl CameraBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    async fn request_access(&self) -> Result<(), CameraError> {
        let devices = self.enumerate().await?;
        let first = devices.first().ok_or(CameraError::NoCameraFound)?;
        let node = first.id.clone();
        tokio::task::spawn_blocking(move || Self::probe_node(&node))
            .await
            .map_err(|e| CameraError::DeviceEnumerationFailed {
                details: e.to_string(),
            })?
    }

    async fn enumerate(&self) -> Result<Vec<CameraDevice>, CameraError> {
        let root = self.sysfs_root.clone();
        tokio::task::spawn_blocking(move || enumerate_sysfs(&root))
            .await
            .map_err(|e| CameraError::DeviceEnumerationFailed {
                details: e.to_string(),
            })?
    }

    async fn open(
        &self,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        let devices = self.enumerate().await?;
        let device = resolve_device(&devices, device_id, constraints.facing_mode)?;
        Self::probe_node(&device.id)?;

        let pipeline_desc = Self::build_pipeline_string(&device.id, constraints);
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::DeviceOpen {
                device: device.id.clone(),
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::DeviceOpen {
                device: device.id.clone(),
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CameraError::DeviceOpen {
                device: device.id.clone(),
                details: "Pipeline has no appsink".to_string(),
            })?;

        let (sender, reader) = frame_channel();
        let sender = Arc::new(sender);
        let frame_counter = Arc::new(AtomicU64::new(0));

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    match sample_to_frame(&sample, &frame_counter) {
                        Ok(frame) => {
                            sender.send_replace(Some(frame));
                        }
                        Err(e) => warn!("Dropping camera sample: {}", e),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(CameraError::CaptureStream {
                details: format!("Failed to start GStreamer pipeline: {}", e),
            });
        }

        info!("Camera {} ({}) capturing", device.id, device.label);

        Ok(Box::new(V4l2Source {
            device,
            reader,
            pipeline,
            active: true,
        }))
    }
}

struct V4l2Source {
    device: CameraDevice,
    reader: FrameReader,
    pipeline: Pipeline,
    active: bool,
}

impl V4l2Source {
    fn shutdown_pipeline(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!("Failed to stop pipeline for {}: {}", self.device.id, e);
        }
    }
}

#[async_trait]
impl FrameSource for V4l2Source {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn reader(&self) -> FrameReader {
        self.reader.clone()
    }

    async fn stop(&mut self) {
        if !self.active {
            debug!("Camera {} already stopped", self.device.id);
            return;
        }
        self.shutdown_pipeline();
        info!("Camera {} stopped", self.device.id);
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.shutdown_pipeline();
    }
}

/// Copy an RGB sample out of GStreamer, dropping any row padding
fn sample_to_frame(
    sample: &gstreamer::Sample,
    frame_counter: &AtomicU64,
) -> Result<RawFrame, CameraError> {
    let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
        details: "No buffer in sample".to_string(),
    })?;

    let caps = sample.caps().ok_or_else(|| CameraError::CaptureStream {
        details: "No caps in sample".to_string(),
    })?;

    let video_info = VideoInfo::from_caps(caps).map_err(|e| CameraError::CaptureStream {
        details: format!("Failed to get video info: {}", e),
    })?;

    let width = video_info.width();
    let height = video_info.height();
    let stride = video_info.stride()[0] as usize;
    let row_len = width as usize * 3;

    let map = buffer
        .map_readable()
        .map_err(|e| CameraError::CaptureStream {
            details: format!("Failed to map buffer: {}", e),
        })?;
    let data = map.as_slice();

    if height == 0 || stride < row_len || data.len() < stride * (height as usize - 1) + row_len {
        return Err(CameraError::CaptureStream {
            details: format!(
                "Sample of {} bytes too small for {}x{} (stride {})",
                data.len(),
                width,
                height,
                stride
            ),
        });
    }

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    let frame_id = frame_counter.fetch_add(1, Ordering::Relaxed);
    trace!("Captured frame {} ({}x{})", frame_id, width, height);

    Ok(RawFrame::new(frame_id, pixels, width, height, SystemTime::now()))
}

/// Capture nodes under `root`, sorted by node name
fn enumerate_sysfs(root: &Path) -> Result<Vec<CameraDevice>, CameraError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CameraError::DeviceEnumerationFailed {
                details: format!("{}: {}", root.display(), e),
            })
        }
    };

    let mut nodes: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("video"))
        .collect();
    nodes.sort_by_key(|name| {
        name.trim_start_matches("video")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut devices = Vec::new();
    for node in nodes {
        let dir = root.join(&node);

        // Metadata nodes share the card with index > 0
        let index = std::fs::read_to_string(dir.join("index"))
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        if index != 0 {
            continue;
        }

        let label = std::fs::read_to_string(dir.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        devices.push(CameraDevice::new(format!("/dev/{}", node), label));
    }

    debug!("Found {} V4L2 capture node(s)", devices.len());
    Ok(devices)
}
