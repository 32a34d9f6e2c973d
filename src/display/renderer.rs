use super::overlay::{draw_annotations, draw_status, OverlayFont, StatusLine};
use super::surface::DisplaySurface;
use crate::annotation::AnnotationStore;
use crate::camera::FrameReader;
use crate::error::DisplayError;
use crate::frame::RawFrame;
use crate::stats::StatsTracker;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Paints the live frame and the current annotations onto a surface
pub struct Renderer {
    surface: Box<dyn DisplaySurface>,
    font: Option<Arc<OverlayFont>>,
    frames: FrameReader,
    store: AnnotationStore,
    stats: Arc<StatsTracker>,
    processing_fps: watch::Receiver<u32>,
    last_frame: Option<RawFrame>,
}

impl Renderer {
    pub fn new(
        surface: Box<dyn DisplaySurface>,
        font: Option<Arc<OverlayFont>>,
        frames: FrameReader,
        store: AnnotationStore,
        stats: Arc<StatsTracker>,
        processing_fps: watch::Receiver<u32>,
    ) -> Self {
        Self {
            surface,
            font,
            frames,
            store,
            stats,
            processing_fps,
            last_frame: None,
        }
    }

    /// Build the next image: latest frame, detection overlay, status panel.
    /// `None` until the camera has produced a frame.
    pub fn compose(&mut self) -> Option<RgbImage> {
        if let Some(frame) = self.frames.latest() {
            self.last_frame = Some(frame);
        }

        let mut image = self.last_frame.as_ref()?.to_image()?;
        let snapshot = self.store.current();
        let font = self.font.as_deref();

        if let Some(snapshot) = &snapshot {
            draw_annotations(&mut image, snapshot, font);
        }

        let status = StatusLine {
            detections: snapshot.as_ref().map(|s| s.detection_count()).unwrap_or(0),
            display_fps: self.stats.snapshot().display_fps,
            processing_fps: *self.processing_fps.borrow(),
        };
        draw_status(&mut image, &status, font);

        Some(image)
    }

    /// Draw once; `false` when there was nothing to draw yet
    pub fn render_tick(&mut self) -> Result<bool, DisplayError> {
        let Some(image) = self.compose() else {
            return Ok(false);
        };
        self.surface.present(&image)?;
        self.stats.record_render();
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), DisplayError> {
        self.last_frame = None;
        self.surface.clear()
    }

    /// Give the surface back for the next session
    pub fn into_surface(self) -> Box<dyn DisplaySurface> {
        self.surface
    }
}

/// Run the draw loop at `refresh_hz` until cancelled, then hand the renderer back
pub fn spawn_render_loop(
    mut renderer: Renderer,
    refresh_hz: u32,
    cancel: CancellationToken,
) -> JoinHandle<Renderer> {
    tokio::spawn(async move {
        let period = Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failing = false;

        info!("Render loop started at {} Hz", refresh_hz);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Drawing and framebuffer writes stay off the async workers
                    let (returned, outcome) = match tokio::task::spawn_blocking(move || {
                        let outcome = renderer.render_tick();
                        (renderer, outcome)
                    })
                    .await
                    {
                        Ok(pair) => pair,
                        Err(e) => std::panic::resume_unwind(e.into_panic()),
                    };
                    renderer = returned;

                    match outcome {
                        Ok(_) => {
                            if failing {
                                info!("Display output recovered");
                                failing = false;
                            }
                        }
                        Err(e) => {
                            // Log the first failure of a streak only
                            if !failing {
                                warn!("Render failed: {}", e);
                                failing = true;
                            }
                        }
                    }
                }
            }
        }

        debug!("Render loop stopped");
        renderer
    })
}
