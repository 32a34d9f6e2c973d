use super::converter::DisplayConverter;
use crate::config::DisplayConfig;
use crate::error::DisplayError;
use image::RgbImage;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Something the renderer can paint composed frames onto
pub trait DisplaySurface: Send {
    fn size(&self) -> (u32, u32);

    /// Show a composed RGB image, scaled to the surface
    fn present(&mut self, image: &RgbImage) -> Result<(), DisplayError>;

    /// Blank the surface
    fn clear(&mut self) -> Result<(), DisplayError>;
}

/// Linux framebuffer in RGB565
pub struct FramebufferSurface {
    device: String,
    file: File,
    resolution: (u32, u32),
}

impl FramebufferSurface {
    pub fn open(device: &str, resolution: (u32, u32)) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|e| DisplayError::Framebuffer {
                details: format!("Failed to open {}: {}", device, e),
            })?;

        info!(
            "Framebuffer {} opened ({}x{})",
            device, resolution.0, resolution.1
        );

        Ok(Self {
            device: device.to_string(),
            file,
            resolution,
        })
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), DisplayError> {
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(data))
            .map_err(|e| DisplayError::Framebuffer {
                details: format!("Failed to write {}: {}", self.device, e),
            })
    }
}

impl DisplaySurface for FramebufferSurface {
    fn size(&self) -> (u32, u32) {
        self.resolution
    }

    fn present(&mut self, image: &RgbImage) -> Result<(), DisplayError> {
        let rgb565 =
            DisplayConverter::rgb24_to_rgb565(image.as_raw(), image.width(), image.height())?;
        let (width, height) = self.resolution;
        let scaled =
            DisplayConverter::scale_rgb565(&rgb565, image.width(), image.height(), width, height)?;
        self.write_frame(&scaled)
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        let (width, height) = self.resolution;
        let blank = vec![0u8; width as usize * height as usize * 2];
        self.write_frame(&blank)?;
        debug!("Framebuffer {} cleared", self.device);
        Ok(())
    }
}

/// Shared view into a [`MemorySurface`]
#[derive(Clone, Default)]
pub struct MemorySurfaceHandle {
    last: Arc<Mutex<Option<RgbImage>>>,
    presents: Arc<AtomicU64>,
    clears: Arc<AtomicU64>,
}

impl MemorySurfaceHandle {
    /// The image currently shown, `None` after a clear
    pub fn last_image(&self) -> Option<RgbImage> {
        self.last.lock().clone()
    }

    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> u64 {
        self.clears.load(Ordering::SeqCst)
    }
}

/// Headless surface keeping the last presented image
pub struct MemorySurface {
    resolution: (u32, u32),
    handle: MemorySurfaceHandle,
}

impl MemorySurface {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            resolution,
            handle: MemorySurfaceHandle::default(),
        }
    }

    pub fn handle(&self) -> MemorySurfaceHandle {
        self.handle.clone()
    }
}

impl DisplaySurface for MemorySurface {
    fn size(&self) -> (u32, u32) {
        self.resolution
    }

    fn present(&mut self, image: &RgbImage) -> Result<(), DisplayError> {
        *self.handle.last.lock() = Some(image.clone());
        self.handle.presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        *self.handle.last.lock() = None;
        self.handle.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Framebuffer unless running headless
pub fn create_surface(config: &DisplayConfig) -> Result<Box<dyn DisplaySurface>, DisplayError> {
    if config.headless {
        info!("Display running headless");
        return Ok(Box::new(MemorySurface::new(config.resolution)));
    }
    Ok(Box::new(FramebufferSurface::open(
        &config.framebuffer_device,
        config.resolution,
    )?))
}
