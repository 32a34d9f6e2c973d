use crate::annotation::{AnnotationSnapshot, Detection, DetectionCategory};
use crate::error::DisplayError;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use tracing::warn;

pub const SMOKE_COLOR: Rgb<u8> = Rgb([0, 165, 255]);
pub const FIRE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const OTHER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 3;
/// Share of the background kept under translucent panels
const PANEL_KEEP_PERCENT: u16 = 30;

pub fn category_color(category: DetectionCategory) -> Rgb<u8> {
    match category {
        DetectionCategory::Smoke => SMOKE_COLOR,
        DetectionCategory::Fire => FIRE_COLOR,
        DetectionCategory::Other => OTHER_COLOR,
    }
}

/// Font used for captions and the status panel
pub struct OverlayFont {
    font: Font<'static>,
    scale: Scale,
    size: f32,
}

impl OverlayFont {
    pub fn load(path: &str, size: f32) -> Result<Self, DisplayError> {
        let data = std::fs::read(path).map_err(|e| DisplayError::FontLoad {
            path: path.to_string(),
            details: e.to_string(),
        })?;
        Self::from_bytes(data, size).ok_or_else(|| DisplayError::FontLoad {
            path: path.to_string(),
            details: "not a TrueType font".to_string(),
        })
    }

    pub fn from_bytes(data: Vec<u8>, size: f32) -> Option<Self> {
        Font::try_from_vec(data).map(|font| Self {
            font,
            scale: Scale::uniform(size),
            size,
        })
    }

    fn draw(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
        draw_text_mut(image, color, x, y, self.scale, &self.font, text);
    }

    fn measure(&self, text: &str) -> (i32, i32) {
        text_size(self.scale, &self.font, text)
    }
}

/// Values shown in the top-left status panel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusLine {
    pub detections: usize,
    pub display_fps: f64,
    pub processing_fps: u32,
}

impl StatusLine {
    pub fn lines(&self) -> [String; 3] {
        [
            format!("Detections: {}", self.detections),
            format!("FPS: {}", self.display_fps.round() as i64),
            format!("Processed: {}/s", self.processing_fps),
        ]
    }
}

/// Detection boxes, captions, fire/smoke badge and alert banner
pub fn draw_annotations(
    image: &mut RgbImage,
    snapshot: &AnnotationSnapshot,
    font: Option<&OverlayFont>,
) {
    for detection in &snapshot.detections {
        draw_detection(image, detection, font);
    }

    if let Some(font) = font {
        draw_badge(image, snapshot, font);
        if let Some(alert) = snapshot.alert_text.as_deref().filter(|_| snapshot.has_alert()) {
            draw_alert_banner(image, alert, font);
        }
    }
}

fn draw_detection(image: &mut RgbImage, detection: &Detection, font: Option<&OverlayFont>) {
    let Some(rect) = clamp_to_image(image, detection) else {
        return;
    };
    let color = category_color(detection.category());
    let (x, y) = (rect.left(), rect.top());

    for inset in 0..BOX_THICKNESS {
        let w = rect.width().saturating_sub(inset * 2);
        let h = rect.height().saturating_sub(inset * 2);
        if w == 0 || h == 0 {
            break;
        }
        draw_hollow_rect_mut(
            image,
            Rect::at(x + inset as i32, y + inset as i32).of_size(w, h),
            color,
        );
    }

    if let Some(font) = font {
        // Caption sits above the box, pushed down when the box touches the top edge
        let caption_y = (y - 10 - font.size as i32).max(6);
        font.draw(image, color, x, caption_y, &detection.caption());
    }
}

/// Box limited to the image bounds; `None` when nothing of it is visible
fn clamp_to_image(image: &RgbImage, detection: &Detection) -> Option<Rect> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let bbox = detection.bbox;
    if ![bbox.x1, bbox.y1, bbox.x2, bbox.y2].iter().all(|v| v.is_finite()) {
        return None;
    }

    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    if bbox.x2 < 0.0 || bbox.y2 < 0.0 || bbox.x1 > max_x || bbox.y1 > max_y {
        return None;
    }

    let x1 = bbox.x1.clamp(0.0, max_x).round();
    let y1 = bbox.y1.clamp(0.0, max_y).round();
    let x2 = bbox.x2.clamp(0.0, max_x).round();
    let y2 = bbox.y2.clamp(0.0, max_y).round();
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(Rect::at(x1 as i32, y1 as i32).of_size((x2 - x1) as u32, (y2 - y1) as u32))
}

/// "FIRE!" when fire is flagged, otherwise "SMOKE" when smoke is
fn draw_badge(image: &mut RgbImage, snapshot: &AnnotationSnapshot, font: &OverlayFont) {
    let (text, color) = if snapshot.fire_detected {
        ("FIRE!", FIRE_COLOR)
    } else if snapshot.smoke_detected {
        ("SMOKE", SMOKE_COLOR)
    } else {
        return;
    };

    let (text_width, text_height) = font.measure(text);
    let x = image.width() as i32 - text_width - 20;
    let y = 10;

    draw_filled_rect_mut(
        image,
        Rect::at(x - 8, y).of_size(text_width as u32 + 16, text_height as u32 + 12),
        color,
    );
    font.draw(image, TEXT_COLOR, x, y + 6, text);
}

fn draw_alert_banner(image: &mut RgbImage, text: &str, font: &OverlayFont) {
    let banner_height = font.size as u32 + 16;
    let top = image.height().saturating_sub(banner_height);
    darken(image, 0, top, image.width(), banner_height);
    font.draw(image, TEXT_COLOR, 10, top as i32 + 8, text);
}

/// Translucent panel with detection count, display rate and processing target
pub fn draw_status(image: &mut RgbImage, status: &StatusLine, font: Option<&OverlayFont>) {
    darken(image, 10, 10, 200, 60);

    let Some(font) = font else {
        return;
    };
    for (row, line) in status.lines().iter().enumerate() {
        font.draw(image, TEXT_COLOR, 20, 16 + row as i32 * 20, line);
    }
}

/// Blend a rectangle towards black
fn darken(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32) {
    let x_end = (x + width).min(image.width());
    let y_end = (y + height).min(image.height());

    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            let pixel = image.get_pixel_mut(px, py);
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as u16 * PANEL_KEEP_PERCENT / 100) as u8;
            }
        }
    }
}

/// Load the configured font, carrying on without text when it is missing
pub fn load_font_or_warn(path: &str, size: f32) -> Option<OverlayFont> {
    match OverlayFont::load(path, size) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("{}; overlay text disabled", e);
            None
        }
    }
}
