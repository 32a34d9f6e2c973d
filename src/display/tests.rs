use super::*;
use crate::annotation::{AnnotationSnapshot, AnnotationStore, BoundingBox, Detection};
use crate::camera::FrameReader;
use crate::frame::RawFrame;
use crate::stats::StatsTracker;
use chrono::Utc;
use image::Rgb;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

struct TestRig {
    renderer: Renderer,
    handle: MemorySurfaceHandle,
    frames: watch::Sender<Option<RawFrame>>,
    store: AnnotationStore,
    stats: Arc<StatsTracker>,
}

fn create_test_rig() -> TestRig {
    let surface = MemorySurface::new((800, 480));
    let handle = surface.handle();
    let (frames, receiver) = watch::channel(None);
    let store = AnnotationStore::new();
    let stats = Arc::new(StatsTracker::new(10));
    let (_fps_tx, fps_rx) = watch::channel(2u32);

    let renderer = Renderer::new(
        Box::new(surface),
        None,
        FrameReader::new(receiver),
        store.clone(),
        Arc::clone(&stats),
        fps_rx,
    );

    TestRig {
        renderer,
        handle,
        frames,
        store,
        stats,
    }
}

fn grey_frame(id: u64) -> RawFrame {
    RawFrame::new(id, vec![128u8; 320 * 240 * 3], 320, 240, SystemTime::now())
}

fn fire_snapshot() -> AnnotationSnapshot {
    AnnotationSnapshot {
        detections: vec![
            Detection::new("fire", 0.9, BoundingBox::new(250.0, 150.0, 300.0, 200.0)),
            Detection::new("smoke", 0.6, BoundingBox::new(220.0, 100.0, 260.0, 140.0)),
            Detection::new("fire", 0.7, BoundingBox::new(100.0, 150.0, 140.0, 190.0)),
        ],
        fire_detected: true,
        smoke_detected: true,
        alert_text: Some("Fire detected".to_string()),
        received_at: Utc::now(),
    }
}

#[test]
fn test_rgb24_to_rgb565_conversion() {
    let rgb24_data = vec![
        255, 0, 0, // Red
        0, 255, 0, // Green
        0, 0, 255, // Blue
    ];

    let rgb565_data = DisplayConverter::rgb24_to_rgb565(&rgb24_data, 3, 1).unwrap();
    assert_eq!(rgb565_data, vec![0x00, 0xF8, 0xE0, 0x07, 0x1F, 0x00]);
}

#[test]
fn test_rgb24_to_rgb565_invalid_size() {
    let invalid_data = vec![255, 0];
    let result = DisplayConverter::rgb24_to_rgb565(&invalid_data, 1, 1);
    assert!(result.is_err());
}

#[test]
fn test_rgb565_scaling() {
    let src_data = vec![
        0x00, 0xF8, // Red pixel
        0xE0, 0x07, // Green pixel
        0x1F, 0x00, // Blue pixel
        0xFF, 0xFF, // White pixel
    ];

    let scaled_data = DisplayConverter::scale_rgb565(&src_data, 2, 2, 4, 4).unwrap();
    assert_eq!(scaled_data.len(), 32);
    // Top-left 2x2 block repeats the red pixel
    assert_eq!(&scaled_data[0..4], &[0x00, 0xF8, 0x00, 0xF8]);
    assert_eq!(&scaled_data[8..10], &[0x00, 0xF8]);
}

#[test]
fn test_framebuffer_surface_writes_scaled_rgb565() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_string_lossy().into_owned();
    let mut surface = FramebufferSurface::open(&path, (8, 4)).unwrap();

    let image = image::RgbImage::from_pixel(4, 2, Rgb([255, 0, 0]));
    surface.present(&image).unwrap();

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), 8 * 4 * 2);
    assert!(written.chunks(2).all(|px| px == [0x00, 0xF8]));

    surface.clear().unwrap();
    let written = std::fs::read(&path).unwrap();
    assert!(written.iter().all(|b| *b == 0));
}

#[test]
fn test_framebuffer_open_failure() {
    let result = FramebufferSurface::open("/nonexistent/fb0", (800, 480));
    assert!(matches!(
        result,
        Err(crate::error::DisplayError::Framebuffer { .. })
    ));
}

#[test]
fn test_nothing_drawn_before_first_frame() {
    let mut rig = create_test_rig();
    assert!(!rig.renderer.render_tick().unwrap());
    assert_eq!(rig.handle.present_count(), 0);
}

#[test]
fn test_tick_draws_frame_and_overlay() {
    let mut rig = create_test_rig();
    rig.frames.send_replace(Some(grey_frame(1)));
    rig.store.replace(fire_snapshot());

    assert!(rig.renderer.render_tick().unwrap());
    let shown = rig.handle.last_image().unwrap();
    assert_eq!(shown.dimensions(), (320, 240));

    // Fire box edge, smoke box edge, untouched background
    assert_eq!(*shown.get_pixel(250, 175), FIRE_COLOR);
    assert_eq!(*shown.get_pixel(220, 120), SMOKE_COLOR);
    assert_eq!(*shown.get_pixel(200, 220), Rgb([128, 128, 128]));
    // Status panel darkened
    assert_eq!(*shown.get_pixel(100, 40), Rgb([38, 38, 38]));
}

#[test]
fn test_render_counts_feed_display_fps() {
    let mut rig = create_test_rig();
    rig.frames.send_replace(Some(grey_frame(1)));

    let start = tokio::time::Instant::now();
    rig.stats.tick(start);
    for _ in 0..30 {
        rig.renderer.render_tick().unwrap();
    }
    let stats = rig.stats.tick(start + Duration::from_secs(1));
    assert!((stats.display_fps - 30.0).abs() < 1e-9);
}

#[test]
fn test_last_frame_is_kept_when_camera_stalls() {
    let mut rig = create_test_rig();
    rig.frames.send_replace(Some(grey_frame(1)));
    rig.renderer.render_tick().unwrap();

    rig.frames.send_replace(None);
    assert!(rig.renderer.render_tick().unwrap());
    assert_eq!(rig.handle.present_count(), 2);
}

#[tokio::test]
async fn test_render_loop_stops_synchronously() {
    let rig = create_test_rig();
    rig.frames.send_replace(Some(grey_frame(1)));
    let handle = rig.handle.clone();

    let cancel = CancellationToken::new();
    let task = spawn_render_loop(rig.renderer, 120, cancel.clone());

    crate::testing::wait_until(Duration::from_secs(2), || handle.present_count() >= 3).await;

    cancel.cancel();
    let mut renderer = task.await.unwrap();
    let presented = handle.present_count();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.present_count(), presented);

    renderer.clear().unwrap();
    assert!(handle.last_image().is_none());
    assert_eq!(handle.clear_count(), 1);
}

#[tokio::test]
async fn test_render_loop_survives_out_of_range_boxes() {
    let rig = create_test_rig();
    rig.frames.send_replace(Some(grey_frame(1)));
    rig.store.replace(AnnotationSnapshot {
        detections: vec![
            Detection::new("fire", 0.9, BoundingBox::new(3e9, 0.0, 4e9, 20.0)),
            Detection::new("smoke", 0.8, BoundingBox::new(-5e7, -5e7, 5e7, 5e7)),
        ],
        fire_detected: true,
        smoke_detected: true,
        alert_text: None,
        received_at: Utc::now(),
    });
    let handle = rig.handle.clone();

    let cancel = CancellationToken::new();
    let task = spawn_render_loop(rig.renderer, 120, cancel.clone());

    crate::testing::wait_until(Duration::from_secs(2), || handle.present_count() >= 3).await;
    cancel.cancel();
    task.await.unwrap();

    let shown = handle.last_image().unwrap();
    assert_eq!(*shown.get_pixel(0, 120), SMOKE_COLOR);
}
