use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Mutually exclusive colour bands used by the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectionCategory {
    Smoke,
    Fire,
    Other,
}

impl DetectionCategory {
    /// Smoke wins over fire when a label names both
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.contains("smoke") {
            DetectionCategory::Smoke
        } else if label.contains("fire") {
            DetectionCategory::Fire
        } else {
            DetectionCategory::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }

    pub fn category(&self) -> DetectionCategory {
        DetectionCategory::from_label(&self.label)
    }

    /// `label 87.5%`
    pub fn caption(&self) -> String {
        format!("{} {:.1}%", self.label, self.confidence * 100.0)
    }
}

/// Latest annotation result; immutable once published
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationSnapshot {
    pub detections: Vec<Detection>,
    pub fire_detected: bool,
    pub smoke_detected: bool,
    pub alert_text: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl AnnotationSnapshot {
    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }

    pub fn has_alert(&self) -> bool {
        self.alert_text
            .as_deref()
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Holds the current snapshot; every update replaces it wholesale
#[derive(Clone)]
pub struct AnnotationStore {
    sender: Arc<watch::Sender<Option<Arc<AnnotationSnapshot>>>>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Atomically publish a new snapshot
    pub fn replace(&self, snapshot: AnnotationSnapshot) {
        self.sender.send_replace(Some(Arc::new(snapshot)));
    }

    pub fn clear(&self) {
        self.sender.send_replace(None);
    }

    /// The complete snapshot current at the time of the call
    pub fn current(&self) -> Option<Arc<AnnotationSnapshot>> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AnnotationSnapshot>>> {
        self.sender.subscribe()
    }
}

impl Default for AnnotationStore {
    fn default() -> Self {
        Self::new()
    }
}
