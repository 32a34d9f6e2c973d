//! JSON framing for the annotation stream.
//!
//! Outgoing: `{"frame": "data:image/jpeg;base64,...", "timestamp": 1700000000000}`
//!
//! Incoming is either `{"status": "frame_received"}` or an annotation result in
//! which every field is optional:
//! `{"detections": [{"label", "confidence", "box": [x1, y1, x2, y2]}], "fire_detected",
//! "smoke_detected", "alert", "voice_alert", "processing_time"}`

use crate::annotation::{AnnotationSnapshot, BoundingBox, Detection};
use crate::error::ChannelError;
use crate::frame::EncodedFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ACK_STATUS: &str = "frame_received";

#[derive(Debug, Serialize)]
struct OutgoingFrame<'a> {
    frame: &'a str,
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detections: Option<Vec<WireDetection>>,
    #[serde(default)]
    fire_detected: Option<bool>,
    #[serde(default)]
    smoke_detected: Option<bool>,
    #[serde(default)]
    alert: Option<String>,
    #[serde(default)]
    voice_alert: Option<String>,
    #[serde(default)]
    processing_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    #[serde(rename = "box")]
    bbox: [f32; 4],
}

/// Decoded annotation payload
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationResult {
    pub detections: Vec<Detection>,
    pub fire_detected: bool,
    pub smoke_detected: bool,
    pub alert: Option<String>,
    pub voice_alert: Option<String>,
    pub processing_time_ms: Option<f64>,
}

impl AnnotationResult {
    /// Text to speak; only a non-empty `voice_alert` is spoken
    pub fn spoken_alert(&self) -> Option<&str> {
        self.voice_alert
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    pub fn to_snapshot(&self, received_at: DateTime<Utc>) -> AnnotationSnapshot {
        AnnotationSnapshot {
            detections: self.detections.clone(),
            fire_detected: self.fire_detected,
            smoke_detected: self.smoke_detected,
            alert_text: self.alert.clone().filter(|text| !text.trim().is_empty()),
            received_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// The service received a frame; nothing to draw
    Ack,
    Annotation(AnnotationResult),
}

pub fn encode_outgoing(frame: &EncodedFrame) -> Result<String, ChannelError> {
    serde_json::to_string(&OutgoingFrame {
        frame: &frame.payload,
        timestamp: frame.timestamp_ms,
    })
    .map_err(|e| ChannelError::ProtocolError {
        details: format!("Failed to serialize frame {}: {}", frame.source_id, e),
    })
}

pub fn decode_incoming(text: &str) -> Result<IncomingMessage, ChannelError> {
    let wire: WireMessage =
        serde_json::from_str(text).map_err(|e| ChannelError::ProtocolError {
            details: e.to_string(),
        })?;

    if wire.status.as_deref() == Some(ACK_STATUS) {
        return Ok(IncomingMessage::Ack);
    }

    let detections = wire
        .detections
        .unwrap_or_default()
        .into_iter()
        .map(|d| {
            let [x1, y1, x2, y2] = d.bbox;
            Detection::new(d.label, d.confidence, BoundingBox::new(x1, y1, x2, y2))
        })
        .collect();

    Ok(IncomingMessage::Annotation(AnnotationResult {
        detections,
        fire_detected: wire.fire_detected.unwrap_or(false),
        smoke_detected: wire.smoke_detected.unwrap_or(false),
        alert: wire.alert,
        voice_alert: wire.voice_alert,
        processing_time_ms: wire.processing_time,
    }))
}
