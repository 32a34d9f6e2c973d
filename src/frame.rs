use image::RgbImage;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Decoded RGB24 frame pulled from the camera
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Monotonic frame identifier within a capture session
    pub id: u64,
    /// Packed RGB24 pixels (shared ownership for cheap clones)
    pub pixels: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when the frame was captured
    pub captured_at: SystemTime,
}

impl RawFrame {
    pub fn new(id: u64, pixels: Vec<u8>, width: u32, height: u32, captured_at: SystemTime) -> Self {
        Self {
            id,
            pixels: Arc::new(pixels),
            width,
            height,
            captured_at,
        }
    }

    /// Expected buffer length for an RGB24 frame of this size
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn validate_size(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.expected_len()
    }

    /// Capture time as milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> i64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    /// Copy the pixels into an owned image, `None` when the buffer is malformed
    pub fn to_image(&self) -> Option<RgbImage> {
        if !self.validate_size() {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.pixels.as_ref().clone())
    }
}

/// Compact payload ready for the transport channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Identifier of the raw frame this payload was produced from
    pub source_id: u64,
    /// `data:image/jpeg;base64,...` URL
    pub payload: String,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl EncodedFrame {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_size_validation() {
        let frame = RawFrame::new(1, vec![0u8; 4 * 2 * 3], 4, 2, SystemTime::now());
        assert!(frame.validate_size());
        assert!(frame.to_image().is_some());

        let truncated = RawFrame::new(2, vec![0u8; 10], 4, 2, SystemTime::now());
        assert!(!truncated.validate_size());
        assert!(truncated.to_image().is_none());
    }

    #[test]
    fn test_timestamp_ms() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let frame = RawFrame::new(1, vec![0u8; 3], 1, 1, at);
        assert_eq!(frame.timestamp_ms(), 1_700_000_000_123);
    }
}
