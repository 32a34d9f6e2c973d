use crate::config::EncoderConfig;
use crate::error::EncodeError;
use crate::frame::{EncodedFrame, RawFrame};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use tracing::trace;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Converts sampled frames into JPEG data URLs
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Pick the quality hint for the current platform class
    pub fn for_platform(config: &EncoderConfig, mobile: bool) -> Self {
        Self::new(config.quality_for(mobile))
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<EncodedFrame, EncodeError> {
        encode_frame(frame, self.quality)
    }
}

/// Encode a raw frame at the given JPEG quality. Pure and deterministic.
pub fn encode_frame(frame: &RawFrame, quality: u8) -> Result<EncodedFrame, EncodeError> {
    if !frame.validate_size() {
        return Err(EncodeError::UnreadableSource {
            details: format!(
                "frame {} holds {} bytes, expected {} for {}x{}",
                frame.id,
                frame.pixels.len(),
                frame.expected_len(),
                frame.width,
                frame.height
            ),
        });
    }

    let mut jpeg = Vec::with_capacity(frame.pixels.len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(&frame.pixels, frame.width, frame.height, ColorType::Rgb8)
        .map_err(|e| EncodeError::Jpeg {
            details: e.to_string(),
        })?;

    let mut payload = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    payload.push_str(DATA_URL_PREFIX);
    STANDARD.encode_string(&jpeg, &mut payload);

    trace!(
        "Encoded frame {} ({}x{}) to {} bytes at quality {}",
        frame.id,
        frame.width,
        frame.height,
        payload.len(),
        quality
    );

    Ok(EncodedFrame {
        source_id: frame.id,
        payload,
        timestamp_ms: frame.timestamp_ms(),
    })
}
