//! Frame codec: raw client payloads to RGB images

use crate::error::EyeError;
use bytes::Bytes;
use image::io::{Limits, Reader};
use image::{GenericImageView, ImageError, RgbImage};
use std::io::Cursor;

/// Largest frame edge accepted from a client
const MAX_FRAME_EDGE: u32 = 8192;

/// A decoded frame in 8-bit RGB
#[derive(Debug, Clone)]
pub struct DecodedImage {
    rgb: RgbImage,
}

impl DecodedImage {
    pub fn from_rgb(rgb: RgbImage) -> Self {
        Self { rgb }
    }

    /// A black image, used for engine warm-up.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            rgb: RgbImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.rgb
    }
}

/// Decode one frame. The container format is sniffed from the payload.
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedImage, EyeError> {
    decode_indexed(0, bytes)
}

/// Decode every frame of a batch, preserving order. The first undecodable
/// frame fails the whole batch.
pub fn decode_batch(frames: &[Bytes]) -> Result<Vec<DecodedImage>, EyeError> {
    frames
        .iter()
        .enumerate()
        .map(|(index, frame)| decode_indexed(index, frame))
        .collect()
}

/// Decoder limits applied from the header, before any pixel buffer exists
pub fn frame_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_FRAME_EDGE);
    limits.max_image_height = Some(MAX_FRAME_EDGE);
    limits
}

fn decode_indexed(index: usize, bytes: &[u8]) -> Result<DecodedImage, EyeError> {
    if bytes.is_empty() {
        return Err(EyeError::Decode {
            index,
            reason: "empty payload".to_string(),
        });
    }

    let mut reader = Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| EyeError::Decode {
            index,
            reason: e.to_string(),
        })?;
    reader.limits(frame_limits());

    let image = reader.decode().map_err(|e| EyeError::Decode {
        index,
        reason: match e {
            ImageError::Limits(_) => format!("image exceeds {}px edge limit", MAX_FRAME_EDGE),
            other => other.to_string(),
        },
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(EyeError::Decode {
            index,
            reason: "zero-sized image".to_string(),
        });
    }
    Ok(DecodedImage::from_rgb(image.to_rgb8()))
}
