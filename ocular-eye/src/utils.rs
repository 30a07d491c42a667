//! Utility functions for vision processing

use crate::detection::Detection;
use crate::error::EyeError;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Gray used by YOLO letterbox padding
const PAD_VALUE: f32 = 114.0 / 255.0;

/// How an image was placed inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    /// Map a box from model input space back to source pixels, clamped to
    /// the source image.
    pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        let w = self.orig_w as f32;
        let h = self.orig_h as f32;
        [
            ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
            ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
            ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
            ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

/// Letterbox `image` into a `size`x`size` square and write it as normalized
/// CHW floats into `out`, which must hold exactly `3 * size * size` values.
pub fn letterbox_into(image: &RgbImage, size: u32, out: &mut [f32]) -> Result<Letterbox, EyeError> {
    if size == 0 {
        return Err(EyeError::Config("Input size cannot be zero".to_string()));
    }
    let plane = (size as usize)
        .checked_mul(size as usize)
        .ok_or_else(|| EyeError::Config("Input size would overflow".to_string()))?;
    if out.len() != plane * 3 {
        return Err(EyeError::Inference(format!(
            "Tensor slice holds {} values, expected {}",
            out.len(),
            plane * 3
        )));
    }

    let (orig_w, orig_h) = image.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return Err(EyeError::Inference("Invalid image dimensions".to_string()));
    }

    let scale = (size as f32 / orig_w as f32).min(size as f32 / orig_h as f32);
    let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    out.fill(PAD_VALUE);
    let side = size as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y + pad_y) as usize * side + (x + pad_x) as usize;
        out[idx] = pixel[0] as f32 / 255.0;
        out[plane + idx] = pixel[1] as f32 / 255.0;
        out[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }

    Ok(Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w,
        orig_h,
    })
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes
pub fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);

    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;

    let union = area_a + area_b - inter;
    if union <= 0.0 || !union.is_finite() {
        return 0.0;
    }
    (inter / union).clamp(0.0, 1.0)
}

/// Class-aware non-maximum suppression.
///
/// Returns survivors sorted by descending confidence, at most `max_det` of them.
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32, max_det: usize) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len().min(max_det));
    for candidate in detections {
        if keep.len() >= max_det {
            break;
        }
        let suppressed = keep.iter().any(|kept| {
            kept.label == candidate.label && compute_iou(&kept.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
