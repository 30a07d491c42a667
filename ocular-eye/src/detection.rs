//! Detection types shared between the engine, the adapter and the wire

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default confidence threshold for a fresh session
pub const DEFAULT_CONFIDENCE: f32 = 0.05;
/// Default IoU threshold used by non-maximum suppression
pub const DEFAULT_IOU: f32 = 0.45;
/// Default cap on detections per frame
pub const DEFAULT_MAX_DETECTIONS: usize = 100;

/// Region of interest in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Roi {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// A region is usable when every corner is finite and it has a positive area.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: f32,
    /// x1, y1, x2, y2 in source pixel coordinates
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    #[serde(rename = "class")]
    pub label: String,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            confidence,
            bbox,
            label: label.into(),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// Parameters captured for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: usize,
    /// Active label vocabulary, in the order the client sent it
    pub labels: Vec<String>,
    pub roi: Option<Roi>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            max_detections: DEFAULT_MAX_DETECTIONS,
            labels: Vec::new(),
            roi: None,
        }
    }
}

impl DetectionParams {
    /// True when `label` passes the active vocabulary. An empty vocabulary
    /// lets every label through.
    pub fn accepts_label(&self, label: &str) -> bool {
        self.labels.is_empty() || self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Detections for every frame of a batch, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub frames: Vec<Vec<Detection>>,
    /// Wall time of the engine call for the whole batch
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Batch time split evenly across its frames, in seconds.
    pub fn per_frame_seconds(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.elapsed.as_secs_f64() / self.frames.len() as f64
    }
}
