//! Detection models and output decoding

pub mod labels;
pub mod postprocess;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use labels::{load_labels, COCO_CLASSES};
#[cfg(feature = "onnx")]
pub use yolo::YoloEngine;
