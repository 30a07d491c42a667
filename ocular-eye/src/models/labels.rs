//! Class-name vocabularies

use crate::error::EyeError;
use std::path::Path;

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Parse a label file: one class name per line, blank lines and `#`
/// comments skipped.
pub fn parse_labels(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Load labels from `path`, or the COCO names when no path is configured.
pub fn load_labels(path: Option<&Path>) -> Result<Vec<String>, EyeError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            let labels = parse_labels(&contents);
            if labels.is_empty() {
                return Err(EyeError::Config(format!(
                    "Label file {:?} contains no labels",
                    path
                )));
            }
            Ok(labels)
        }
        None => Ok(COCO_CLASSES.iter().map(|s| s.to_string()).collect()),
    }
}

/// Keywords that match no model label. A vocabulary made only of these
/// filters out every detection.
pub fn unknown_keywords<'a>(keywords: &'a [String], labels: &[String]) -> Vec<&'a str> {
    keywords
        .iter()
        .filter(|k| !labels.iter().any(|l| l.eq_ignore_ascii_case(k)))
        .map(String::as_str)
        .collect()
}
