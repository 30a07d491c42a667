// Wire protocol for detection sessions

use bytes::Bytes;
use ocular_eye::{BatchResult, Detection, Roi};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;

/// `type` value that releases the pending batch
pub const RELEASE_TYPE: &str = "batch_complete";
/// Status text acknowledging a settings update
pub const SETTINGS_ACK: &str = "Settings received";

/// Inbound message, classified at the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Run inference over the pending batch
    Release,
    /// Merge new settings into the session
    Configure(ConfigUpdate),
    /// One encoded video frame
    Frame(Bytes),
    /// The client closed the connection
    Close,
}

/// A partial settings update. `None` means the field was absent or unusable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub keywords: Option<Vec<String>>,
    pub confidence: Option<f32>,
    pub iou: Option<f32>,
    pub max_det: Option<usize>,
    /// `Some(None)` clears the region, `Some(Some(_))` replaces it
    pub roi: Option<Option<Roi>>,
    pub save_images: Option<bool>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unrecognized control message: {0}")]
    Unrecognized(String),
}

/// Classify a text frame as a release or a settings update.
///
/// `type` wins over `keywords` when both are present. Individual fields
/// with the wrong type are dropped from the update instead of failing it.
pub fn parse_control(text: &str) -> Result<Inbound, ControlError> {
    let value: JsonValue =
        serde_json::from_str(text).map_err(|e| ControlError::InvalidJson(e.to_string()))?;

    let object = match value.as_object() {
        Some(object) => object,
        None => return Err(ControlError::Unrecognized(truncate(text))),
    };

    if object.get("type").and_then(JsonValue::as_str) == Some(RELEASE_TYPE) {
        return Ok(Inbound::Release);
    }
    if object.contains_key("keywords") {
        return Ok(Inbound::Configure(ConfigUpdate::from_object(object)));
    }
    Err(ControlError::Unrecognized(truncate(text)))
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl ConfigUpdate {
    fn from_object(object: &Map<String, JsonValue>) -> Self {
        Self {
            keywords: object.get("keywords").and_then(parse_keywords),
            confidence: object.get("confidence").and_then(as_f32),
            iou: object.get("iou").and_then(as_f32),
            max_det: object
                .get("max_det")
                .and_then(JsonValue::as_u64)
                .and_then(|n| usize::try_from(n).ok()),
            roi: object.get("roi").and_then(parse_roi),
            save_images: object.get("save_images").and_then(JsonValue::as_bool),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn as_f32(value: &JsonValue) -> Option<f32> {
    value.as_f64().map(|v| v as f32).filter(|v| v.is_finite())
}

/// Keywords must be an array of strings. Blank entries are skipped and
/// duplicates removed, first occurrence wins.
fn parse_keywords(value: &JsonValue) -> Option<Vec<String>> {
    let items = value.as_array()?;
    let mut keywords: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let keyword = item.as_str()?.trim();
        if keyword.is_empty() || keywords.iter().any(|k| k == keyword) {
            continue;
        }
        keywords.push(keyword.to_string());
    }
    Some(keywords)
}

fn parse_roi(value: &JsonValue) -> Option<Option<Roi>> {
    match value {
        JsonValue::Null => Some(None),
        JsonValue::Array(items) if items.len() == 4 => {
            let coords: Option<Vec<f32>> = items.iter().map(as_f32).collect();
            let c = coords?;
            Some(Some(Roi::new(c[0], c[1], c[2], c[3])))
        }
        JsonValue::Object(fields) => {
            let get = |key: &str| fields.get(key).and_then(as_f32);
            Some(Some(Roi::new(get("x1")?, get("y1")?, get("x2")?, get("y2")?)))
        }
        _ => None,
    }
}

/// Result entry for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub success: bool,
    pub detections: Vec<Detection>,
    /// Seconds, the batch inference time split evenly over its frames
    pub inference_time: f64,
}

/// Outbound message queued for a connection's send task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Ack,
    Results(Vec<FrameResult>),
    BatchFailed { error: String, frames: usize },
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Outbound::Ack => serde_json::to_string(&json!({ "status": SETTINGS_ACK })),
            Outbound::Results(entries) => serde_json::to_string(entries),
            Outbound::BatchFailed { error, frames } => serde_json::to_string(&json!([{
                "success": false,
                "error": error,
                "frames": frames,
            }])),
        }
    }
}

/// How a batch's results are split into outbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFraming {
    /// One message per frame, each a one-element array
    #[default]
    PerFrame,
    /// One message per release with every frame's entry in order
    PerBatch,
}

impl std::str::FromStr for ResultFraming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_frame" => Ok(ResultFraming::PerFrame),
            "per_batch" => Ok(ResultFraming::PerBatch),
            other => Err(format!(
                "Unknown result framing '{}' (expected per_frame or per_batch)",
                other
            )),
        }
    }
}

impl ResultFraming {
    pub fn messages(self, result: BatchResult) -> Vec<Outbound> {
        let inference_time = result.per_frame_seconds();
        let entries = result.frames.into_iter().map(|detections| FrameResult {
            success: true,
            detections,
            inference_time,
        });

        match self {
            ResultFraming::PerFrame => entries.map(|e| Outbound::Results(vec![e])).collect(),
            ResultFraming::PerBatch => {
                let entries: Vec<FrameResult> = entries.collect();
                if entries.is_empty() {
                    Vec::new()
                } else {
                    vec![Outbound::Results(entries)]
                }
            }
        }
    }
}
