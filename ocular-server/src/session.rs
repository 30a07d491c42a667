// Per-connection session state

use crate::batch::{BatchController, BatchPhase};
use crate::debug_sink::DebugSink;
use crate::error::SessionError;
use crate::protocol::{ConfigUpdate, Outbound, ResultFraming};
use bytes::Bytes;
use ocular_eye::detection::{DEFAULT_CONFIDENCE, DEFAULT_IOU, DEFAULT_MAX_DETECTIONS};
use ocular_eye::{DetectionAdapter, DetectionParams, Roi};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Detection settings a client can change mid-stream
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub confidence: f32,
    pub iou: f32,
    pub max_det: usize,
    pub roi: Option<Roi>,
    /// Active label vocabulary, deduplicated, in client order
    pub labels: Vec<String>,
    pub save_images: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            max_det: DEFAULT_MAX_DETECTIONS,
            roi: None,
            labels: Vec::new(),
            save_images: false,
        }
    }
}

impl SessionSettings {
    /// Merge the fields present in `update`. Out-of-range values are
    /// skipped; the names of skipped fields are returned.
    pub fn apply(&mut self, update: &ConfigUpdate) -> Vec<&'static str> {
        let mut ignored = Vec::new();

        if let Some(labels) = &update.keywords {
            self.labels = labels.clone();
        }
        if let Some(confidence) = update.confidence {
            if confidence > 0.0 && confidence <= 1.0 {
                self.confidence = confidence;
            } else {
                ignored.push("confidence");
            }
        }
        if let Some(iou) = update.iou {
            if (0.0..=1.0).contains(&iou) {
                self.iou = iou;
            } else {
                ignored.push("iou");
            }
        }
        if let Some(max_det) = update.max_det {
            if max_det > 0 {
                self.max_det = max_det;
            } else {
                ignored.push("max_det");
            }
        }
        match update.roi {
            Some(Some(roi)) if roi.is_valid() => self.roi = Some(roi),
            Some(Some(_)) => ignored.push("roi"),
            Some(None) => self.roi = None,
            None => {}
        }
        if let Some(save_images) = update.save_images {
            self.save_images = save_images;
        }

        ignored
    }

    /// Settings frozen for one batch
    pub fn snapshot(&self) -> DetectionParams {
        DetectionParams {
            confidence: self.confidence,
            iou: self.iou,
            max_detections: self.max_det,
            labels: self.labels.clone(),
            roi: self.roi,
        }
    }
}

/// One client connection: its settings, pending batch and in-flight work
pub struct Session {
    id: String,
    settings: SessionSettings,
    batch: BatchController,
    debug_sink: Option<DebugSink>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        adapter: DetectionAdapter,
        debug_sink: Option<DebugSink>,
        outbound: mpsc::UnboundedSender<Outbound>,
        framing: ResultFraming,
    ) -> Self {
        Self {
            id: id.into(),
            settings: SessionSettings::default(),
            batch: BatchController::new(adapter, outbound, framing),
            debug_sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn phase(&self) -> BatchPhase {
        self.batch.phase()
    }

    pub fn in_flight(&self) -> usize {
        self.batch.in_flight()
    }

    /// Add a frame to the pending batch, queueing a debug copy when saving is on
    pub fn append(&mut self, frame: Bytes) {
        if self.settings.save_images {
            if let Some(sink) = &self.debug_sink {
                sink.persist(frame.clone());
            }
        }
        self.batch.append(frame);
    }

    pub fn configure(&mut self, update: &ConfigUpdate) {
        let ignored = self.settings.apply(update);
        if !ignored.is_empty() {
            warn!("Session {} ignored out-of-range settings: {:?}", self.id, ignored);
        }
        info!(
            "Session {} settings: labels={:?} confidence={} iou={} max_det={} roi={:?} save_images={}",
            self.id,
            self.settings.labels,
            self.settings.confidence,
            self.settings.iou,
            self.settings.max_det,
            self.settings.roi,
            self.settings.save_images
        );
    }

    /// Release the pending batch under the current settings
    pub fn release(&mut self) -> Option<u64> {
        let pending = self.batch.pending_len();
        let seq = self.batch.release(self.settings.snapshot())?;
        info!("Session {} released batch {} ({} frames)", self.id, seq, pending);
        Some(seq)
    }

    pub async fn join_next(&mut self) -> Option<Result<(), SessionError>> {
        self.batch.join_next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.confidence, 0.05);
        assert_eq!(settings.iou, 0.45);
        assert_eq!(settings.max_det, 100);
        assert!(settings.roi.is_none());
        assert!(settings.labels.is_empty());
        assert!(!settings.save_images);
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut settings = SessionSettings::default();
        settings.apply(&ConfigUpdate {
            keywords: Some(vec!["cup".to_string()]),
            iou: Some(0.6),
            roi: Some(Some(Roi::new(0.0, 0.0, 10.0, 10.0))),
            ..Default::default()
        });

        let ignored = settings.apply(&ConfigUpdate {
            confidence: Some(0.3),
            ..Default::default()
        });
        assert!(ignored.is_empty());
        assert_eq!(settings.confidence, 0.3);
        assert_eq!(settings.iou, 0.6);
        assert_eq!(settings.labels, vec!["cup".to_string()]);
        assert!(settings.roi.is_some());
    }

    #[test]
    fn test_apply_ignores_out_of_range() {
        let mut settings = SessionSettings::default();
        let ignored = settings.apply(&ConfigUpdate {
            confidence: Some(0.0),
            iou: Some(1.5),
            max_det: Some(0),
            roi: Some(Some(Roi::new(5.0, 5.0, 1.0, 1.0))),
            save_images: Some(true),
            ..Default::default()
        });
        assert_eq!(ignored, vec!["confidence", "iou", "max_det", "roi"]);
        assert_eq!(settings.confidence, 0.05);
        assert_eq!(settings.iou, 0.45);
        assert_eq!(settings.max_det, 100);
        assert!(settings.roi.is_none());
        assert!(settings.save_images);
    }

    #[test]
    fn test_roi_null_clears() {
        let mut settings = SessionSettings {
            roi: Some(Roi::new(0.0, 0.0, 1.0, 1.0)),
            ..Default::default()
        };
        settings.apply(&ConfigUpdate {
            roi: Some(None),
            ..Default::default()
        });
        assert!(settings.roi.is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut settings = SessionSettings::default();
        let before = settings.snapshot();
        settings.apply(&ConfigUpdate {
            keywords: Some(vec!["phone".to_string()]),
            confidence: Some(0.9),
            ..Default::default()
        });
        assert_eq!(before.confidence, 0.05);
        assert!(before.labels.is_empty());

        let after = settings.snapshot();
        assert_eq!(after.confidence, 0.9);
        assert_eq!(after.labels, vec!["phone".to_string()]);
    }
}
