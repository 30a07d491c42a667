//! YOLO output decoding

use crate::detection::{Detection, DetectionParams};
use crate::error::EyeError;
use crate::utils::{apply_nms, Letterbox};

/// Memory layout of a YOLO head output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `[batch, 4 + classes, anchors]`, the ultralytics export default
    FeaturesFirst,
    /// `[batch, anchors, 4 + classes]`
    AnchorsFirst,
}

fn detect_layout(dims: &[usize], num_labels: usize) -> Layout {
    if dims[1] == num_labels + 4 {
        Layout::FeaturesFirst
    } else if dims[2] == num_labels + 4 {
        Layout::AnchorsFirst
    } else if dims[1] <= dims[2] {
        Layout::FeaturesFirst
    } else {
        Layout::AnchorsFirst
    }
}

/// Turn a raw `[N, 4 + C, A]` (or transposed) output into per-image
/// detections in source pixel coordinates.
///
/// Filtering order: confidence, label vocabulary, region of interest,
/// then class-aware NMS truncated to `max_detections`.
pub fn decode_output(
    dims: &[usize],
    data: &[f32],
    letterboxes: &[Letterbox],
    labels: &[String],
    params: &DetectionParams,
) -> Result<Vec<Vec<Detection>>, EyeError> {
    if dims.len() != 3 {
        return Err(EyeError::Inference(format!(
            "Expected a rank-3 output, got shape {:?}",
            dims
        )));
    }
    if dims[0] != letterboxes.len() {
        return Err(EyeError::BatchMismatch {
            expected: letterboxes.len(),
            actual: dims[0],
        });
    }
    let expected_len = dims.iter().product::<usize>();
    if data.len() != expected_len {
        return Err(EyeError::Inference(format!(
            "Output holds {} values, shape {:?} needs {}",
            data.len(),
            dims,
            expected_len
        )));
    }

    let layout = detect_layout(dims, labels.len());
    let (features, anchors) = match layout {
        Layout::FeaturesFirst => (dims[1], dims[2]),
        Layout::AnchorsFirst => (dims[2], dims[1]),
    };
    if features < 5 {
        return Err(EyeError::Inference(format!(
            "Output has {} features per anchor, need at least 5",
            features
        )));
    }
    let num_classes = features - 4;
    let per_image = features * anchors;

    let value = |image: usize, feature: usize, anchor: usize| -> f32 {
        let base = image * per_image;
        match layout {
            Layout::FeaturesFirst => data[base + feature * anchors + anchor],
            Layout::AnchorsFirst => data[base + anchor * features + feature],
        }
    };

    let mut results = Vec::with_capacity(letterboxes.len());
    for (image, letterbox) in letterboxes.iter().enumerate() {
        let mut candidates = Vec::new();

        for anchor in 0..anchors {
            let mut best_class = 0;
            let mut best_score = f32::MIN;
            for class in 0..num_classes {
                let score = value(image, 4 + class, anchor);
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }

            if !best_score.is_finite() || best_score < params.confidence {
                continue;
            }

            let label = labels
                .get(best_class)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", best_class));
            if !params.accepts_label(&label) {
                continue;
            }

            let cx = value(image, 0, anchor);
            let cy = value(image, 1, anchor);
            let w = value(image, 2, anchor);
            let h = value(image, 3, anchor);
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
                continue;
            }

            let bbox = letterbox.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
            if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
                continue;
            }

            let detection = Detection::new(label, best_score.clamp(0.0, 1.0), bbox);
            if let Some(roi) = params.roi {
                let (x, y) = detection.center();
                if !roi.contains(x, y) {
                    continue;
                }
            }
            candidates.push(detection);
        }

        results.push(apply_nms(candidates, params.iou, params.max_detections));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Roi;

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 100,
            orig_h: 100,
        }
    }

    fn labels() -> Vec<String> {
        vec!["cup".to_string(), "phone".to_string()]
    }

    /// Build a features-first `[1, 6, anchors]` tensor from
    /// `(cx, cy, w, h, cup_score, phone_score)` rows.
    fn tensor(rows: &[[f32; 6]]) -> (Vec<usize>, Vec<f32>) {
        let anchors = rows.len();
        let mut data = vec![0.0; 6 * anchors];
        for (a, row) in rows.iter().enumerate() {
            for (f, v) in row.iter().enumerate() {
                data[f * anchors + a] = *v;
            }
        }
        (vec![1, 6, anchors], data)
    }

    #[test]
    fn test_decode_filters_by_confidence() {
        let (dims, data) = tensor(&[
            [50.0, 50.0, 20.0, 20.0, 0.9, 0.1],
            [20.0, 20.0, 10.0, 10.0, 0.01, 0.02],
        ]);
        let params = DetectionParams {
            confidence: 0.3,
            ..Default::default()
        };
        let out = decode_output(&dims, &data, &[identity_letterbox()], &labels(), &params).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0].label, "cup");
        assert_eq!(out[0][0].bbox, [40.0, 40.0, 60.0, 60.0]);
    }

    #[test]
    fn test_decode_applies_vocabulary() {
        let (dims, data) = tensor(&[
            [50.0, 50.0, 20.0, 20.0, 0.9, 0.1],
            [10.0, 10.0, 10.0, 10.0, 0.1, 0.8],
        ]);
        let params = DetectionParams {
            labels: vec!["phone".to_string()],
            ..Default::default()
        };
        let out = decode_output(&dims, &data, &[identity_letterbox()], &labels(), &params).unwrap();
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0].label, "phone");
    }

    #[test]
    fn test_decode_applies_roi() {
        let (dims, data) = tensor(&[
            [50.0, 50.0, 20.0, 20.0, 0.9, 0.1],
            [10.0, 10.0, 10.0, 10.0, 0.1, 0.8],
        ]);
        let params = DetectionParams {
            roi: Some(Roi::new(0.0, 0.0, 30.0, 30.0)),
            ..Default::default()
        };
        let out = decode_output(&dims, &data, &[identity_letterbox()], &labels(), &params).unwrap();
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0].label, "phone");
    }

    #[test]
    fn test_decode_anchors_first_layout() {
        // [1, 2 anchors, 6 features]
        let data = vec![
            50.0, 50.0, 20.0, 20.0, 0.9, 0.1, //
            10.0, 10.0, 10.0, 10.0, 0.0, 0.0,
        ];
        let params = DetectionParams {
            confidence: 0.5,
            ..Default::default()
        };
        let out =
            decode_output(&[1, 2, 6], &data, &[identity_letterbox()], &labels(), &params).unwrap();
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0].label, "cup");
    }

    #[test]
    fn test_decode_rejects_batch_mismatch() {
        let (dims, data) = tensor(&[[50.0, 50.0, 20.0, 20.0, 0.9, 0.1]]);
        let err = decode_output(
            &dims,
            &data,
            &[identity_letterbox(), identity_letterbox()],
            &labels(),
            &DetectionParams::default(),
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_rejects_bad_rank() {
        let err = decode_output(&[1, 6], &[0.0; 6], &[identity_letterbox()], &labels(), &DetectionParams::default())
            .unwrap_err();
        assert!(matches!(err, EyeError::Inference(_)));
    }
}
