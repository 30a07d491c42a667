//! YOLO object detection model on ONNX Runtime

use crate::codec::DecodedImage;
use crate::config::{Device, EngineSettings};
use crate::detection::{Detection, DetectionParams};
use crate::engine::DetectionEngine;
use crate::error::EyeError;
use crate::models::labels::{load_labels, unknown_keywords};
use crate::models::postprocess::decode_output;
use crate::utils::letterbox_into;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info, warn};

fn ort_error(err: impl std::fmt::Display) -> EyeError {
    EyeError::Ort(err.to_string())
}

/// YOLO model for batched object detection
pub struct YoloEngine {
    session: Session,
    input_name: String,
    output_name: String,
    labels: Vec<String>,
    input_size: u32,
    model_name: String,
    device: String,
    /// Vocabulary last checked against the label set
    checked_keywords: Vec<String>,
}

impl YoloEngine {
    /// Load the model described by `settings`
    pub fn new(settings: &EngineSettings) -> Result<Self, EyeError> {
        settings.validate().map_err(EyeError::Config)?;

        if !settings.path.exists() {
            return Err(EyeError::Model(format!(
                "Model file not found: {:?}",
                settings.path
            )));
        }

        let labels = load_labels(settings.labels_path.as_deref())?;
        let device = resolve_device(settings.device);

        let builder = Session::builder().map_err(ort_error)?;
        let builder = if device == Device::Cuda {
            builder
                .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
                .map_err(ort_error)?
        } else {
            builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .map_err(ort_error)?
        };
        let session = builder
            .commit_from_file(&settings.path)
            .map_err(|e| EyeError::Model(format!("Failed to load YOLO model: {}", e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| EyeError::Model("Model declares no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| EyeError::Model("Model declares no outputs".to_string()))?;

        info!(
            "YOLO model loaded from {:?} on {} ({} labels)",
            settings.path,
            device,
            labels.len()
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            labels,
            input_size: settings.input_size,
            model_name: settings.model_name(),
            device: device.to_string(),
            checked_keywords: Vec::new(),
        })
    }
}

/// Resolve `auto` to the device that will actually run inference.
fn resolve_device(requested: Device) -> Device {
    match requested {
        Device::Cpu => Device::Cpu,
        Device::Cuda => Device::Cuda,
        Device::Auto => match CUDAExecutionProvider::default().is_available() {
            Ok(true) => Device::Cuda,
            Ok(false) => Device::Cpu,
            Err(e) => {
                warn!("Could not probe CUDA availability, using CPU: {}", e);
                Device::Cpu
            }
        },
    }
}

impl YoloEngine {
    /// Warn once per vocabulary change about keywords the model cannot emit
    fn check_keywords(&mut self, keywords: &[String]) {
        if self.checked_keywords == keywords {
            return;
        }
        let unknown = unknown_keywords(keywords, &self.labels);
        if !unknown.is_empty() {
            warn!(
                "Keywords {:?} match no label of {}; they will never produce detections",
                unknown, self.model_name
            );
        }
        self.checked_keywords = keywords.to_vec();
    }
}

impl DetectionEngine for YoloEngine {
    fn name(&self) -> String {
        self.model_name.clone()
    }

    fn device(&self) -> String {
        self.device.clone()
    }

    fn predict(
        &mut self,
        images: &[DecodedImage],
        params: &DetectionParams,
    ) -> Result<Vec<Vec<Detection>>, EyeError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        self.check_keywords(&params.labels);

        let side = self.input_size as usize;
        let plane = 3 * side * side;
        let total = images
            .len()
            .checked_mul(plane)
            .ok_or_else(|| EyeError::Inference("Batch tensor would overflow".to_string()))?;

        // Stack every letterboxed image along the batch axis: [N, 3, S, S]
        let mut input = vec![0.0f32; total];
        let mut letterboxes = Vec::with_capacity(images.len());
        for (image, chunk) in images.iter().zip(input.chunks_mut(plane)) {
            letterboxes.push(letterbox_into(image.as_rgb(), self.input_size, chunk)?);
        }

        let tensor = Tensor::from_array(([images.len(), 3, side, side], input)).map_err(ort_error)?;
        let input_name = self.input_name.clone();
        let output_name = self.output_name.clone();

        let (dims, data) = {
            let outputs = self
                .session
                .run(ort::inputs![input_name => tensor])
                .map_err(|e| EyeError::Inference(format!("YOLO inference failed: {}", e)))?;
            let (shape, data) = outputs[output_name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(ort_error)?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            (dims, data.to_vec())
        };
        debug!("YOLO output shape: {:?}", dims);

        decode_output(&dims, &data, &letterboxes, &self.labels, params)
    }

    fn warm_up(&mut self) -> Result<(), EyeError> {
        let blank = DecodedImage::blank(self.input_size, self.input_size);
        self.predict(&[blank], &DetectionParams::default())?;
        Ok(())
    }
}
