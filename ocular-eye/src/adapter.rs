//! Detection adapter: the async boundary around a blocking engine

use crate::codec::{decode_batch, DecodedImage};
use crate::detection::{BatchResult, DetectionParams};
use crate::engine::DetectionEngine;
use crate::error::EyeError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Shared handle to the process-wide detection engine.
///
/// Cloning is cheap. A single-permit semaphore is the submission queue:
/// batches from different sessions wait for it as async tasks and only
/// take a blocking-pool thread once they hold the engine.
#[derive(Clone)]
pub struct DetectionAdapter {
    engine: Arc<Mutex<Box<dyn DetectionEngine>>>,
    queue: Arc<Semaphore>,
    model_name: Arc<str>,
    device: Arc<str>,
}

impl DetectionAdapter {
    pub fn new(engine: Box<dyn DetectionEngine>) -> Self {
        let model_name: Arc<str> = engine.name().into();
        let device: Arc<str> = engine.device().into();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            queue: Arc::new(Semaphore::new(1)),
            model_name,
            device,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, EyeError> {
        self.queue
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EyeError::Inference("Engine queue closed".to_string()))
    }

    /// Run the engine's warm-up hook off the async runtime.
    pub async fn warm_up(&self) -> Result<(), EyeError> {
        let permit = self.acquire().await?;
        let engine = self.engine.clone();
        let start = Instant::now();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.lock().warm_up()
        })
        .await??;
        info!("Model warmed up in {:.3}s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Decode raw frames, then detect over them.
    ///
    /// Decoding runs on the blocking pool before the batch joins the engine
    /// queue, so the caller's receive loop never pays for it and a bad frame
    /// never waits behind other batches. Only the engine call counts towards
    /// the reported inference time.
    pub async fn detect_frames(
        &self,
        frames: Vec<Bytes>,
        params: DetectionParams,
    ) -> Result<BatchResult, EyeError> {
        let images = tokio::task::spawn_blocking(move || decode_batch(&frames)).await??;
        self.detect(images, params).await
    }

    /// Detect over already decoded images.
    ///
    /// The permit moves into the blocking job, so a caller that gives up
    /// while the engine runs does not let the next batch in early.
    pub async fn detect(
        &self,
        images: Vec<DecodedImage>,
        params: DetectionParams,
    ) -> Result<BatchResult, EyeError> {
        let permit = self.acquire().await?;
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_engine(&engine, &images, &params)
        })
        .await?
    }
}

fn run_engine(
    engine: &Mutex<Box<dyn DetectionEngine>>,
    images: &[DecodedImage],
    params: &DetectionParams,
) -> Result<BatchResult, EyeError> {
    let mut engine = engine.lock();
    debug!("Submitting batch of {} images to {}", images.len(), engine.name());

    let start = Instant::now();
    let frames = engine.predict(images, params)?;
    let elapsed = start.elapsed();

    if frames.len() != images.len() {
        return Err(EyeError::BatchMismatch {
            expected: images.len(),
            actual: frames.len(),
        });
    }

    info!(
        "Inference complete in {:.3}s for {} frames",
        elapsed.as_secs_f64(),
        images.len()
    );
    Ok(BatchResult { frames, elapsed })
}
