//! Detection engine trait

use crate::codec::DecodedImage;
use crate::detection::{Detection, DetectionParams};
use crate::error::EyeError;

/// A batch-capable object detector.
///
/// Engines are synchronous and may hold non-reentrant native state, so they
/// take `&mut self`. The [`DetectionAdapter`](crate::adapter::DetectionAdapter)
/// serializes access and moves calls off the async runtime.
#[cfg_attr(test, mockall::automock)]
pub trait DetectionEngine: Send {
    /// Model identity reported by the health endpoint
    fn name(&self) -> String;

    /// Compute device the engine runs on
    fn device(&self) -> String;

    /// Run detection over a whole batch.
    ///
    /// Must return exactly one detection list per input image, in input order.
    fn predict(
        &mut self,
        images: &[DecodedImage],
        params: &DetectionParams,
    ) -> Result<Vec<Vec<Detection>>, EyeError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), EyeError> {
        Ok(())
    }
}
