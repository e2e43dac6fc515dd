use std::sync::Arc;

use image::RgbImage;

use crate::{database::Point, mask::Mask};

#[cfg(feature = "sam")]
mod sam;

#[cfg(feature = "sam")]
pub use sam::SamSession;

#[derive(Debug, thiserror::Error, Clone)]
pub enum InferenceError {
    #[error("Allocation: {0:?}")]
    AllocationError(Arc<dyn std::error::Error + Send + Sync>),

    #[error("Other: {0:?}")]
    Other(Arc<dyn std::error::Error + Send + Sync>),

    #[error("Unexpected network output: {0}")]
    UnexpectedOutput(String),

    #[error("Image of size {width}x{height} can't be segmented")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("Mask of size {actual:?} doesn't match image of size {expected:?}")]
    MaskSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

impl From<std::num::TryFromIntError> for InferenceError {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self::Other(Arc::new(value))
    }
}

/// Promptable segmentation: image and point prompts in, object mask out
pub trait SegmentationOracle: Send {
    fn segment(
        &mut self,
        image: &Arc<RgbImage>,
        positive_points: &[Point],
        negative_points: &[Point],
    ) -> Result<Mask, InferenceError>;
}

/// Produces empty masks. Used when no model is available, so points and the
/// frame composite remain visible.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyOracle;

impl SegmentationOracle for EmptyOracle {
    fn segment(
        &mut self,
        image: &Arc<RgbImage>,
        _positive_points: &[Point],
        _negative_points: &[Point],
    ) -> Result<Mask, InferenceError> {
        Ok(Mask::empty(image.width(), image.height()))
    }
}
