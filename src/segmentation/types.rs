use super::error::{Result, SegmentationError};
use super::transform::TransformMatrix;
use image::RgbImage;
use ndarray::{Array3, ArrayD};

/// Height and width of an image or tensor plane, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Size of an RGB image (the `image` crate reports width first)
    pub fn of(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self { height, width }
    }

    /// Size from an ndarray shape, reading the leading `(H, W, ..)` axes
    pub fn from_shape(shape: &[usize]) -> Option<Self> {
        match shape {
            [h, w, ..] => Some(Self {
                height: u32::try_from(*h).ok()?,
                width: u32::try_from(*w).ok()?,
            }),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    /// Fails with `DegenerateSize` if either side is zero
    pub fn ensure_non_degenerate(&self, context: &'static str) -> Result<()> {
        if self.is_empty() {
            return Err(SegmentationError::DegenerateSize {
                context,
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }
}

/// Input canvas of the encoder network.
///
/// Letterboxed rather than square: the exported encoder takes a 684x1024 HWC
/// tensor and leaves unused rows at the bottom.
pub const CANVAS_SIZE: ImageSize = ImageSize::new(684, 1024);

/// Long side of the decoder's logical coordinate space
pub const LONG_SIDE_LENGTH: u32 = 1024;

/// Side of the (unused) low-resolution mask prompt fed to the decoder
pub const MASK_INPUT_SIZE: usize = 256;

/// Mask scores at original resolution, shaped `(candidates, height, width)`.
///
/// Values are decoder logits; a pixel belongs to the object when its score is
/// above zero.
pub type Masks = Array3<f32>;

/// Output of one `encode` call.
///
/// The embedding is only meaningful together with the size and matrix captured
/// alongside it, so the three travel as one value owned by the caller.
#[derive(Debug, Clone)]
pub struct EmbeddingBundle {
    embedding: ArrayD<f32>,
    original_size: ImageSize,
    transform: TransformMatrix,
}

impl EmbeddingBundle {
    /// Reassemble a bundle from its parts, e.g. after restoring a cached
    /// embedding. Consistency is checked when the bundle is used.
    pub fn from_parts(
        embedding: ArrayD<f32>,
        original_size: ImageSize,
        transform: TransformMatrix,
    ) -> Self {
        Self {
            embedding,
            original_size,
            transform,
        }
    }

    pub fn embedding(&self) -> &ArrayD<f32> {
        &self.embedding
    }

    pub fn original_size(&self) -> ImageSize {
        self.original_size
    }

    pub fn transform(&self) -> &TransformMatrix {
        &self.transform
    }

    pub fn into_parts(self) -> (ArrayD<f32>, ImageSize, TransformMatrix) {
        (self.embedding, self.original_size, self.transform)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.embedding.is_empty() {
            return Err(SegmentationError::InvalidBundle(format!(
                "embedding is empty (shape {:?})",
                self.embedding.shape()
            )));
        }
        if let Some(bad) = self.embedding.iter().find(|v| !v.is_finite()) {
            return Err(SegmentationError::InvalidBundle(format!(
                "embedding contains non-finite value {bad}"
            )));
        }
        if self.original_size.is_empty() {
            return Err(SegmentationError::InvalidBundle(format!(
                "original size {}x{} is degenerate",
                self.original_size.width, self.original_size.height
            )));
        }
        Ok(())
    }
}
