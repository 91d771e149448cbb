use super::error::Result;
use super::transform::{apply_to_image, apply_to_mask, TransformMatrix};
use super::types::{ImageSize, Masks};
use image::{GrayImage, RgbImage};
use ndarray::{s, Array3, ArrayView2, ArrayView3, ArrayView4};

/// Converts images to encoder canvas tensors and decoder masks back to the
/// original resolution
pub struct Preprocessor {
    canvas: ImageSize,
}

impl Preprocessor {
    pub fn new(canvas: ImageSize) -> Self {
        Self { canvas }
    }

    pub fn canvas(&self) -> ImageSize {
        self.canvas
    }

    /// RGB image as an `(H, W, 3)` float tensor with raw 0-255 values
    pub fn to_hwc(image: &RgbImage) -> Array3<f32> {
        let (width, height) = image.dimensions();
        Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
            f32::from(image.get_pixel(x as u32, y as u32)[c])
        })
    }

    /// Warp an `(H, W, C)` image onto the canvas.
    ///
    /// Canvas area outside the scaled image is left at zero.
    pub fn preprocess(&self, image: ArrayView3<f32>, matrix: &TransformMatrix) -> Result<Array3<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();
        apply_to_image(image, matrix, self.canvas)
    }

    /// Resample decoder masks `(batch, candidates, H, W)` from canvas space to
    /// `original`, one plane at a time.
    ///
    /// Returns `(batch * candidates, original.height, original.width)`.
    pub fn postprocess_masks(
        masks: ArrayView4<f32>,
        inverse: &TransformMatrix,
        original: ImageSize,
    ) -> Result<Masks> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (batches, candidates, _, _) = masks.dim();
        let mut output = Masks::zeros((
            batches * candidates,
            original.height as usize,
            original.width as usize,
        ));

        for batch in 0..batches {
            for candidate in 0..candidates {
                let plane = masks.slice(s![batch, candidate, .., ..]);
                let restored = apply_to_mask(plane, inverse, original)?;
                output
                    .slice_mut(s![batch * candidates + candidate, .., ..])
                    .assign(&restored);
            }
        }

        Ok(output)
    }

    /// Binary visualisation of one mask plane: white where the score is above
    /// `threshold`
    pub fn mask_to_luma(mask: ArrayView2<f32>, threshold: f32) -> GrayImage {
        let (height, width) = mask.dim();
        GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = if mask[[y as usize, x as usize]] > threshold {
                255
            } else {
                0
            };
            image::Luma([value])
        })
    }
}
