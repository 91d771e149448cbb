//! Affine mapping between original-image pixels and the encoder canvas.
//!
//! Forward direction is a uniform scale about the origin chosen so the whole
//! image fits the canvas. Prompt points additionally go through the
//! long-side rescale before the matrix is applied, in that order.

use super::error::{Result, SegmentationError};
use super::types::ImageSize;
use ndarray::{arr2, Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Determinants with a smaller magnitude are treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// 3x3 homogeneous affine matrix, row-major
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix {
    rows: [[f64; 3]; 3],
}

impl TransformMatrix {
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self { rows }
    }

    /// Uniform scale about the origin
    pub fn scale(factor: f64) -> Self {
        Self::from_rows([[factor, 0.0, 0.0], [0.0, factor, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn identity() -> Self {
        Self::scale(1.0)
    }

    pub fn rows(&self) -> &[[f64; 3]; 3] {
        &self.rows
    }

    pub fn to_array(&self) -> Array2<f64> {
        arr2(&self.rows)
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.rows;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Standard 3x3 inverse via the adjugate
    pub fn invert(&self) -> Result<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return Err(SegmentationError::SingularMatrix { determinant: det });
        }

        let m = &self.rows;
        let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        // Transposed cofactor matrix
        let adjugate = [
            [cofactor(1, 2, 1, 2), -cofactor(0, 2, 1, 2), cofactor(0, 1, 1, 2)],
            [-cofactor(1, 2, 0, 2), cofactor(0, 2, 0, 2), -cofactor(0, 1, 0, 2)],
            [cofactor(1, 2, 0, 1), -cofactor(0, 2, 0, 1), cofactor(0, 1, 0, 1)],
        ];

        let mut rows = [[0.0; 3]; 3];
        for (r, row) in adjugate.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                rows[r][c] = value / det;
            }
        }
        Ok(Self { rows })
    }

    /// Map a single point, ignoring any projective row
    pub fn apply_to_point(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.rows;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// Map points as homogeneous rows `(x, y, 1)` right-multiplied by the
    /// transposed matrix, keeping the first two columns
    pub fn apply_to_points(&self, points: &[[f32; 2]]) -> Vec<[f32; 2]> {
        let homogeneous = Array2::from_shape_fn((points.len(), 3), |(i, j)| match j {
            0 | 1 => f64::from(points[i][j]),
            _ => 1.0,
        });
        let mapped = homogeneous.dot(&self.to_array().t());
        mapped
            .outer_iter()
            .map(|row| [row[0] as f32, row[1] as f32])
            .collect()
    }
}

/// Uniform scale that fits `original` inside `canvas` without cropping
pub fn compute_forward(original: ImageSize, canvas: ImageSize) -> Result<TransformMatrix> {
    original.ensure_non_degenerate("image")?;
    canvas.ensure_non_degenerate("canvas")?;

    let scale_x = f64::from(canvas.width) / f64::from(original.width);
    let scale_y = f64::from(canvas.height) / f64::from(original.height);
    let scale = scale_x.min(scale_y);

    tracing::debug!(
        "Forward transform {}x{} -> {}x{}: scale_x={:.4}, scale_y={:.4}, scale={:.4}",
        original.width,
        original.height,
        canvas.width,
        canvas.height,
        scale_x,
        scale_y,
        scale
    );

    Ok(TransformMatrix::scale(scale))
}

/// Size after scaling `(old_h, old_w)` so its long side equals `long_side`,
/// rounding half up
pub fn preprocess_shape(old_h: u32, old_w: u32, long_side: u32) -> (u32, u32) {
    let scale = f64::from(long_side) / f64::from(old_h.max(old_w));
    let new_h = (f64::from(old_h) * scale + 0.5) as u32;
    let new_w = (f64::from(old_w) * scale + 0.5) as u32;
    (new_h, new_w)
}

fn rescale_factors(size: ImageSize, long_side: u32) -> Result<(f64, f64)> {
    size.ensure_non_degenerate("rescale reference")?;
    let (new_h, new_w) = preprocess_shape(size.height, size.width, long_side);
    Ok((
        f64::from(new_w) / f64::from(size.width),
        f64::from(new_h) / f64::from(size.height),
    ))
}

/// Shape-preserving rescale of pixel coordinates in `size` into the
/// long-side-normalized space
pub fn rescale_coords(points: &[[f32; 2]], size: ImageSize, long_side: u32) -> Result<Vec<[f32; 2]>> {
    let (fx, fy) = rescale_factors(size, long_side)?;
    Ok(points
        .iter()
        .map(|[x, y]| [(f64::from(*x) * fx) as f32, (f64::from(*y) * fy) as f32])
        .collect())
}

/// Inverse of [`rescale_coords`].
///
/// Fails when the rescale collapsed a side to zero pixels, which happens for
/// aspect ratios beyond `2 * long_side`.
pub fn restore_coords(points: &[[f32; 2]], size: ImageSize, long_side: u32) -> Result<Vec<[f32; 2]>> {
    let (fx, fy) = rescale_factors(size, long_side)?;
    if fx == 0.0 || fy == 0.0 {
        let (height, width) = preprocess_shape(size.height, size.width, long_side);
        return Err(SegmentationError::DegenerateSize {
            context: "rescaled",
            height,
            width,
        });
    }
    Ok(points
        .iter()
        .map(|[x, y]| [(f64::from(*x) / fx) as f32, (f64::from(*y) / fy) as f32])
        .collect())
}

/// Resample an `(H, W, C)` image onto `output` using `matrix` (source to
/// destination) with bilinear interpolation.
///
/// Destination pixels sample the source at `matrix⁻¹ · (x, y)` on the integer
/// pixel grid. Taps falling outside the source read as zero and are not
/// renormalised, so uncovered canvas stays black and edges blend towards it.
pub fn warp_affine(
    source: ArrayView3<f32>,
    matrix: &TransformMatrix,
    output: ImageSize,
) -> Result<Array3<f32>> {
    let inverse = matrix.invert()?;
    let (src_h, src_w, channels) = source.dim();
    let (out_h, out_w) = (output.height as usize, output.width as usize);
    let mut warped = Array3::<f32>::zeros((out_h, out_w, channels));

    for y in 0..out_h {
        for x in 0..out_w {
            let (sx, sy) = inverse.apply_to_point(x as f64, y as f64);
            if !(sx > -1.0 && sy > -1.0 && sx < src_w as f64 && sy < src_h as f64) {
                continue;
            }

            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = (sx - x0, sy - y0);
            let (x0, y0) = (x0 as isize, y0 as isize);
            let taps = [
                (y0, x0, (1.0 - fx) * (1.0 - fy)),
                (y0, x0 + 1, fx * (1.0 - fy)),
                (y0 + 1, x0, (1.0 - fx) * fy),
                (y0 + 1, x0 + 1, fx * fy),
            ];

            for c in 0..channels {
                let mut acc = 0.0f64;
                for &(ty, tx, weight) in &taps {
                    if weight == 0.0
                        || ty < 0
                        || tx < 0
                        || ty as usize >= src_h
                        || tx as usize >= src_w
                    {
                        continue;
                    }
                    acc += weight * f64::from(source[[ty as usize, tx as usize, c]]);
                }
                warped[[y, x, c]] = acc as f32;
            }
        }
    }

    Ok(warped)
}

/// Resample an `(H, W, C)` image onto the canvas
pub fn apply_to_image(
    image: ArrayView3<f32>,
    matrix: &TransformMatrix,
    canvas: ImageSize,
) -> Result<Array3<f32>> {
    canvas.ensure_non_degenerate("canvas")?;
    warp_affine(image, matrix, canvas)
}

/// Resample one mask plane from canvas space back to `output` using the
/// canvas-to-original matrix
pub fn apply_to_mask(
    mask: ArrayView2<f32>,
    inverse: &TransformMatrix,
    output: ImageSize,
) -> Result<Array2<f32>> {
    output.ensure_non_degenerate("output")?;
    let warped = warp_affine(mask.insert_axis(Axis(2)), inverse, output)?;
    Ok(warped.index_axis_move(Axis(2), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::types::{CANVAS_SIZE, LONG_SIDE_LENGTH};
    use ndarray::Array3;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_forward_picks_smaller_scale() {
        let m = compute_forward(ImageSize::new(480, 640), CANVAS_SIZE).unwrap();
        assert!((m.rows()[0][0] - 1.425).abs() < 1e-12);
        assert!((m.rows()[1][1] - 1.425).abs() < 1e-12);
        assert_eq!(m.rows()[0][2], 0.0);
        assert_eq!(m.rows()[1][2], 0.0);

        // Portrait image is limited by height
        let m = compute_forward(ImageSize::new(1368, 512), CANVAS_SIZE).unwrap();
        assert!((m.rows()[0][0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_forward_rejects_degenerate_sizes() {
        assert!(matches!(
            compute_forward(ImageSize::new(0, 640), CANVAS_SIZE),
            Err(SegmentationError::DegenerateSize { context: "image", .. })
        ));
        assert!(matches!(
            compute_forward(ImageSize::new(480, 640), ImageSize::new(684, 0)),
            Err(SegmentationError::DegenerateSize { context: "canvas", .. })
        ));
    }

    #[test]
    fn test_invert_general_affine() {
        let m = TransformMatrix::from_rows([[2.0, 1.0, 3.0], [0.5, 4.0, -1.0], [0.0, 0.0, 1.0]]);
        let inv = m.invert().unwrap();
        let (x, y) = m.apply_to_point(7.0, -2.0);
        let (bx, by) = inv.apply_to_point(x, y);
        assert!((bx - 7.0).abs() < 1e-9);
        assert!((by + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_invert_rejects_singular() {
        let m = TransformMatrix::from_rows([[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(
            m.invert(),
            Err(SegmentationError::SingularMatrix { .. })
        ));
        assert!(TransformMatrix::scale(0.0).invert().is_err());
    }

    #[test]
    fn test_preprocess_shape_rounds_half_up() {
        assert_eq!(preprocess_shape(480, 640, 1024), (768, 1024));
        assert_eq!(preprocess_shape(684, 1024, 1024), (684, 1024));
        assert_eq!(preprocess_shape(2, 3, 4), (3, 4));
        assert_eq!(preprocess_shape(100, 100, 1024), (1024, 1024));
    }

    #[test]
    fn test_point_mapping_reference_scenario() {
        let original = ImageSize::new(480, 640);
        let matrix = compute_forward(original, CANVAS_SIZE).unwrap();

        let rescaled = rescale_coords(&[[100.0, 100.0]], original, LONG_SIDE_LENGTH).unwrap();
        assert_close(rescaled[0][0], 160.0);
        assert_close(rescaled[0][1], 160.0);

        let canvas = matrix.apply_to_points(&rescaled);
        assert_close(canvas[0][0], 228.0);
        assert_close(canvas[0][1], 228.0);

        let back = matrix.invert().unwrap().apply_to_points(&canvas);
        let back = restore_coords(&back, original, LONG_SIDE_LENGTH).unwrap();
        assert_close(back[0][0], 100.0);
        assert_close(back[0][1], 100.0);
    }

    #[test]
    fn test_rescale_on_canvas_reference_is_identity() {
        let points = [[12.5, 300.0], [0.0, 0.0]];
        let rescaled = rescale_coords(&points, CANVAS_SIZE, LONG_SIDE_LENGTH).unwrap();
        assert_eq!(rescaled, points.to_vec());
    }

    #[test]
    fn test_restore_rejects_collapsed_side() {
        let sliver = ImageSize::new(1, 4000);
        let rescaled = rescale_coords(&[[10.0, 0.7]], sliver, LONG_SIDE_LENGTH).unwrap();
        assert_eq!(rescaled[0][1], 0.0);
        assert!(matches!(
            restore_coords(&rescaled, sliver, LONG_SIDE_LENGTH),
            Err(SegmentationError::DegenerateSize { context: "rescaled", height: 0, width: 1024 })
        ));
    }

    #[test]
    fn test_apply_to_points_empty() {
        assert!(TransformMatrix::scale(3.0).apply_to_points(&[]).is_empty());
    }

    #[test]
    fn test_warp_identity_preserves_image() {
        let image = Array3::from_shape_fn((3, 4, 2), |(y, x, c)| (y * 10 + x + c * 100) as f32);
        let warped = warp_affine(image.view(), &TransformMatrix::identity(), ImageSize::new(3, 4)).unwrap();
        assert_eq!(warped, image);
    }

    #[test]
    fn test_warp_leaves_uncovered_canvas_black() {
        let image = Array3::from_elem((2, 2, 3), 9.0f32);
        let warped = apply_to_image(image.view(), &TransformMatrix::identity(), ImageSize::new(4, 4)).unwrap();
        assert_eq!(warped.dim(), (4, 4, 3));
        assert_eq!(warped[[0, 0, 0]], 9.0);
        assert_eq!(warped[[1, 1, 2]], 9.0);
        assert_eq!(warped[[2, 2, 0]], 0.0);
        assert_eq!(warped[[3, 0, 1]], 0.0);
        assert_eq!(warped[[0, 3, 1]], 0.0);
    }

    #[test]
    fn test_warp_bilinear_upscale() {
        // Horizontal ramp 0, 10, 20, 30
        let image = Array3::from_shape_fn((2, 4, 1), |(_, x, _)| x as f32 * 10.0);
        let warped = warp_affine(image.view(), &TransformMatrix::scale(2.0), ImageSize::new(2, 6)).unwrap();
        assert_close(warped[[0, 0, 0]], 0.0);
        assert_close(warped[[0, 1, 0]], 5.0);
        assert_close(warped[[0, 2, 0]], 10.0);
        assert_close(warped[[0, 5, 0]], 25.0);
    }

    #[test]
    fn test_mask_back_to_original_size() {
        let original = ImageSize::new(480, 640);
        let matrix = compute_forward(original, CANVAS_SIZE).unwrap();
        let inverse = matrix.invert().unwrap();

        let mut mask = Array2::<f32>::zeros((CANVAS_SIZE.height as usize, CANVAS_SIZE.width as usize));
        // Region covered by the scaled image: 684 x 912
        mask.slice_mut(ndarray::s![..684, ..912]).fill(4.0);

        let restored = apply_to_mask(mask.view(), &inverse, original).unwrap();
        assert_eq!(restored.dim(), (480, 640));
        assert_close(restored[[0, 0]], 4.0);
        assert_close(restored[[240, 320]], 4.0);
        assert_close(restored[[478, 638]], 4.0);
    }
}
