//! Patch extraction and overlap-summing back-projection.
//!
//! `extract_patches` cuts one sub-image per scan position out of a full
//! image; `accumulate_patches` is its adjoint, summing every patch back into
//! a zero image. Overlapping rectangles add up, which is why the update
//! functions divide the back-projected gradient by a weight map.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_traits::Zero;
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use std::ops::AddAssign;

use crate::error::{ReconError, Result};
use crate::float_trait::PtychoFloat;

/// Half-open integer rectangle `[row_start, row_end) x [col_start, col_end)`
/// covered by the probe at one scan position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchBounds {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl PatchBounds {
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    /// Rectangle of the given `(rows, cols)` shape whose top-left corner is `(row, col)`.
    pub fn from_origin(row: usize, col: usize, shape: (usize, usize)) -> Self {
        Self::new(row, row + shape.0, col, col + shape.1)
    }

    /// `(rows, cols)` extent; zero for inverted rectangles.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.row_end.saturating_sub(self.row_start),
            self.col_end.saturating_sub(self.col_start),
        )
    }

    /// True when the rectangle is non-empty and lies inside an image of `image_shape`.
    pub fn contained_in(&self, image_shape: (usize, usize)) -> bool {
        self.row_start < self.row_end
            && self.col_start < self.col_end
            && self.row_end <= image_shape.0
            && self.col_end <= image_shape.1
    }
}

/// Check that every rectangle fits inside `image_shape` and has extent `patch_shape`.
pub fn validate_bounds(
    bounds: &[PatchBounds],
    image_shape: (usize, usize),
    patch_shape: (usize, usize),
) -> Result<()> {
    for (index, b) in bounds.iter().enumerate() {
        if !b.contained_in(image_shape) {
            return Err(ReconError::PatchOutOfBounds {
                index,
                bounds: *b,
                image_shape,
            });
        }
        if b.shape() != patch_shape {
            return Err(ReconError::ShapeMismatch(format!(
                "patch {} has extent {:?}, expected {:?}",
                index,
                b.shape(),
                patch_shape
            )));
        }
    }
    Ok(())
}

/// Copy the sub-image under every rectangle into a `(n, rows, cols)` stack.
///
/// All rectangles must share one extent. Patches are filled in parallel.
pub fn extract_patches<T>(image: ArrayView2<T>, bounds: &[PatchBounds]) -> Result<Array3<T>>
where
    T: Copy + Zero + Send + Sync,
{
    let Some(first) = bounds.first() else {
        return Ok(Array3::zeros((0, 0, 0)));
    };
    let patch_shape = first.shape();
    validate_bounds(bounds, image.dim(), patch_shape)?;

    let mut patches = Array3::<T>::zeros((bounds.len(), patch_shape.0, patch_shape.1));
    patches
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(bounds.par_iter())
        .for_each(|(mut dst, b)| {
            dst.assign(&image.slice(s![b.row_start..b.row_end, b.col_start..b.col_end]));
        });
    Ok(patches)
}

/// Sum every patch into its rectangle of a zero image of `target_shape`.
///
/// This is the adjoint of [`extract_patches`]. It runs on the calling thread
/// so the shared image has a single writer.
pub fn accumulate_patches<T>(
    patches: ArrayView3<T>,
    bounds: &[PatchBounds],
    target_shape: (usize, usize),
) -> Result<Array2<T>>
where
    T: Copy + Zero + AddAssign,
{
    let (n, rows, cols) = patches.dim();
    if n != bounds.len() {
        return Err(ReconError::ShapeMismatch(format!(
            "{} patches supplied for {} patch bounds",
            n,
            bounds.len()
        )));
    }
    validate_bounds(bounds, target_shape, (rows, cols))?;

    let mut image = Array2::<T>::zeros(target_shape);
    for (patch, b) in patches.outer_iter().zip(bounds) {
        image
            .slice_mut(s![b.row_start..b.row_end, b.col_start..b.col_end])
            .zip_mut_with(&patch, |acc, &v| *acc += v);
    }
    Ok(image)
}

/// Object weight map: `|probe|²` accumulated over every scan position.
pub fn overlap_weight<F: PtychoFloat>(
    probe: ArrayView2<Complex<F>>,
    bounds: &[PatchBounds],
    image_shape: (usize, usize),
) -> Result<Array2<F>> {
    let (rows, cols) = probe.dim();
    let intensity = probe.mapv(|z| z.norm_sqr());
    let stacked = intensity
        .broadcast((bounds.len(), rows, cols))
        .ok_or_else(|| {
            ReconError::ShapeMismatch(format!("cannot broadcast probe of shape {:?}", probe.dim()))
        })?;
    accumulate_patches(stacked, bounds, image_shape)
}

/// Probe weight map: `Σ_j |patch_j|²` over the patch axis.
pub fn patch_energy<F: PtychoFloat>(patches: ArrayView3<Complex<F>>) -> Array2<F> {
    patches.mapv(|z| z.norm_sqr()).sum_axis(Axis(0))
}
