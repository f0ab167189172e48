//! 2-D Fourier operators mapping exit waves to the detector plane.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

use crate::float_trait::PtychoFloat;

/// Scaling convention of the transform pair.
///
/// Every variant is a matched pair (`inverse(forward(x)) == x`); they only
/// differ in where the `1/N` factor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FftNorm {
    /// Both directions scaled by `1/sqrt(N)`; energy preserving.
    #[default]
    Ortho,
    /// Unscaled forward, `1/N` on the inverse.
    Backward,
    /// `1/N` on the forward, unscaled inverse.
    Forward,
}

/// Pre-computed FFT plans for one patch shape.
///
/// Plans are shared (`Arc`) so a single instance can be used from every
/// rayon worker.
pub struct FourierOps<F: PtychoFloat> {
    rows: usize,
    cols: usize,
    norm: FftNorm,
    centered: bool,
    fft_row: Arc<dyn Fft<F>>,
    fft_col: Arc<dyn Fft<F>>,
    ifft_row: Arc<dyn Fft<F>>,
    ifft_col: Arc<dyn Fft<F>>,
}

impl<F: PtychoFloat> FourierOps<F> {
    /// Create plans for `(rows, cols)` patches.
    ///
    /// With `centered`, inputs are `ifftshift`-ed before and outputs
    /// `fftshift`-ed after each transform, so the detector frame has its zero
    /// frequency at the centre.
    pub fn new(shape: (usize, usize), norm: FftNorm, centered: bool) -> Self {
        let (rows, cols) = shape;
        let mut planner = FftPlanner::new();
        Self {
            rows,
            cols,
            norm,
            centered,
            fft_row: planner.plan_fft_forward(cols),
            fft_col: planner.plan_fft_forward(rows),
            ifft_row: planner.plan_fft_inverse(cols),
            ifft_col: planner.plan_fft_inverse(rows),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn norm(&self) -> FftNorm {
        self.norm
    }

    /// Factor by which `forward` scales the L2 norm of its input.
    pub fn forward_gain(&self) -> F {
        let n = F::usize_as(self.rows * self.cols);
        match self.norm {
            FftNorm::Ortho => F::one(),
            FftNorm::Backward => n.sqrt(),
            FftNorm::Forward => F::one() / n.sqrt(),
        }
    }

    fn scale(&self, direction: FftDirection) -> F {
        let n = F::usize_as(self.rows * self.cols);
        match (self.norm, direction) {
            (FftNorm::Ortho, _) => F::one() / n.sqrt(),
            (FftNorm::Backward, FftDirection::Forward) => F::one(),
            (FftNorm::Backward, FftDirection::Inverse) => F::one() / n,
            (FftNorm::Forward, FftDirection::Forward) => F::one() / n,
            (FftNorm::Forward, FftDirection::Inverse) => F::one(),
        }
    }

    /// Forward 2-D transform of one patch.
    pub fn forward(&self, x: ArrayView2<Complex<F>>) -> Array2<Complex<F>> {
        self.transform(x, FftDirection::Forward)
    }

    /// Inverse 2-D transform of one patch.
    pub fn inverse(&self, x: ArrayView2<Complex<F>>) -> Array2<Complex<F>> {
        self.transform(x, FftDirection::Inverse)
    }

    /// Forward transform of every patch in a `(n, rows, cols)` stack.
    pub fn forward_stack(&self, x: ArrayView3<Complex<F>>) -> Array3<Complex<F>> {
        self.transform_stack(x, FftDirection::Forward)
    }

    /// Inverse transform of every patch in a `(n, rows, cols)` stack.
    pub fn inverse_stack(&self, x: ArrayView3<Complex<F>>) -> Array3<Complex<F>> {
        self.transform_stack(x, FftDirection::Inverse)
    }

    fn transform_stack(
        &self,
        x: ArrayView3<Complex<F>>,
        direction: FftDirection,
    ) -> Array3<Complex<F>> {
        let mut output = Array3::from_elem(x.dim(), F::czero());
        output
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut dst, src)| dst.assign(&self.transform(src, direction)));
        output
    }

    fn transform(&self, x: ArrayView2<Complex<F>>, direction: FftDirection) -> Array2<Complex<F>> {
        debug_assert_eq!(x.dim(), (self.rows, self.cols));
        let (row_plan, col_plan) = match direction {
            FftDirection::Forward => (&self.fft_row, &self.fft_col),
            FftDirection::Inverse => (&self.ifft_row, &self.ifft_col),
        };

        let mut data = if self.centered {
            ifftshift2(x)
        } else {
            x.to_owned()
        };

        // 1. Transform rows
        let mut row_vec = vec![F::czero(); self.cols];
        for mut row in data.rows_mut() {
            for (dst, v) in row_vec.iter_mut().zip(row.iter()) {
                *dst = *v;
            }
            row_plan.process(&mut row_vec);
            for (dst, v) in row.iter_mut().zip(row_vec.iter()) {
                *dst = *v;
            }
        }

        // 2. Transform columns, applying the normalization on the way out
        let scale = self.scale(direction);
        let mut col_vec = vec![F::czero(); self.rows];
        for mut col in data.columns_mut() {
            for (dst, v) in col_vec.iter_mut().zip(col.iter()) {
                *dst = *v;
            }
            col_plan.process(&mut col_vec);
            for (dst, v) in col.iter_mut().zip(col_vec.iter()) {
                *dst = v.scale(scale);
            }
        }

        if self.centered {
            fftshift2(data.view())
        } else {
            data
        }
    }
}

/// Circularly shift both axes by `(shift_rows, shift_cols)`.
fn roll2<T: Copy>(x: ArrayView2<T>, shift_rows: usize, shift_cols: usize) -> Array2<T> {
    let (rows, cols) = x.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        x[[(r + rows - shift_rows) % rows, (c + cols - shift_cols) % cols]]
    })
}

/// Move the zero-frequency element to the centre (`numpy.fft.fftshift`).
pub fn fftshift2<T: Copy>(x: ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = x.dim();
    if rows == 0 || cols == 0 {
        return x.to_owned();
    }
    roll2(x, rows / 2, cols / 2)
}

/// Inverse of [`fftshift2`] (`numpy.fft.ifftshift`); differs for odd sizes.
pub fn ifftshift2<T: Copy>(x: ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = x.dim();
    if rows == 0 || cols == 0 {
        return x.to_owned();
    }
    roll2(x, rows - rows / 2, cols - cols / 2)
}
