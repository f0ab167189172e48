//! Reconstruction-quality metrics.
//!
//! Phase retrieval only determines the object up to a global complex factor,
//! so comparisons against ground truth go through [`phase_normalize`] first.

use ndarray::{Array2, ArrayView, ArrayView2, Dimension, Zip};
use rustfft::num_complex::Complex;

use crate::error::{ReconError, Result};
use crate::float_trait::PtychoFloat;

fn check_shape(what: &str, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(ReconError::ShapeMismatch(format!(
            "{} has shape {:?}, expected {:?}",
            what, got, expected
        )));
    }
    Ok(())
}

fn root_ratio<F: PtychoFloat>(num: F, den: F) -> Result<F> {
    if !(den > F::zero()) {
        return Err(ReconError::DegenerateMask(
            "reference has no energy inside the mask".to_string(),
        ));
    }
    Ok(num.sqrt() / den.sqrt())
}

/// Normalized root-mean-square error between complex arrays.
///
/// `sqrt(Σ|m·(est − ref)|²) / sqrt(Σ|m·ref|²)` with `m` defaulting to ones.
pub fn nrmse<F, D>(
    estimate: ArrayView<Complex<F>, D>,
    reference: ArrayView<Complex<F>, D>,
    mask: Option<ArrayView<F, D>>,
) -> Result<F>
where
    F: PtychoFloat,
    D: Dimension,
{
    check_shape("estimate", reference.shape(), estimate.shape())?;
    let zero = (F::zero(), F::zero());
    let (num, den) = match mask {
        Some(m) => {
            check_shape("mask", reference.shape(), m.shape())?;
            Zip::from(&estimate)
                .and(&reference)
                .and(&m)
                .fold(zero, |(n, d), &e, &r, &w| {
                    (n + (e - r).scale(w).norm_sqr(), d + r.scale(w).norm_sqr())
                })
        }
        None => Zip::from(&estimate)
            .and(&reference)
            .fold(zero, |(n, d), &e, &r| (n + (e - r).norm_sqr(), d + r.norm_sqr())),
    };
    root_ratio(num, den)
}

/// NRMSE between real arrays, e.g. measured and modelled magnitudes.
pub fn nrmse_real<F, D>(
    estimate: ArrayView<F, D>,
    reference: ArrayView<F, D>,
    mask: Option<ArrayView<F, D>>,
) -> Result<F>
where
    F: PtychoFloat,
    D: Dimension,
{
    check_shape("estimate", reference.shape(), estimate.shape())?;
    let zero = (F::zero(), F::zero());
    let (num, den) = match mask {
        Some(m) => {
            check_shape("mask", reference.shape(), m.shape())?;
            Zip::from(&estimate)
                .and(&reference)
                .and(&m)
                .fold(zero, |(n, d), &e, &r, &w| {
                    let diff = w * (e - r);
                    (n + diff * diff, d + w * r * w * r)
                })
        }
        None => Zip::from(&estimate)
            .and(&reference)
            .fold(zero, |(n, d), &e, &r| (n + (e - r) * (e - r), d + r * r)),
    };
    root_ratio(num, den)
}

/// Closed-form complex scalar `c` minimising `Σ|m·(c·est − ref)|²`.
pub fn phase_norm_coefficient<F: PtychoFloat>(
    estimate: ArrayView2<Complex<F>>,
    reference: ArrayView2<Complex<F>>,
    mask: Option<ArrayView2<F>>,
) -> Result<Complex<F>> {
    check_shape("estimate", reference.shape(), estimate.shape())?;
    let zero = (F::czero(), F::zero());
    let (cross, energy) = match mask {
        Some(m) => {
            check_shape("mask", reference.shape(), m.shape())?;
            Zip::from(&estimate)
                .and(&reference)
                .and(&m)
                .fold(zero, |(c, e), &x, &r, &w| {
                    let wx = x.scale(w);
                    (c + wx.conj() * r.scale(w), e + wx.norm_sqr())
                })
        }
        None => Zip::from(&estimate)
            .and(&reference)
            .fold(zero, |(c, e), &x, &r| (c + x.conj() * r, e + x.norm_sqr())),
    };
    if !(energy > F::zero()) {
        return Err(ReconError::DegenerateMask(
            "estimate has no energy inside the mask".to_string(),
        ));
    }
    Ok(cross.unscale(energy))
}

/// Remove the global phase/scale ambiguity of `estimate` relative to `reference`.
///
/// The factor is fitted inside `mask` and applied to the whole estimate.
pub fn phase_normalize<F: PtychoFloat>(
    estimate: ArrayView2<Complex<F>>,
    reference: ArrayView2<Complex<F>>,
    mask: Option<ArrayView2<F>>,
) -> Result<Array2<Complex<F>>> {
    let c = phase_norm_coefficient(estimate, reference, mask)?;
    Ok(estimate.mapv(|z| z * c))
}

/// Per-iteration metric sequence.
///
/// An entry is `None` when the metric could not be computed for that
/// iteration (degenerate mask); the iteration is still recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorTrace<F> {
    entries: Vec<Option<F>>,
}

impl<F> Default for ErrorTrace<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F: Copy> ErrorTrace<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Option<F>) {
        self.entries.push(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value recorded for iteration `k`, if any.
    pub fn get(&self, k: usize) -> Option<F> {
        self.entries.get(k).copied().flatten()
    }

    /// Value recorded for the final iteration, if any.
    pub fn last_value(&self) -> Option<F> {
        self.entries.last().copied().flatten()
    }

    /// All available values, in iteration order.
    pub fn values(&self) -> Vec<F> {
        self.entries.iter().filter_map(|v| *v).collect()
    }

    pub fn entries(&self) -> &[Option<F>] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::prelude::*;

    fn random_complex(shape: (usize, usize), seed: u64) -> Array2<Complex<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn(shape, |_| {
            Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
        })
    }

    #[test]
    fn test_nrmse_identical_is_zero() {
        let x = random_complex((8, 8), 1);
        let err = nrmse(x.view(), x.view(), None).unwrap();
        assert_eq!(err, 0.0);
    }

    #[test]
    fn test_nrmse_known_value() {
        let reference = Array2::from_elem((2, 2), Complex::new(1.0f64, 0.0));
        let estimate = Array2::from_elem((2, 2), Complex::new(1.5f64, 0.0));
        let err = nrmse(estimate.view(), reference.view(), None).unwrap();
        assert!((err - 0.5).abs() < 1e-15, "nrmse = {}", err);
    }

    #[test]
    fn test_nrmse_mask_ignores_outside_region() {
        let reference = Array2::from_elem((4, 4), Complex::new(1.0f64, 1.0));
        let mut estimate = reference.clone();
        estimate[[3, 3]] = Complex::new(100.0, -50.0);
        let mut mask = Array2::<f64>::ones((4, 4));
        mask[[3, 3]] = 0.0;

        let masked = nrmse(estimate.view(), reference.view(), Some(mask.view())).unwrap();
        let unmasked = nrmse(estimate.view(), reference.view(), None).unwrap();
        assert_eq!(masked, 0.0);
        assert!(unmasked > 1.0);
    }

    #[test]
    fn test_nrmse_zero_reference_is_degenerate() {
        let reference = Array2::<Complex<f64>>::zeros((3, 3));
        let estimate = random_complex((3, 3), 2);
        assert!(matches!(
            nrmse(estimate.view(), reference.view(), None),
            Err(ReconError::DegenerateMask(_))
        ));

        // Non-zero reference but an all-zero mask.
        let reference = random_complex((3, 3), 3);
        let mask = Array2::<f64>::zeros((3, 3));
        assert!(matches!(
            nrmse(estimate.view(), reference.view(), Some(mask.view())),
            Err(ReconError::DegenerateMask(_))
        ));
    }

    #[test]
    fn test_nrmse_shape_mismatch() {
        let a = random_complex((3, 3), 4);
        let b = random_complex((3, 4), 5);
        assert!(matches!(
            nrmse(a.view(), b.view(), None),
            Err(ReconError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_nrmse_real_3d() {
        let reference = Array3::from_elem((2, 2, 2), 2.0f32);
        let estimate = Array3::from_elem((2, 2, 2), 1.0f32);
        let err = nrmse_real(estimate.view(), reference.view(), None).unwrap();
        assert!((err - 0.5).abs() < 1e-6, "nrmse = {}", err);
    }

    #[test]
    fn test_phase_normalization_invariance() {
        let x = random_complex((16, 16), 9);
        let factors = [
            Complex::new(0.0, 1.0),
            Complex::new(-2.5, 0.3),
            Complex::from_polar(0.1, 2.0),
            Complex::new(7.0, -7.0),
        ];
        for c in factors {
            let scaled = x.mapv(|z| z * c);
            let fixed = phase_normalize(scaled.view(), x.view(), None).unwrap();
            let err = nrmse(fixed.view(), x.view(), None).unwrap();
            assert!(err < 1e-12, "nrmse after normalization = {} for c = {}", err, c);
        }
    }

    #[test]
    fn test_phase_normalize_mask_fits_region_applies_everywhere() {
        let x = random_complex((6, 6), 10);
        let c = Complex::from_polar(1.3, -0.7);
        let mut scaled = x.mapv(|z| z * c);
        // Corrupt a region that the mask excludes.
        scaled[[0, 0]] = Complex::new(50.0, 50.0);
        let mut mask = Array2::<f64>::ones((6, 6));
        mask[[0, 0]] = 0.0;

        let coeff = phase_norm_coefficient(scaled.view(), x.view(), Some(mask.view())).unwrap();
        assert!((coeff * c - Complex::new(1.0, 0.0)).norm() < 1e-12);

        let fixed = phase_normalize(scaled.view(), x.view(), Some(mask.view())).unwrap();
        assert!((fixed[[1, 1]] - x[[1, 1]]).norm() < 1e-12);
        assert!(
            (fixed[[0, 0]] - scaled[[0, 0]] * coeff).norm() < 1e-12,
            "coefficient should also be applied outside the mask"
        );
    }

    #[test]
    fn test_phase_normalize_zero_estimate_is_degenerate() {
        let x = random_complex((4, 4), 11);
        let zero = Array2::<Complex<f64>>::zeros((4, 4));
        assert!(matches!(
            phase_normalize(zero.view(), x.view(), None),
            Err(ReconError::DegenerateMask(_))
        ));
    }

    #[test]
    fn test_error_trace() {
        let mut trace = ErrorTrace::<f64>::new();
        assert!(trace.is_empty());
        trace.push(Some(0.5));
        trace.push(None);
        trace.push(Some(0.25));
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.get(1), None);
        assert_eq!(trace.get(2), Some(0.25));
        assert_eq!(trace.last_value(), Some(0.25));
        assert_eq!(trace.values(), vec![0.5, 0.25]);
        assert_eq!(trace.entries()[1], None);
    }
}
