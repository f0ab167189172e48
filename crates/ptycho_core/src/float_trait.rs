//! Float trait abstraction for f32/f64 support.
//!
//! Reconstructions run in either single precision (the default working
//! precision of the Python bindings, `complex64`) or double precision.

use num_traits::{Float, FromPrimitive, NumAssign};
use rustfft::num_complex::Complex;
use rustfft::FftNum;
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Trait alias for floating point types supported by the reconstruction.
///
/// This trait combines all the bounds needed by the patch, Fourier and
/// update operators:
/// - Basic float operations (Float, NumAssign)
/// - FFT compatibility (FftNum from rustfft)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug/Display printing for logs and error messages
pub trait PtychoFloat:
    Float + FftNum + FromPrimitive + NumAssign + Sum + Debug + Display + Send + Sync + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Complex zero in this precision.
    #[inline]
    fn czero() -> Complex<Self> {
        Complex::new(Self::zero(), Self::zero())
    }

    /// Unit-modulus phase factor `z / |z|`, or `1` when `z == 0`.
    ///
    /// Matches `exp(1j * angle(z))` including the `angle(0) == 0` convention.
    #[inline]
    fn phase_of(z: Complex<Self>) -> Complex<Self> {
        let r = z.norm();
        if r > Self::zero() {
            Complex::new(z.re / r, z.im / r)
        } else {
            Complex::new(Self::one(), Self::zero())
        }
    }
}

impl PtychoFloat for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }
}

impl PtychoFloat for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }
}

/// True when every component of every element is finite.
pub fn all_finite<'a, F, I>(values: I) -> bool
where
    F: PtychoFloat,
    I: IntoIterator<Item = &'a Complex<F>>,
{
    values
        .into_iter()
        .all(|z| z.re.is_finite() && z.im.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_trait_impl() {
        let val: f32 = PtychoFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f32::consts::PI).abs() < 1e-5);

        let usize_val: f32 = PtychoFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f32);
    }

    #[test]
    fn test_f64_trait_impl() {
        let val: f64 = PtychoFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f64::consts::PI).abs() < 1e-14);

        let usize_val: f64 = PtychoFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f64);
    }

    #[test]
    fn test_phase_of_unit_modulus() {
        let z = Complex::new(3.0f64, -4.0);
        let p = f64::phase_of(z);
        assert!((p.norm() - 1.0).abs() < 1e-15);
        assert!((p.re - 0.6).abs() < 1e-15 && (p.im + 0.8).abs() < 1e-15);
    }

    #[test]
    fn test_phase_of_zero_is_one() {
        let p = f32::phase_of(f32::czero());
        assert_eq!(p, Complex::new(1.0, 0.0));
    }

    #[test]
    fn test_all_finite() {
        let good = [Complex::new(1.0f64, 2.0), Complex::new(0.0, -1.0)];
        let bad = [Complex::new(1.0f64, f64::NAN)];
        assert!(all_finite(good.iter()));
        assert!(!all_finite(bad.iter()));
    }
}
