//! Synthetic scans, simulated measurements and initial guesses.
//!
//! Every routine that draws random numbers takes an explicit `seed`.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::prelude::*;
use rand_distr::{Normal, Poisson};
use rustfft::num_complex::Complex;
use std::cmp::Ordering;

use crate::error::{ReconError, Result};
use crate::float_trait::PtychoFloat;
use crate::fourier::{FftNorm, FourierOps};
use crate::patch::{accumulate_patches, validate_bounds, PatchBounds};
use crate::update::model_magnitudes;

fn axis_starts(len: usize, patch: usize, stride: usize) -> Vec<usize> {
    let last = len - patch;
    let mut starts: Vec<usize> = (0..=last).step_by(stride).collect();
    if starts.last() != Some(&last) {
        starts.push(last);
    }
    starts
}

/// Patch bounds on a regular grid with the given `(row, col)` stride.
///
/// The last row and column positions are always included so the scan
/// covers the whole image.
pub fn raster_scan(
    image_shape: (usize, usize),
    patch_shape: (usize, usize),
    stride: (usize, usize),
) -> Result<Vec<PatchBounds>> {
    if stride.0 == 0 || stride.1 == 0 {
        return Err(ReconError::InvalidConfig("scan stride must be > 0".to_string()));
    }
    if patch_shape.0 == 0
        || patch_shape.1 == 0
        || patch_shape.0 > image_shape.0
        || patch_shape.1 > image_shape.1
    {
        return Err(ReconError::ShapeMismatch(format!(
            "patch {:?} does not fit image {:?}",
            patch_shape, image_shape
        )));
    }
    let rows = axis_starts(image_shape.0, patch_shape.0, stride.0);
    let cols = axis_starts(image_shape.1, patch_shape.1, stride.1);
    Ok(rows
        .iter()
        .flat_map(|&r| {
            cols.iter()
                .map(move |&c| PatchBounds::from_origin(r, c, patch_shape))
        })
        .collect())
}

/// Noiseless detector magnitudes for a known object and probe.
pub fn simulate_measurements<F: PtychoFloat>(
    object: ArrayView2<Complex<F>>,
    probe: ArrayView2<Complex<F>>,
    bounds: &[PatchBounds],
    norm: FftNorm,
    centered: bool,
) -> Result<Array3<F>> {
    validate_bounds(bounds, object.dim(), probe.dim())?;
    let ops = FourierOps::new(probe.dim(), norm, centered);
    model_magnitudes(object, probe, bounds, &ops)
}

/// Poisson photon noise on the intensities `y²`, returned as magnitudes.
///
/// `photons` is the expected count per unit intensity.
pub fn add_shot_noise<F: PtychoFloat>(
    meas: ArrayView3<F>,
    photons: f64,
    seed: u64,
) -> Result<Array3<F>> {
    if !(photons > 0.0) || !photons.is_finite() {
        return Err(ReconError::InvalidConfig(format!(
            "photon scale must be finite and > 0, got {}",
            photons
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut noisy = Array3::<F>::zeros(meas.dim());
    for (dst, &y) in noisy.iter_mut().zip(meas.iter()) {
        let y = y.to_f64().unwrap_or(0.0);
        let lambda = photons * y * y;
        let counts = if lambda > 0.0 {
            Poisson::new(lambda)
                .map_err(|e| ReconError::InvalidInput(format!("poisson rate {}: {}", lambda, e)))?
                .sample(&mut rng)
        } else {
            0.0
        };
        *dst = F::from_f64_c((counts / photons).sqrt());
    }
    Ok(noisy)
}

/// Random transmittance with magnitude in `amplitude` and phase in `[-max_phase, max_phase)`.
pub fn random_complex_image<F: PtychoFloat>(
    shape: (usize, usize),
    amplitude: (f64, f64),
    max_phase: f64,
    seed: u64,
) -> Result<Array2<Complex<F>>> {
    if !(amplitude.0 < amplitude.1) || !(max_phase > 0.0) {
        return Err(ReconError::InvalidConfig(format!(
            "empty sampling range: amplitude {:?}, max_phase {}",
            amplitude, max_phase
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(Array2::from_shape_fn(shape, |_| {
        let r = rng.gen_range(amplitude.0..amplitude.1);
        let theta = rng.gen_range(-max_phase..max_phase);
        Complex::from_polar(F::from_f64_c(r), F::from_f64_c(theta))
    }))
}

/// Add complex Gaussian noise of standard deviation `sigma` per component.
pub fn perturb<F: PtychoFloat>(
    image: ArrayView2<Complex<F>>,
    sigma: f64,
    seed: u64,
) -> Result<Array2<Complex<F>>> {
    let normal = Normal::new(0.0, sigma)
        .map_err(|e| ReconError::InvalidConfig(format!("noise sigma {}: {}", sigma, e)))?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(image.mapv(|z| {
        let dr = F::from_f64_c(normal.sample(&mut rng));
        let di = F::from_f64_c(normal.sample(&mut rng));
        z + Complex::new(dr, di)
    }))
}

fn median<F: PtychoFloat>(mut values: Vec<F>) -> Option<F> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(values[values.len() / 2])
}

/// Energy-ratio initial guess for the object.
///
/// Each scan position contributes the constant amplitude
/// `‖y_j‖ / (gain · ‖probe‖)`, where `gain` is the forward transform's norm
/// gain. Contributions are averaged over overlaps; pixels no patch covers
/// get the median of the covered ones. The guess has zero phase.
pub fn formulated_initial_object<F: PtychoFloat>(
    meas: ArrayView3<F>,
    bounds: &[PatchBounds],
    image_shape: (usize, usize),
    probe: ArrayView2<Complex<F>>,
    ops: &FourierOps<F>,
) -> Result<Array2<Complex<F>>> {
    let (n, rows, cols) = meas.dim();
    if n != bounds.len() || (rows, cols) != probe.dim() {
        return Err(ReconError::ShapeMismatch(format!(
            "measurements {:?} inconsistent with {} bounds and probe {:?}",
            meas.dim(),
            bounds.len(),
            probe.dim()
        )));
    }
    validate_bounds(bounds, image_shape, (rows, cols))?;

    let probe_norm = probe.iter().map(|z| z.norm_sqr()).sum::<F>().sqrt();
    let denom = ops.forward_gain() * probe_norm;
    if !(denom > F::zero()) {
        return Err(ReconError::DegenerateWeight("probe has no energy".to_string()));
    }

    let amplitudes: Vec<F> = meas
        .axis_iter(Axis(0))
        .map(|y| y.iter().map(|&v| v * v).sum::<F>().sqrt() / denom)
        .collect();
    let contributions = Array3::from_shape_fn((n, rows, cols), |(j, _, _)| amplitudes[j]);
    let ones = Array3::<F>::ones((n, rows, cols));
    let sum = accumulate_patches(contributions.view(), bounds, image_shape)?;
    let coverage = accumulate_patches(ones.view(), bounds, image_shape)?;

    let covered: Vec<F> = sum
        .iter()
        .zip(coverage.iter())
        .filter(|(_, c)| **c > F::zero())
        .map(|(&s, &c)| s / c)
        .collect();
    let fill = median(covered).unwrap_or_else(F::one);

    let mut init = Array2::from_elem(image_shape, F::czero());
    for ((dst, &s), &c) in init.iter_mut().zip(sum.iter()).zip(coverage.iter()) {
        let amp = if c > F::zero() { s / c } else { fill };
        *dst = Complex::new(amp, F::zero());
    }
    Ok(init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::nrmse;

    #[test]
    fn test_raster_scan_covers_image() {
        let bounds = raster_scan((10, 12), (4, 4), (3, 3)).unwrap();
        // rows: 0,3,6 ; cols: 0,3,6,8
        assert_eq!(bounds.len(), 3 * 4);
        assert_eq!(bounds[0], PatchBounds::from_origin(0, 0, (4, 4)));
        assert_eq!(*bounds.last().unwrap(), PatchBounds::from_origin(6, 8, (4, 4)));

        let ones = Array3::<f64>::ones((bounds.len(), 4, 4));
        let coverage = accumulate_patches(ones.view(), &bounds, (10, 12)).unwrap();
        assert!(coverage.iter().all(|&c| c >= 1.0), "raster scan left pixels uncovered");
    }

    #[test]
    fn test_raster_scan_rejects_bad_arguments() {
        assert!(matches!(
            raster_scan((8, 8), (4, 4), (0, 2)),
            Err(ReconError::InvalidConfig(_))
        ));
        assert!(matches!(
            raster_scan((8, 8), (9, 4), (1, 1)),
            Err(ReconError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_random_image_is_seeded() {
        let a = random_complex_image::<f32>((8, 8), (0.5, 1.0), 0.5, 7).unwrap();
        let b = random_complex_image::<f32>((8, 8), (0.5, 1.0), 0.5, 7).unwrap();
        let c = random_complex_image::<f32>((8, 8), (0.5, 1.0), 0.5, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|z| z.norm() >= 0.5 - 1e-6 && z.norm() < 1.0 + 1e-6));
    }

    #[test]
    fn test_shot_noise_high_photon_limit() {
        let obj = random_complex_image::<f64>((12, 12), (0.8, 1.0), 0.3, 1).unwrap();
        let probe = random_complex_image::<f64>((4, 4), (0.5, 1.0), 0.3, 2).unwrap();
        let bounds = raster_scan((12, 12), (4, 4), (2, 2)).unwrap();
        let clean = simulate_measurements(obj.view(), probe.view(), &bounds, FftNorm::Ortho, true).unwrap();

        let noisy = add_shot_noise(clean.view(), 1e8, 3).unwrap();
        let err = crate::metrics::nrmse_real(noisy.view(), clean.view(), None).unwrap();
        assert!(err < 1e-2, "high photon count should give small noise, nrmse = {}", err);

        let very_noisy = add_shot_noise(clean.view(), 1.0, 3).unwrap();
        let err_low = crate::metrics::nrmse_real(very_noisy.view(), clean.view(), None).unwrap();
        assert!(err_low > err, "fewer photons should be noisier: {} <= {}", err_low, err);
        assert!(noisy.iter().all(|&v| v >= 0.0));

        assert!(add_shot_noise(clean.view(), 0.0, 3).is_err());
    }

    #[test]
    fn test_perturb_is_seeded_and_small() {
        let img = random_complex_image::<f64>((8, 8), (0.5, 1.0), 1.0, 4).unwrap();
        let a = perturb(img.view(), 0.01, 5).unwrap();
        let b = perturb(img.view(), 0.01, 5).unwrap();
        assert_eq!(a, b);
        let err = nrmse(a.view(), img.view(), None).unwrap();
        assert!(err > 0.0 && err < 0.05, "perturbation nrmse = {}", err);
    }

    #[test]
    fn test_formulated_initial_object_recovers_constant_amplitude() {
        // Constant-amplitude object, any probe: the energy ratio is exact.
        let amp = 0.7f64;
        let obj = Array2::from_elem((10, 10), Complex::new(0.0, amp));
        let probe = random_complex_image::<f64>((4, 4), (0.2, 1.0), 2.0, 6).unwrap();
        let bounds = raster_scan((10, 10), (4, 4), (3, 3)).unwrap();
        for norm in [FftNorm::Ortho, FftNorm::Backward] {
            let ops = FourierOps::new((4, 4), norm, false);
            let meas = model_magnitudes(obj.view(), probe.view(), &bounds, &ops).unwrap();
            let init =
                formulated_initial_object(meas.view(), &bounds, (10, 10), probe.view(), &ops).unwrap();
            for z in init.iter() {
                assert!((z.re - amp).abs() < 1e-12 && z.im == 0.0, "{:?}: got {}", norm, z);
            }
        }
    }

    #[test]
    fn test_formulated_initial_object_fills_uncovered() {
        let probe = Array2::from_elem((2, 2), Complex::new(1.0f64, 0.0));
        let bounds = vec![
            PatchBounds::from_origin(0, 0, (2, 2)),
            PatchBounds::from_origin(2, 2, (2, 2)),
            PatchBounds::from_origin(0, 2, (2, 2)),
        ];
        let mut meas = Array3::<f64>::zeros((3, 2, 2));
        meas[[0, 0, 0]] = 2.0; // amplitude 1.0
        meas[[1, 0, 0]] = 4.0; // amplitude 2.0
        meas[[2, 0, 0]] = 6.0; // amplitude 3.0
        let ops = FourierOps::new((2, 2), FftNorm::Ortho, false);
        let init = formulated_initial_object(meas.view(), &bounds, (4, 4), probe.view(), &ops).unwrap();
        assert!((init[[0, 0]].re - 1.0).abs() < 1e-12);
        assert!((init[[3, 3]].re - 2.0).abs() < 1e-12);
        assert!((init[[0, 3]].re - 3.0).abs() < 1e-12);
        // Uncovered bottom-left block gets the median covered amplitude.
        assert!((init[[3, 0]].re - 2.0).abs() < 1e-12, "fill = {}", init[[3, 0]]);
    }
}
