//! Single Wirtinger-Flow steps for the object and the probe.
//!
//! Both updates share one shape: form exit waves, move to the detector
//! plane, replace the modelled magnitudes by the measured ones while keeping
//! the modelled phase, come back, apply the adjoint of the exit-wave product
//! and take a step of `1 / max(prm · weight)`.
//!
//! The per-patch work runs on the rayon pool into private buffers; the
//! combination into the shared estimate happens afterwards on the calling
//! thread, in patch order, so results are bitwise reproducible.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::error::{ReconError, Result};
use crate::float_trait::PtychoFloat;
use crate::fourier::FourierOps;
use crate::patch::{accumulate_patches, extract_patches, PatchBounds};

/// Step denominator `max(prm · weight)`.
fn step_denominator<F: PtychoFloat>(weight: ArrayView2<F>, prm: F, what: &str) -> Result<F> {
    let max = weight
        .iter()
        .fold(F::neg_infinity(), |acc, &w| acc.max(prm * w));
    if !(max > F::zero()) || !max.is_finite() {
        return Err(ReconError::DegenerateWeight(format!(
            "{} weight map maximum is {}",
            what, max
        )));
    }
    Ok(max)
}

fn check_stack<F: PtychoFloat>(
    meas: ArrayView3<F>,
    patch_count: usize,
    patch_shape: (usize, usize),
) -> Result<()> {
    let (n, rows, cols) = meas.dim();
    if n != patch_count {
        return Err(ReconError::ShapeMismatch(format!(
            "{} measurements for {} scan positions",
            n, patch_count
        )));
    }
    if (rows, cols) != patch_shape {
        return Err(ReconError::ShapeMismatch(format!(
            "measurement frames are {:?}, patches are {:?}",
            (rows, cols),
            patch_shape
        )));
    }
    Ok(())
}

/// Gradient of the magnitude misfit with respect to `variable` for the exit
/// wave `variable · fixed` at one scan position.
fn exit_wave_gradient<F: PtychoFloat>(
    variable: ArrayView2<Complex<F>>,
    fixed: ArrayView2<Complex<F>>,
    measured: ArrayView2<F>,
    ops: &FourierOps<F>,
) -> Array2<Complex<F>> {
    let exit = Zip::from(&variable)
        .and(&fixed)
        .map_collect(|&v, &f| v * f);
    let spectrum = ops.forward(exit.view());
    let residual = Zip::from(&spectrum)
        .and(&measured)
        .map_collect(|&z, &m| z - F::phase_of(z).scale(m));
    let mut grad = ops.inverse(residual.view());
    Zip::from(&mut grad)
        .and(&fixed)
        .for_each(|g, &f| *g = *g * f.conj());
    grad
}

/// One Wirtinger-Flow update of the object estimate.
///
/// `obj_weight` is the overlap-accumulated probe intensity (see
/// [`crate::patch::overlap_weight`]); `prm` corrects for transform pairs that
/// are not energy normalized and is `1` otherwise.
pub fn object_step<F: PtychoFloat>(
    cur_obj: ArrayView2<Complex<F>>,
    probe: ArrayView2<Complex<F>>,
    meas: ArrayView3<F>,
    bounds: &[PatchBounds],
    obj_weight: ArrayView2<F>,
    ops: &FourierOps<F>,
    prm: F,
) -> Result<Array2<Complex<F>>> {
    check_stack(meas, bounds.len(), probe.dim())?;
    if obj_weight.dim() != cur_obj.dim() {
        return Err(ReconError::ShapeMismatch(format!(
            "object weight map is {:?}, object is {:?}",
            obj_weight.dim(),
            cur_obj.dim()
        )));
    }
    let denom = step_denominator(obj_weight, prm, "object")?;

    let mut patches = extract_patches(cur_obj, bounds)?;
    patches
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(meas.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut patch, y)| {
            let grad = exit_wave_gradient(patch.view(), probe, y, ops);
            patch.assign(&grad);
        });

    let correction = accumulate_patches(patches.view(), bounds, cur_obj.dim())?;
    Ok(Zip::from(&cur_obj)
        .and(&correction)
        .map_collect(|&x, &g| x - g.unscale(denom)))
}

/// One Wirtinger-Flow update of the probe estimate.
///
/// The dual of [`object_step`]: `obj_patches` plays the role of the probe and
/// the gradient is summed over scan positions. `probe_weight` is
/// `Σ_j |patch_j|²` (see [`crate::patch::patch_energy`]).
pub fn probe_step<F: PtychoFloat>(
    cur_probe: ArrayView2<Complex<F>>,
    obj_patches: ArrayView3<Complex<F>>,
    meas: ArrayView3<F>,
    probe_weight: ArrayView2<F>,
    ops: &FourierOps<F>,
    prm: F,
) -> Result<Array2<Complex<F>>> {
    let (n, rows, cols) = obj_patches.dim();
    if (rows, cols) != cur_probe.dim() {
        return Err(ReconError::ShapeMismatch(format!(
            "object patches are {:?}, probe is {:?}",
            (rows, cols),
            cur_probe.dim()
        )));
    }
    check_stack(meas, n, cur_probe.dim())?;
    if probe_weight.dim() != cur_probe.dim() {
        return Err(ReconError::ShapeMismatch(format!(
            "probe weight map is {:?}, probe is {:?}",
            probe_weight.dim(),
            cur_probe.dim()
        )));
    }
    let denom = step_denominator(probe_weight, prm, "probe")?;

    let grads: Vec<Array2<Complex<F>>> = obj_patches
        .axis_iter(Axis(0))
        .into_par_iter()
        .zip(meas.axis_iter(Axis(0)).into_par_iter())
        .map(|(patch, y)| exit_wave_gradient(cur_probe, patch, y, ops))
        .collect();

    let mut total = Array2::from_elem(cur_probe.dim(), F::czero());
    for g in &grads {
        total += g;
    }
    Ok(Zip::from(&cur_probe)
        .and(&total)
        .map_collect(|&p, &g| p - g.unscale(denom)))
}

/// Modelled detector magnitudes `|forward(probe · patch_j)|` for every scan position.
pub fn model_magnitudes<F: PtychoFloat>(
    object: ArrayView2<Complex<F>>,
    probe: ArrayView2<Complex<F>>,
    bounds: &[PatchBounds],
    ops: &FourierOps<F>,
) -> Result<Array3<F>> {
    let mut exit = extract_patches(object, bounds)?;
    let (_, rows, cols) = exit.dim();
    if !bounds.is_empty() && (rows, cols) != probe.dim() {
        return Err(ReconError::ShapeMismatch(format!(
            "patches are {:?}, probe is {:?}",
            (rows, cols),
            probe.dim()
        )));
    }
    exit.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut patch| patch.zip_mut_with(&probe, |o, &p| *o = *o * p));
    Ok(ops.forward_stack(exit.view()).mapv(|z| z.norm()))
}
