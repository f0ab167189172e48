//! Wirtinger Flow (WF) and accelerated Wirtinger Flow (AWF) reconstruction driver.
//!
//! The driver owns the object/probe estimates and their previous values,
//! forms the Nesterov look-ahead point, calls the update functions and
//! records three convergence traces per iteration:
//! - object NRMSE against a reference object (after phase normalization)
//! - probe NRMSE against a reference probe (joint mode only)
//! - measurement-domain NRMSE (always)
//!
//! ## Lifecycle
//!
//! [`Reconstructor::new`] validates inputs and builds the initial state,
//! [`Reconstructor::step`] runs one iteration, [`Reconstructor::finish`]
//! assembles the [`ReconResult`]. [`wf_recon`] chains the three.

use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, ArrayView3, Zip};
use rustfft::num_complex::Complex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::{ReconError, Result};
use crate::float_trait::{all_finite, PtychoFloat};
use crate::fourier::{FftNorm, FourierOps};
use crate::metrics::{nrmse, nrmse_real, phase_normalize, ErrorTrace};
use crate::patch::{extract_patches, overlap_weight, patch_energy, validate_bounds, PatchBounds};
use crate::update::{model_magnitudes, object_step, probe_step};

// =============================================================================
// Constants
// =============================================================================

/// Default number of iterations
const DEFAULT_NUM_ITER: usize = 100;

/// Default transform normalization correction (1 for an orthonormal pair)
const DEFAULT_PRM: f64 = 1.0;

const PROFILE_TIMING_ENV: &str = "PTYCHO_PROFILE_TIMING";

// =============================================================================
// Types
// =============================================================================

/// Reconstruction flavour, derived from the acceleration flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    /// Plain Wirtinger Flow (momentum coefficient fixed at 0).
    Wf,
    /// Wirtinger Flow with Nesterov acceleration.
    Awf,
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approach::Wf => write!(f, "WF"),
            Approach::Awf => write!(f, "AWF"),
        }
    }
}

/// Configuration for a WF/AWF reconstruction.
#[derive(Debug, Clone)]
pub struct ReconConfig<F: PtychoFloat> {
    /// Number of iterations. Default: 100
    pub num_iter: usize,
    /// Also estimate the probe (blind ptychography). Default: false
    pub joint_recon: bool,
    /// Nesterov acceleration, `beta = (k+2)/(k+4)`. Default: true
    pub accel: bool,
    /// Upper clamp on the momentum coefficient. Default: None
    pub beta_cap: Option<F>,
    /// Normalization correction multiplying the weight map in the step size. Default: 1
    pub prm: F,
    /// Scaling convention of the Fourier pair. Default: Ortho
    pub fft_norm: FftNorm,
    /// Zero frequency at the centre of the detector frame. Default: false
    pub centered_fft: bool,
}

impl<F: PtychoFloat> Default for ReconConfig<F> {
    fn default() -> Self {
        Self {
            num_iter: DEFAULT_NUM_ITER,
            joint_recon: false,
            accel: true,
            beta_cap: None,
            prm: F::from_f64_c(DEFAULT_PRM),
            fft_norm: FftNorm::default(),
            centered_fft: false,
        }
    }
}

impl<F: PtychoFloat> ReconConfig<F> {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approach(&self) -> Approach {
        if self.accel {
            Approach::Awf
        } else {
            Approach::Wf
        }
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.num_iter == 0 {
            return Err(ReconError::InvalidConfig("num_iter must be > 0".to_string()));
        }
        if !(self.prm > F::zero()) || !self.prm.is_finite() {
            return Err(ReconError::InvalidConfig(format!(
                "prm must be finite and > 0, got {}",
                self.prm
            )));
        }
        if let Some(cap) = self.beta_cap {
            if !(cap >= F::zero() && cap <= F::one()) {
                return Err(ReconError::InvalidConfig(format!(
                    "beta_cap must lie in [0, 1], got {}",
                    cap
                )));
            }
        }
        Ok(())
    }
}

/// Momentum coefficient for iteration `k` (0-based).
///
/// `(k+2)/(k+4)` when accelerated, clamped by `beta_cap`; `0` otherwise.
pub fn momentum_coefficient<F: PtychoFloat>(k: usize, accel: bool, beta_cap: Option<F>) -> F {
    if !accel {
        return F::zero();
    }
    let beta = F::usize_as(k + 2) / F::usize_as(k + 4);
    match beta_cap {
        Some(cap) => beta.min(cap),
        None => beta,
    }
}

/// Borrowed inputs of a reconstruction.
///
/// `init_probe` is the probe used throughout when `joint_recon` is off.
#[derive(Debug, Clone, Copy)]
pub struct ReconInputs<'a, F: PtychoFloat> {
    /// Measured magnitudes, `(n, rows, cols)`.
    pub measurements: ArrayView3<'a, F>,
    pub patch_bounds: &'a [PatchBounds],
    pub init_object: ArrayView2<'a, Complex<F>>,
    pub init_probe: ArrayView2<'a, Complex<F>>,
    pub ref_object: Option<ArrayView2<'a, Complex<F>>>,
    pub ref_probe: Option<ArrayView2<'a, Complex<F>>>,
    /// Region used when comparing the object against `ref_object`.
    pub window: Option<ArrayView2<'a, F>>,
}

impl<'a, F: PtychoFloat> ReconInputs<'a, F> {
    pub fn new(
        measurements: ArrayView3<'a, F>,
        patch_bounds: &'a [PatchBounds],
        init_object: ArrayView2<'a, Complex<F>>,
        init_probe: ArrayView2<'a, Complex<F>>,
    ) -> Self {
        Self {
            measurements,
            patch_bounds,
            init_object,
            init_probe,
            ref_object: None,
            ref_probe: None,
            window: None,
        }
    }

    pub fn with_ref_object(mut self, reference: ArrayView2<'a, Complex<F>>) -> Self {
        self.ref_object = Some(reference);
        self
    }

    pub fn with_ref_probe(mut self, reference: ArrayView2<'a, Complex<F>>) -> Self {
        self.ref_probe = Some(reference);
        self
    }

    pub fn with_window(mut self, window: ArrayView2<'a, F>) -> Self {
        self.window = Some(window);
        self
    }

    /// Check every shape and value precondition before any work starts.
    pub fn validate(&self) -> Result<()> {
        let (n, rows, cols) = self.measurements.dim();
        if n == 0 || rows == 0 || cols == 0 {
            return Err(ReconError::InvalidInput(format!(
                "measurement stack has shape {:?}",
                self.measurements.dim()
            )));
        }
        if n != self.patch_bounds.len() {
            return Err(ReconError::ShapeMismatch(format!(
                "{} measurements for {} patch bounds",
                n,
                self.patch_bounds.len()
            )));
        }
        if self.init_probe.dim() != (rows, cols) {
            return Err(ReconError::ShapeMismatch(format!(
                "probe has shape {:?}, measurement frames are {:?}",
                self.init_probe.dim(),
                (rows, cols)
            )));
        }
        let image_shape = self.init_object.dim();
        validate_bounds(self.patch_bounds, image_shape, (rows, cols))?;

        if let Some(r) = self.ref_object {
            if r.dim() != image_shape {
                return Err(ReconError::ShapeMismatch(format!(
                    "reference object has shape {:?}, object is {:?}",
                    r.dim(),
                    image_shape
                )));
            }
        }
        if let Some(r) = self.ref_probe {
            if r.dim() != (rows, cols) {
                return Err(ReconError::ShapeMismatch(format!(
                    "reference probe has shape {:?}, probe is {:?}",
                    r.dim(),
                    (rows, cols)
                )));
            }
        }
        if let Some(w) = self.window {
            if w.dim() != image_shape {
                return Err(ReconError::ShapeMismatch(format!(
                    "window has shape {:?}, object is {:?}",
                    w.dim(),
                    image_shape
                )));
            }
        }

        if self
            .measurements
            .iter()
            .any(|&m| !m.is_finite() || m < F::zero())
        {
            return Err(ReconError::InvalidInput(
                "measurements must be finite and non-negative".to_string(),
            ));
        }
        if !all_finite(self.init_object.iter()) || !all_finite(self.init_probe.iter()) {
            return Err(ReconError::InvalidInput(
                "initial object and probe must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metrics recorded for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport<F> {
    /// 0-based index of the iteration just completed.
    pub iteration: usize,
    pub beta: F,
    pub err_obj: Option<F>,
    pub err_probe: Option<F>,
    pub err_meas: Option<F>,
}

/// Mutable state of a running reconstruction.
#[derive(Debug, Clone)]
pub struct ReconState<F: PtychoFloat> {
    object: Array2<Complex<F>>,
    prev_object: Array2<Complex<F>>,
    probe: Array2<Complex<F>>,
    prev_probe: Array2<Complex<F>>,
    object_weight: Array2<F>,
    iteration: usize,
    err_obj: ErrorTrace<F>,
    err_probe: ErrorTrace<F>,
    err_meas: ErrorTrace<F>,
}

impl<F: PtychoFloat> ReconState<F> {
    pub fn object(&self) -> ArrayView2<'_, Complex<F>> {
        self.object.view()
    }

    pub fn probe(&self) -> ArrayView2<'_, Complex<F>> {
        self.probe.view()
    }

    pub fn object_weight(&self) -> ArrayView2<'_, F> {
        self.object_weight.view()
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn err_obj(&self) -> &ErrorTrace<F> {
        &self.err_obj
    }

    pub fn err_probe(&self) -> &ErrorTrace<F> {
        &self.err_probe
    }

    pub fn err_meas(&self) -> &ErrorTrace<F> {
        &self.err_meas
    }
}

/// Final estimates and convergence traces.
#[derive(Debug, Clone)]
pub struct ReconResult<F: PtychoFloat> {
    /// Object estimate, phase-normalized when a reference object was given.
    ///
    /// With a window, the normalization factor is fitted inside the window
    /// but the returned object is not masked: pixels outside the window keep
    /// their (scaled) values instead of being zeroed.
    pub object: Array2<Complex<F>>,
    /// Probe estimate, phase-normalized when jointly estimated against a reference.
    pub probe: Array2<Complex<F>>,
    pub err_obj: ErrorTrace<F>,
    pub err_probe: ErrorTrace<F>,
    pub err_meas: ErrorTrace<F>,
    /// Number of iterations actually performed.
    pub iterations: usize,
    pub approach: Approach,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn resolve_profile_timing() -> bool {
    std::env::var(PROFILE_TIMING_ENV)
        .ok()
        .map(|value| {
            let v = value.trim();
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Nesterov look-ahead point `est + beta · (est − old)`.
fn extrapolate<F: PtychoFloat>(
    est: &Array2<Complex<F>>,
    old: &Array2<Complex<F>>,
    beta: F,
) -> Array2<Complex<F>> {
    Zip::from(est)
        .and(old)
        .map_collect(|&e, &o| e + (e - o).scale(beta))
}

fn ensure_finite<F: PtychoFloat>(
    values: &Array2<Complex<F>>,
    quantity: &'static str,
    iteration: usize,
) -> Result<()> {
    if all_finite(values.iter()) {
        return Ok(());
    }
    Err(ReconError::NumericalInstability {
        quantity,
        iteration,
        last_valid_iteration: iteration.checked_sub(1),
    })
}

/// Turn a degenerate-mask failure into an unavailable value.
fn available<T>(metric: Result<T>, name: &str, iteration: usize) -> Result<Option<T>> {
    match metric {
        Ok(v) => Ok(Some(v)),
        Err(ReconError::DegenerateMask(msg)) => {
            warn!("{} unavailable at iteration {}: {}", name, iteration, msg);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn compare<F: PtychoFloat>(
    estimate: ArrayView2<Complex<F>>,
    reference: ArrayView2<Complex<F>>,
    mask: Option<ArrayView2<F>>,
) -> Result<F> {
    let aligned = phase_normalize(estimate, reference, mask)?;
    nrmse(aligned.view(), reference, mask)
}

// =============================================================================
// Driver
// =============================================================================

/// Step-wise WF/AWF reconstruction.
pub struct Reconstructor<'a, F: PtychoFloat> {
    inputs: ReconInputs<'a, F>,
    config: ReconConfig<F>,
    ops: FourierOps<F>,
    state: ReconState<F>,
    started: Instant,
}

impl<'a, F: PtychoFloat> Reconstructor<'a, F> {
    /// Validate inputs and build the initial state.
    pub fn new(inputs: ReconInputs<'a, F>, config: ReconConfig<F>) -> Result<Self> {
        config.validate()?;
        inputs.validate()?;

        let (_, rows, cols) = inputs.measurements.dim();
        let ops = FourierOps::new((rows, cols), config.fft_norm, config.centered_fft);

        let object = inputs.init_object.to_owned();
        let probe = inputs.init_probe.to_owned();
        let object_weight = overlap_weight(probe.view(), inputs.patch_bounds, object.dim())?;

        info!(
            "{} recon starts: {} iterations, object {:?}, {} scan positions, joint={}",
            config.approach(),
            config.num_iter,
            object.dim(),
            inputs.patch_bounds.len(),
            config.joint_recon
        );

        let state = ReconState {
            prev_object: object.clone(),
            prev_probe: probe.clone(),
            object,
            probe,
            object_weight,
            iteration: 0,
            err_obj: ErrorTrace::new(),
            err_probe: ErrorTrace::new(),
            err_meas: ErrorTrace::new(),
        };

        Ok(Self {
            inputs,
            config,
            ops,
            state,
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> &ReconState<F> {
        &self.state
    }

    pub fn config(&self) -> &ReconConfig<F> {
        &self.config
    }

    /// Run one iteration.
    ///
    /// On error the state keeps the last valid estimates.
    pub fn step(&mut self) -> Result<IterationReport<F>> {
        let k = self.state.iteration;
        let bounds = self.inputs.patch_bounds;
        let meas = self.inputs.measurements;
        let prm = self.config.prm;
        let beta = momentum_coefficient(k, self.config.accel, self.config.beta_cap);

        let cur_obj = extrapolate(&self.state.object, &self.state.prev_object, beta);
        let new_obj = object_step(
            cur_obj.view(),
            self.state.probe.view(),
            meas,
            bounds,
            self.state.object_weight.view(),
            &self.ops,
            prm,
        )?;
        ensure_finite(&new_obj, "object", k)?;

        let probe_update = if self.config.joint_recon {
            let patches = extract_patches(new_obj.view(), bounds)?;
            let probe_weight = patch_energy(patches.view());
            let cur_probe = extrapolate(&self.state.probe, &self.state.prev_probe, beta);
            let new_probe = probe_step(
                cur_probe.view(),
                patches.view(),
                meas,
                probe_weight.view(),
                &self.ops,
                prm,
            )?;
            ensure_finite(&new_probe, "probe", k)?;
            let weight = overlap_weight(new_probe.view(), bounds, new_obj.dim())?;
            Some((new_probe, weight))
        } else {
            None
        };

        self.state.prev_object = std::mem::replace(&mut self.state.object, new_obj);
        if let Some((new_probe, weight)) = probe_update {
            self.state.prev_probe = std::mem::replace(&mut self.state.probe, new_probe);
            self.state.object_weight = weight;
        }
        self.state.iteration = k + 1;

        let report = self.record_metrics(k, beta)?;
        debug!(
            "iter {} beta={:.4} err_obj={:?} err_probe={:?} err_meas={:?}",
            k, beta, report.err_obj, report.err_probe, report.err_meas
        );
        Ok(report)
    }

    fn record_metrics(&mut self, k: usize, beta: F) -> Result<IterationReport<F>> {
        let state = &mut self.state;

        let err_obj = match self.inputs.ref_object {
            Some(reference) => {
                let v = available(
                    compare(state.object.view(), reference, self.inputs.window),
                    "object nrmse",
                    k,
                )?;
                state.err_obj.push(v);
                v
            }
            None => None,
        };

        let err_probe = match (self.config.joint_recon, self.inputs.ref_probe) {
            (true, Some(reference)) => {
                let v = available(compare(state.probe.view(), reference, None), "probe nrmse", k)?;
                state.err_probe.push(v);
                v
            }
            _ => None,
        };

        let model = model_magnitudes(
            state.object.view(),
            state.probe.view(),
            self.inputs.patch_bounds,
            &self.ops,
        )?;
        let err_meas = available(
            nrmse_real(model.view(), self.inputs.measurements, None),
            "measurement nrmse",
            k,
        )?;
        state.err_meas.push(err_meas);

        Ok(IterationReport {
            iteration: k,
            beta,
            err_obj,
            err_probe,
            err_meas,
        })
    }

    /// Run the remaining iterations, checking `cancel` before each one.
    pub fn run(mut self, cancel: Option<&AtomicBool>) -> Result<ReconResult<F>> {
        while self.state.iteration < self.config.num_iter {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                info!(
                    "{} recon cancelled after {} iterations",
                    self.config.approach(),
                    self.state.iteration
                );
                return Err(ReconError::Cancelled {
                    completed: self.state.iteration,
                });
            }
            self.step()?;
        }
        self.finish()
    }

    /// Assemble the result bundle.
    pub fn finish(self) -> Result<ReconResult<F>> {
        let Reconstructor {
            inputs,
            config,
            state,
            started,
            ..
        } = self;

        let object = match inputs.ref_object {
            Some(reference) => {
                match available(
                    phase_normalize(state.object.view(), reference, inputs.window),
                    "object phase normalization",
                    state.iteration,
                )? {
                    Some(aligned) => aligned,
                    None => state.object,
                }
            }
            None => state.object,
        };

        let probe = match (config.joint_recon, inputs.ref_probe) {
            (true, Some(reference)) => {
                match available(
                    phase_normalize(state.probe.view(), reference, None),
                    "probe phase normalization",
                    state.iteration,
                )? {
                    Some(aligned) => aligned,
                    None => state.probe,
                }
            }
            _ => state.probe,
        };

        let elapsed = started.elapsed();
        info!(
            "{} recon completed: {} iterations in {:.3} s, final err_meas={:?}",
            config.approach(),
            state.iteration,
            elapsed.as_secs_f64(),
            state.err_meas.last_value()
        );
        if resolve_profile_timing() {
            let total_ms = elapsed.as_secs_f64() * 1000.0;
            eprintln!(
                "ptycho_profile approach={} iterations={} object={}x{} positions={} frame={}x{} joint={} wall_ms={:.3} per_iter_ms={:.3}",
                config.approach(),
                state.iteration,
                object.dim().0,
                object.dim().1,
                inputs.patch_bounds.len(),
                probe.dim().0,
                probe.dim().1,
                config.joint_recon,
                total_ms,
                total_ms / state.iteration.max(1) as f64,
            );
        }

        Ok(ReconResult {
            object,
            probe,
            err_obj: state.err_obj,
            err_probe: state.err_probe,
            err_meas: state.err_meas,
            iterations: state.iteration,
            approach: config.approach(),
        })
    }
}

/// Run a complete WF/AWF reconstruction.
pub fn wf_recon<F: PtychoFloat>(
    inputs: ReconInputs<'_, F>,
    config: ReconConfig<F>,
) -> Result<ReconResult<F>> {
    Reconstructor::new(inputs, config)?.run(None)
}

/// [`wf_recon`] with a cooperative cancellation flag checked before every iteration.
pub fn wf_recon_cancellable<F: PtychoFloat>(
    inputs: ReconInputs<'_, F>,
    config: ReconConfig<F>,
    cancel: &AtomicBool,
) -> Result<ReconResult<F>> {
    Reconstructor::new(inputs, config)?.run(Some(cancel))
}
