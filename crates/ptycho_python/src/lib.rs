//! PyO3 Python bindings for WF/AWF ptychographic reconstruction.
//!
//! This crate provides thin Python bindings for the ptycho_core library.
//! All algorithm logic is in ptycho_core; this crate only handles
//! Python/NumPy type conversions.

use numpy::{Complex32, PyReadonlyArray2, PyReadonlyArray3, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use ptycho_core::{PatchBounds, ReconConfig, ReconError, ReconInputs};

fn to_py_err(e: ReconError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn to_bounds(raw: &[(usize, usize, usize, usize)]) -> Vec<PatchBounds> {
    raw.iter()
        .map(|&(r0, r1, c0, c1)| PatchBounds::new(r0, r1, c0, c1))
        .collect()
}

/// WF/AWF reconstruction.
///
/// `patch_bounds` holds `(row_start, row_end, col_start, col_end)` per scan
/// position. Without `joint_recon` the probe is held fixed at `ref_probe`
/// (or `init_probe` when no reference is given). Returns a dict with keys
/// `object`, `probe`, `err_obj`, `err_probe`, `err_meas` and `iterations`;
/// trace entries are `None` where a metric was unavailable.
#[pyfunction]
#[pyo3(signature = (
    y_meas,
    patch_bounds,
    init_obj,
    init_probe = None,
    ref_obj = None,
    ref_probe = None,
    num_iter = 100,
    joint_recon = false,
    recon_win = None,
    accel = true
))]
#[allow(clippy::too_many_arguments)]
pub fn wf_recon<'py>(
    py: Python<'py>,
    y_meas: PyReadonlyArray3<f32>,
    patch_bounds: Vec<(usize, usize, usize, usize)>,
    init_obj: PyReadonlyArray2<Complex32>,
    init_probe: Option<PyReadonlyArray2<Complex32>>,
    ref_obj: Option<PyReadonlyArray2<Complex32>>,
    ref_probe: Option<PyReadonlyArray2<Complex32>>,
    num_iter: usize,
    joint_recon: bool,
    recon_win: Option<PyReadonlyArray2<f32>>,
    accel: bool,
) -> PyResult<&'py PyDict> {
    let bounds = to_bounds(&patch_bounds);

    let probe = if joint_recon {
        init_probe.as_ref()
    } else {
        ref_probe.as_ref().or(init_probe.as_ref())
    }
    .ok_or_else(|| {
        PyValueError::new_err(if joint_recon {
            "joint reconstruction requires init_probe"
        } else {
            "a fixed probe is required: pass ref_probe or init_probe"
        })
    })?;

    let mut inputs = ReconInputs::new(
        y_meas.as_array(),
        &bounds,
        init_obj.as_array(),
        probe.as_array(),
    );
    if let Some(r) = ref_obj.as_ref() {
        inputs = inputs.with_ref_object(r.as_array());
    }
    if let Some(r) = ref_probe.as_ref() {
        inputs = inputs.with_ref_probe(r.as_array());
    }
    if let Some(w) = recon_win.as_ref() {
        inputs = inputs.with_window(w.as_array());
    }

    let config = ReconConfig::<f32> {
        num_iter,
        joint_recon,
        accel,
        ..ReconConfig::default()
    };
    let result = ptycho_core::wf_recon(inputs, config).map_err(to_py_err)?;

    let out = PyDict::new(py);
    out.set_item("object", result.object.to_pyarray(py))?;
    out.set_item("probe", result.probe.to_pyarray(py))?;
    out.set_item("err_obj", result.err_obj.entries().to_vec())?;
    out.set_item("err_probe", result.err_probe.entries().to_vec())?;
    out.set_item("err_meas", result.err_meas.entries().to_vec())?;
    out.set_item("iterations", result.iterations)?;
    Ok(out)
}

/// Normalized RMSE between two complex images, optionally inside a mask.
#[pyfunction]
#[pyo3(signature = (estimate, reference, mask = None))]
pub fn nrmse(
    estimate: PyReadonlyArray2<Complex32>,
    reference: PyReadonlyArray2<Complex32>,
    mask: Option<PyReadonlyArray2<f32>>,
) -> PyResult<f32> {
    ptycho_core::nrmse(
        estimate.as_array(),
        reference.as_array(),
        mask.as_ref().map(|m| m.as_array()),
    )
    .map_err(to_py_err)
}

/// Remove the global complex factor between an estimate and a reference.
#[pyfunction]
#[pyo3(signature = (estimate, reference, mask = None))]
pub fn phase_norm<'py>(
    py: Python<'py>,
    estimate: PyReadonlyArray2<Complex32>,
    reference: PyReadonlyArray2<Complex32>,
    mask: Option<PyReadonlyArray2<f32>>,
) -> PyResult<&'py numpy::PyArray2<Complex32>> {
    let aligned = ptycho_core::phase_normalize(
        estimate.as_array(),
        reference.as_array(),
        mask.as_ref().map(|m| m.as_array()),
    )
    .map_err(to_py_err)?;
    Ok(aligned.to_pyarray(py))
}

/// Ptychography Rust accelerator module
#[pymodule]
fn ptycho_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(wf_recon, m)?)?;
    m.add_function(wrap_pyfunction!(nrmse, m)?)?;
    m.add_function(wrap_pyfunction!(phase_norm, m)?)?;
    Ok(())
}
