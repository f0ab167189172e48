//! Ptychographic Reconstruction Core Library
//!
//! Pure Rust implementation of Wirtinger Flow (WF) and accelerated Wirtinger
//! Flow (AWF) phase retrieval for ptychography: recover a complex object
//! (and optionally the probe) from far-field diffraction magnitudes recorded
//! at overlapping scan positions. This crate contains all algorithm logic
//! without Python bindings.

pub mod error;
pub mod float_trait;
pub mod fourier;
pub mod metrics;
pub mod patch;
pub mod recon;
pub mod synthetic;
pub mod update;

// Re-export commonly used types at the crate root
pub use error::{ReconError, Result};
pub use float_trait::PtychoFloat;
pub use fourier::{fftshift2, ifftshift2, FftNorm, FourierOps};
pub use metrics::{nrmse, nrmse_real, phase_norm_coefficient, phase_normalize, ErrorTrace};
pub use patch::{accumulate_patches, extract_patches, overlap_weight, patch_energy, PatchBounds};
pub use recon::{
    momentum_coefficient, wf_recon, wf_recon_cancellable, Approach, IterationReport,
    ReconConfig, ReconInputs, ReconResult, ReconState, Reconstructor,
};
pub use update::{model_magnitudes, object_step, probe_step};
