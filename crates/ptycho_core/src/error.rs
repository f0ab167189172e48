//! Error types for the reconstruction engine.

use thiserror::Error;

use crate::patch::PatchBounds;

/// Errors that can occur while validating inputs or running a reconstruction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Patch {index} with bounds {bounds:?} lies outside image of shape {image_shape:?}")]
    PatchOutOfBounds {
        index: usize,
        bounds: PatchBounds,
        image_shape: (usize, usize),
    },

    /// All-zero denominator in an NRMSE or phase-normalization computation.
    #[error("Degenerate mask: {0}")]
    DegenerateMask(String),

    /// The weight map has no positive maximum, so no step size exists.
    #[error("Degenerate weight map: {0}")]
    DegenerateWeight(String),

    #[error(
        "Non-finite values in {quantity} at iteration {iteration} (last valid iteration: {last_valid_iteration:?})"
    )]
    NumericalInstability {
        quantity: &'static str,
        iteration: usize,
        last_valid_iteration: Option<usize>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reconstruction cancelled after {completed} iterations")]
    Cancelled { completed: usize },
}

pub type Result<T> = std::result::Result<T, ReconError>;
