//! Error taxonomy for the PSF fitting pipeline
//!
//! Fatal conditions surface as [`FitError`]. Candidate parameter vectors that
//! fall outside the prior are not errors at all: they are reported as
//! [`crate::model::PriorViolation`] and scored with a `-inf` likelihood.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing, masking, or fitting a region
#[derive(Error, Debug)]
pub enum FitError {
    #[error(
        "catalog mismatch: {detections} detections vs {cross_matches} cross-match records (tolerance {tolerance})"
    )]
    CatalogMismatch {
        detections: usize,
        cross_matches: usize,
        tolerance: usize,
    },

    #[error("region {region}: only {usable} usable pixels, at least {required} required")]
    MaskDegenerate {
        region: String,
        usable: usize,
        required: usize,
    },

    #[error("region {region}: sampler stopped after {iterations} iterations without converging ({reason})")]
    ConvergenceFailure {
        region: String,
        iterations: u64,
        reason: String,
    },

    #[error("checkpoint {path:?} could not be restored: {reason}")]
    CheckpointCorruption { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FitError {
    /// Whether the error only affects a single fitting region.
    ///
    /// Region-local failures can be skipped when several regions are fitted
    /// in one run; everything else aborts the run.
    pub fn is_region_local(&self) -> bool {
        matches!(self, FitError::MaskDegenerate { .. })
    }
}
