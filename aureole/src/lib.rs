//! Bayesian fitting of stellar PSF cores and their extended aureoles
//!
//! This crate characterises the point-spread function of a wide-field image
//! so that bright-star light can be modelled and subtracted. It prepares a
//! tiered star catalog, masks contaminated pixels, and explores a composite
//! Moffat core + multi-power-law aureole model with a resumable, parallel
//! nested sampler.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fit;
pub mod likelihood;
pub mod mask;
pub mod model;
pub mod sampler;
pub mod stats;
pub mod synthetic;

pub use config::FitConfig;
pub use error::FitError;
pub use fit::{FitResult, PsfFitter};
