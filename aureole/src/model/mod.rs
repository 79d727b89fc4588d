//! Composite core + aureole PSF model
//!
//! - [`params`]: parameter layout, priors, and the unit-cube transform
//! - [`profile`]: the piecewise brightness profile with derived amplitudes
//! - [`render`]: model image synthesis and residual diagnostics

pub mod params;
pub mod profile;
pub mod render;

pub use params::{
    BreakSet, ParamKind, ParamLayout, Prior, PriorSet, PriorViolation, PsfParams, MAX_BREAKS,
};
pub use profile::CompositeProfile;
pub use render::{reduced_chi_square, residual_map, ModelRenderer, ModelStar, RenderMode};
