//! Likelihood & Prior Engine.
//!
//! Maps a unit-cube point to model parameters through the prior transform,
//! renders every fitting star at its catalog position and flux, and scores the
//! usable pixels of the region. Infeasible candidates score `-inf` and are
//! simply redrawn by the sampler.

use crate::config::LikelihoodConfig;
use crate::error::FitError;
use crate::mask::Mask;
use crate::model::{CompositeProfile, ModelRenderer, ParamLayout, PriorViolation, PsfParams};
use log::info;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Pixel noise model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum NoiseModel {
    /// Gaussian noise with the model's `noise_sigma` parameter
    #[default]
    Gaussian,
    /// Poisson counts with `gain` electrons per data unit
    Poisson { gain: f64 },
}

/// Result of scoring one unit-cube point
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Full physical parameter vector; empty when the transform failed
    pub values: Vec<f64>,
    pub log_l: f64,
}

impl Evaluation {
    pub fn infeasible() -> Self {
        Self {
            values: Vec::new(),
            log_l: f64::NEG_INFINITY,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.log_l > f64::NEG_INFINITY
    }
}

/// Anything the nested sampler can explore: a prior transform composed with a
/// log-likelihood over the unit hypercube.
pub trait Likelihood: Sync {
    /// Dimension of the unit hypercube
    fn ndim(&self) -> usize;

    /// Score a unit-cube point. Must be a pure function of `cube`.
    fn evaluate(&self, cube: &[f64]) -> Evaluation;

    /// Digest identifying the data and priors behind [`Likelihood::evaluate`].
    /// A checkpoint is only resumed against a likelihood with the same digest.
    fn fingerprint(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Pixel {
    x: f64,
    y: f64,
    value: f64,
}

/// Likelihood of the composite PSF model over one masked region
#[derive(Debug, Clone)]
pub struct LikelihoodEngine {
    layout: ParamLayout,
    renderer: ModelRenderer,
    noise: NoiseModel,
    pixels: Vec<Pixel>,
    fingerprint: String,
}

/// MD5 over the model setup and every usable pixel
fn digest(
    layout: &ParamLayout,
    renderer: &ModelRenderer,
    noise: NoiseModel,
    pixels: &[Pixel],
) -> Result<String, FitError> {
    let mut context = md5::Context::new();
    context.consume(serde_json::to_vec(&(layout, renderer, noise))?);
    for p in pixels {
        context.consume(p.x.to_le_bytes());
        context.consume(p.y.to_le_bytes());
        context.consume(p.value.to_le_bytes());
    }
    Ok(format!("{:x}", context.compute()))
}

impl LikelihoodEngine {
    /// Collect the usable pixels of `mask` from `image`.
    ///
    /// # Arguments
    /// * `image` - Full image; the mask region is addressed in its coordinates
    /// * `mask` - Usability mask of the fitting region
    /// * `renderer` - Fitting stars and render mode
    /// * `layout` - Parameter layout and priors
    /// * `config` - Noise model and minimum usable-pixel count
    ///
    /// # Returns
    /// [`FitError::MaskDegenerate`] when fewer usable, finite pixels remain
    /// than `config.min_usable_pixels`.
    pub fn new(
        image: &ArrayView2<f64>,
        mask: &Mask,
        renderer: ModelRenderer,
        layout: ParamLayout,
        config: &LikelihoodConfig,
    ) -> Result<Self, FitError> {
        let region = mask.region();
        if !region.fits_within(image.dim()) {
            return Err(FitError::InvalidConfig(format!(
                "region {} exceeds image of shape {:?}",
                region.name,
                image.dim()
            )));
        }

        let pixels: Vec<Pixel> = mask
            .labels()
            .indexed_iter()
            .filter(|(_, label)| **label == crate::mask::MaskLabel::Usable)
            .filter_map(|((row, col), _)| {
                let image_row = region.min_row + row;
                let image_col = region.min_col + col;
                let value = image[[image_row, image_col]];
                value.is_finite().then_some(Pixel {
                    x: image_col as f64,
                    y: image_row as f64,
                    value,
                })
            })
            .collect();

        if pixels.len() < config.min_usable_pixels {
            return Err(FitError::MaskDegenerate {
                region: region.name.clone(),
                usable: pixels.len(),
                required: config.min_usable_pixels,
            });
        }
        info!(
            "Likelihood over {} usable pixels with {} model stars, {} free parameters",
            pixels.len(),
            renderer.stars().len(),
            layout.ndim()
        );

        let fingerprint = digest(&layout, &renderer, config.noise, &pixels)?;
        Ok(Self {
            layout,
            renderer,
            noise: config.noise,
            pixels,
            fingerprint,
        })
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn renderer(&self) -> &ModelRenderer {
        &self.renderer
    }

    pub fn noise(&self) -> NoiseModel {
        self.noise
    }

    pub fn usable_pixels(&self) -> usize {
        self.pixels.len()
    }

    /// Log-likelihood of a parameter set over the usable pixels.
    ///
    /// The Gaussian form is fully normalised. The Poisson form drops the
    /// `ln Γ(k + 1)` term, which does not depend on the parameters.
    pub fn log_likelihood(&self, params: &PsfParams) -> Result<f64, PriorViolation> {
        let profile = CompositeProfile::new(params)?;
        let model = |p: &Pixel| params.background + self.renderer.star_light(&profile, p.x, p.y);

        match self.noise {
            NoiseModel::Gaussian => {
                let sigma = params.noise_sigma;
                if !(sigma > 0.0) {
                    return Err(PriorViolation::InvalidShape(format!(
                        "noise sigma {sigma} must be positive"
                    )));
                }
                let chi2: f64 = self
                    .pixels
                    .iter()
                    .map(|p| {
                        let r = (p.value - model(p)) / sigma;
                        r * r
                    })
                    .sum();
                let n = self.pixels.len() as f64;
                Ok(-0.5 * chi2 - n * sigma.ln() - 0.5 * n * (2.0 * PI).ln())
            }
            NoiseModel::Poisson { gain } => {
                let mut log_l = 0.0;
                for p in &self.pixels {
                    let expected = gain * model(p);
                    if !(expected > 0.0) {
                        return Ok(f64::NEG_INFINITY);
                    }
                    log_l += gain * p.value * expected.ln() - expected;
                }
                Ok(log_l)
            }
        }
    }
}

impl Likelihood for LikelihoodEngine {
    fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    fn evaluate(&self, cube: &[f64]) -> Evaluation {
        let Ok(values) = self.layout.cube_to_values(cube) else {
            return Evaluation::infeasible();
        };
        let log_l = self
            .layout
            .values_to_params(&values)
            .and_then(|params| self.log_likelihood(&params))
            .unwrap_or(f64::NEG_INFINITY);
        let log_l = if log_l.is_nan() { f64::NEG_INFINITY } else { log_l };
        Evaluation { values, log_l }
    }

    fn fingerprint(&self) -> Option<String> {
        Some(self.fingerprint.clone())
    }
}
