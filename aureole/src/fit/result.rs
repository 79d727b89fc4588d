//! Persisted fit results.
//!
//! A [`FitResult`] carries the weighted posterior samples, the evidence, a
//! best-fit vector and enough model metadata (parameter layout, model stars,
//! render mode, noise model) to re-render the model without re-fitting.

use super::summary::{importance_weights, PosteriorSummary};
use crate::error::FitError;
use crate::likelihood::NoiseModel;
use crate::mask::Region;
use crate::model::{ModelRenderer, ParamLayout, PriorViolation, PsfParams};
use crate::sampler::{evidence::neg_inf_as_null, NestedRun, SamplerStatus};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One posterior sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSample {
    /// Full parameter vector in layout order
    pub values: Vec<f64>,
    pub log_l: f64,
    /// Normalised importance weight
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub region: Region,
    pub layout: ParamLayout,
    pub renderer: ModelRenderer,
    pub noise: NoiseModel,
    pub usable_pixels: usize,
    /// Samples in ascending likelihood order
    pub samples: Vec<PosteriorSample>,
    #[serde(with = "neg_inf_as_null")]
    pub log_z: f64,
    pub log_z_err: f64,
    pub information: f64,
    pub iterations: u64,
    pub calls: u64,
    pub status: SamplerStatus,
    /// Highest-likelihood parameter vector
    pub best_fit: Vec<f64>,
    #[serde(with = "neg_inf_as_null")]
    pub best_log_l: f64,
    pub summary: Option<PosteriorSummary>,
    /// Reduced χ² of the best fit over the usable pixels
    pub reduced_chi2: Option<f64>,
}

impl FitResult {
    /// Assemble a result from a finished sampling run.
    ///
    /// # Arguments
    /// * `run` - Merged nested-sampling output
    /// * `region` - Region the fit covers
    /// * `layout` - Parameter layout the samples follow
    /// * `renderer` - Model stars and render mode used in the likelihood
    /// * `noise` - Noise model used in the likelihood
    /// * `usable_pixels` - Pixels that entered the likelihood
    /// * `seed` - Seed of the posterior resampling
    pub fn from_run(
        run: NestedRun,
        region: Region,
        layout: ParamLayout,
        renderer: ModelRenderer,
        noise: NoiseModel,
        usable_pixels: usize,
        seed: u64,
    ) -> Self {
        let weights = importance_weights(&run.samples);
        let (best_fit, best_log_l) = run
            .samples
            .iter()
            .filter(|s| s.v.len() == layout.len())
            .max_by(|a, b| a.log_l.total_cmp(&b.log_l))
            .map_or((Vec::new(), f64::NEG_INFINITY), |s| (s.v.clone(), s.log_l));
        let summary = PosteriorSummary::from_samples(layout.labels(), &run.samples, seed);
        let samples = run
            .samples
            .into_iter()
            .zip(weights)
            .map(|(s, weight)| PosteriorSample {
                values: s.v,
                log_l: s.log_l,
                weight,
            })
            .collect();

        Self {
            region,
            layout,
            renderer,
            noise,
            usable_pixels,
            samples,
            log_z: run.log_z,
            log_z_err: run.log_z_err,
            information: run.information,
            iterations: run.iterations,
            calls: run.calls,
            status: run.status,
            best_fit,
            best_log_l,
            summary,
            reduced_chi2: None,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.status == SamplerStatus::Converged
    }

    /// The sampler stopped on a budget, so the posterior is partial
    pub fn is_low_confidence(&self) -> bool {
        !self.is_converged()
    }

    /// Turn a partial result into [`FitError::ConvergenceFailure`]
    pub fn ensure_converged(self) -> Result<Self, FitError> {
        match self.status {
            SamplerStatus::Converged => Ok(self),
            SamplerStatus::Failed(reason) => Err(FitError::ConvergenceFailure {
                region: self.region.name.clone(),
                iterations: self.iterations,
                reason: reason.to_string(),
            }),
            status => Err(FitError::ConvergenceFailure {
                region: self.region.name.clone(),
                iterations: self.iterations,
                reason: format!("sampler left in state {status:?}"),
            }),
        }
    }

    pub fn best_fit_params(&self) -> Result<PsfParams, PriorViolation> {
        self.layout.values_to_params(&self.best_fit)
    }

    /// Posterior mean and standard deviation of a parameter, by label
    pub fn posterior(&self, label: &str) -> Option<(f64, f64)> {
        self.summary.as_ref()?.get(label)
    }

    /// Render the best-fit model over a full image of shape `(rows, cols)`
    pub fn render(&self, shape: (usize, usize)) -> Result<Array2<f64>, PriorViolation> {
        self.render_values(&self.best_fit, shape)
    }

    /// Render any parameter vector in this result's layout, such as a
    /// posterior draw
    pub fn render_values(
        &self,
        values: &[f64],
        shape: (usize, usize),
    ) -> Result<Array2<f64>, PriorViolation> {
        let params = self.layout.values_to_params(values)?;
        self.renderer.render(shape, (0.0, 0.0), &params)
    }

    /// Render the best-fit model over the fitting region only
    pub fn render_region(&self) -> Result<Array2<f64>, PriorViolation> {
        let params = self.best_fit_params()?;
        self.renderer
            .render(self.region.shape(), self.region.origin(), &params)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), FitError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, FitError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
