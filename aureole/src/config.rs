//! Run configuration for catalog preparation, masking, model, likelihood and
//! sampler.
//!
//! Every section has working defaults, so a JSON file only needs to name the
//! options it overrides. [`FitConfig::load_from_file`] validates the result
//! before returning it; invalid break counts or prior bounds are rejected at
//! load time rather than mid-sampling.

use crate::catalog::{CrossMatchPolicy, TierThresholds};
use crate::error::FitError;
use crate::likelihood::NoiseModel;
use crate::mask::{ApertureLaw, StripGeometry};
use crate::model::{ParamLayout, PriorSet, RenderMode, MAX_BREAKS};
use crate::sampler::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Star Catalog Preparer options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Stars brighter than this are in the bright tier
    pub bright_mag: f64,
    /// Stars fainter than this are not fitted
    pub faint_mag: f64,
    /// Stars brighter than this receive a bleed-trail strip mask
    pub saturation_mag: f64,
    /// Faint stars brighter than this are still masked as contamination
    pub mask_mag_limit: f64,
    pub cross_match: CrossMatchPolicy,
    /// Allowed difference between detection and cross-match record counts
    pub mismatch_tolerance: usize,
    /// Classifier score below which a bright detection is extended
    pub extended_class_star: f64,
    /// Footprint ellipticity above which a bright detection is extended
    pub extended_ellipticity: f64,
    /// Stars farther than this (pixels) outside the fitting region are not fitted
    pub outside_gap: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            bright_mag: 12.0,
            faint_mag: 13.5,
            saturation_mag: 12.5,
            mask_mag_limit: 15.0,
            cross_match: CrossMatchPolicy::Optional,
            mismatch_tolerance: 0,
            extended_class_star: 0.5,
            extended_ellipticity: 0.7,
            outside_gap: 60.0,
        }
    }
}

impl CatalogConfig {
    pub fn thresholds(&self) -> TierThresholds {
        TierThresholds {
            bright_mag: self.bright_mag,
            faint_mag: self.faint_mag,
        }
    }
}

/// Mask Builder options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Multiplier applied to every aperture radius
    pub padding_factor: f64,
    /// Empirical magnitude to aperture-radius law
    pub aperture_law: ApertureLaw,
    /// Multiplier on the catalog footprint of extended sources
    pub extended_scale: f64,
    pub strip: StripGeometry,
    /// Border width in pixels excluded from all fitting
    pub field_edge: usize,
    /// Radius around each fitting target that never counts as contamination
    pub core_keepout: f64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            padding_factor: 1.0,
            aperture_law: ApertureLaw::default(),
            extended_scale: 3.0,
            strip: StripGeometry::default(),
            field_edge: 0,
            core_keepout: 20.0,
        }
    }
}

/// Composite PSF Model options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Priors; the slope and break-radius lists set the break count
    pub priors: PriorSet,
    /// Fit ellipticity and position angle
    pub elliptical: bool,
    pub render: RenderMode,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            priors: PriorSet::default(),
            elliptical: false,
            render: RenderMode::Oversampled {
                factor: 5,
                radius: 8.0,
            },
        }
    }
}

impl ModelConfig {
    /// Number of aureole break radii
    pub fn n_breaks(&self) -> usize {
        self.priors.n_breaks()
    }

    /// Parameter layout implied by the priors and geometry
    pub fn layout(&self) -> Result<ParamLayout, FitError> {
        ParamLayout::new(&self.priors, self.elliptical).map_err(FitError::InvalidConfig)
    }
}

/// Likelihood & Prior Engine options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodConfig {
    pub noise: NoiseModel,
    /// Minimum usable pixels for a region to be fitted
    pub min_usable_pixels: usize,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            noise: NoiseModel::Gaussian,
            min_usable_pixels: 100,
        }
    }
}

/// Complete fitting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FitConfig {
    pub catalog: CatalogConfig,
    pub mask: MaskConfig,
    pub model: ModelConfig,
    pub likelihood: LikelihoodConfig,
    pub sampler: SamplerConfig,
}

impl FitConfig {
    /// Check cross-field consistency.
    ///
    /// # Returns
    /// The first problem found as [`FitError::InvalidConfig`].
    pub fn validate(&self) -> Result<(), FitError> {
        let invalid = |msg: String| Err(FitError::InvalidConfig(msg));

        let catalog = &self.catalog;
        if catalog.faint_mag < catalog.bright_mag {
            return invalid(format!(
                "faint tier threshold {} is brighter than bright threshold {}",
                catalog.faint_mag, catalog.bright_mag
            ));
        }

        let mask = &self.mask;
        if !(mask.padding_factor > 0.0) || !(mask.extended_scale > 0.0) {
            return invalid("mask padding and extended scale must be positive".to_string());
        }
        if mask.core_keepout < 0.0 {
            return invalid("core keep-out radius must be non-negative".to_string());
        }
        mask.aperture_law.validate().map_err(FitError::InvalidConfig)?;

        let model = &self.model;
        if model.n_breaks() == 0 || model.n_breaks() > MAX_BREAKS {
            return invalid(format!(
                "break count {} outside supported range 1..={MAX_BREAKS}",
                model.n_breaks()
            ));
        }
        if model.priors.break_radii.len() != model.n_breaks() {
            return invalid(format!(
                "{} slope priors but {} break-radius priors given",
                model.priors.slopes.len(),
                model.priors.break_radii.len()
            ));
        }
        if let RenderMode::Oversampled { factor, radius } = model.render {
            if factor == 0 || !(radius >= 0.0) {
                return invalid("oversampling factor and radius must be positive".to_string());
            }
        }
        let layout = model.layout()?;

        if let NoiseModel::Poisson { gain } = self.likelihood.noise {
            if !(gain > 0.0) {
                return invalid(format!("Poisson gain {gain} must be positive"));
            }
        }

        self.sampler.validate(layout.ndim()).map_err(FitError::InvalidConfig)
    }

    /// Load a configuration from JSON and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, FitError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), FitError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
