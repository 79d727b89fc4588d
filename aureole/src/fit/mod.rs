//! Per-region orchestration of the fitting pipeline.
//!
//! [`PsfFitter`] chains the stages for each fitting region: the prepared
//! catalog is restricted to the region, a mask is built, the fitting stars
//! become model stars, and the nested sampler explores the likelihood. Each
//! region yields one [`FitResult`].

pub mod result;
pub mod summary;

pub use result::{FitResult, PosteriorSample};
pub use summary::{importance_weights, resample_equal, weighted_mean_and_covariance, PosteriorSummary};

use crate::catalog::{prepare_catalog, CrossMatchRecord, DetectionRecord, StarCatalog, ZeroPointCalibration};
use crate::config::FitConfig;
use crate::error::FitError;
use crate::likelihood::{LikelihoodEngine, NoiseModel};
use crate::mask::{Mask, MaskBuilder, Region};
use crate::model::{reduced_chi_square, ModelRenderer, ModelStar};
use crate::sampler::NestedSampler;
use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::{s, ArrayView2};
use std::path::{Path, PathBuf};

/// Checkpoint file of one region, derived from the configured path
pub fn region_checkpoint_path(path: &Path, region: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{region}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{region}"),
    };
    path.with_file_name(name)
}

/// Fits the composite PSF model region by region
pub struct PsfFitter {
    config: FitConfig,
    progress: Option<ProgressBar>,
}

impl PsfFitter {
    /// Validate `config` and build a fitter
    pub fn new(config: FitConfig) -> Result<Self, FitError> {
        config.validate()?;
        Ok(Self {
            config,
            progress: None,
        })
    }

    /// Report sampler iterations on `bar`
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Prepare the star catalog from detections and cross-matches
    pub fn prepare(
        &self,
        detections: &[DetectionRecord],
        cross_matches: &[CrossMatchRecord],
        calibration: &ZeroPointCalibration,
    ) -> Result<StarCatalog, FitError> {
        prepare_catalog(detections, cross_matches, calibration, &self.config.catalog)
    }

    /// Build the mask of `region`; `catalog` should already be restricted to it
    pub fn build_mask(&self, region: &Region, image_shape: (usize, usize), catalog: &StarCatalog) -> Mask {
        MaskBuilder::new(
            &self.config.mask,
            self.config.catalog.saturation_mag,
            self.config.catalog.mask_mag_limit,
        )
        .build(region, image_shape, catalog)
    }

    /// Model stars for the fitting targets, with fluxes from their magnitudes
    pub fn model_renderer(&self, catalog: &StarCatalog, calibration: &ZeroPointCalibration) -> ModelRenderer {
        let stars = catalog
            .fitting_targets()
            .map(|star| ModelStar {
                x: star.x,
                y: star.y,
                flux: calibration.flux(star.mag, star.x, star.y),
                oversample: star.tier.oversample_core(),
            })
            .collect();
        ModelRenderer::new(stars, self.config.model.render)
    }

    /// Fit a single region.
    ///
    /// # Arguments
    /// * `image` - Full image
    /// * `region` - Region to fit, in image coordinates
    /// * `catalog` - Prepared catalog of the whole image
    /// * `calibration` - Zero point for model fluxes
    ///
    /// # Returns
    /// The fit result, which may be low-confidence if a sampler budget ran
    /// out. [`FitError::MaskDegenerate`] if too few usable pixels remain.
    pub fn fit_region(
        &self,
        image: &ArrayView2<f64>,
        region: &Region,
        catalog: &StarCatalog,
        calibration: &ZeroPointCalibration,
    ) -> Result<FitResult, FitError> {
        let regional = catalog.for_region(region, self.config.catalog.outside_gap);
        let mask = self.build_mask(region, image.dim(), &regional);
        let renderer = self.model_renderer(&regional, calibration);
        info!(
            "Region {}: {} usable of {} pixels, {} fitting stars",
            region.name,
            mask.usable_count(),
            region.area(),
            renderer.stars().len()
        );

        let layout = self.config.model.layout()?;
        let engine = LikelihoodEngine::new(
            image,
            &mask,
            renderer.clone(),
            layout.clone(),
            &self.config.likelihood,
        )?;

        let mut sampler_config = self.config.sampler.clone();
        sampler_config.checkpoint_path = sampler_config
            .checkpoint_path
            .as_deref()
            .map(|path| region_checkpoint_path(path, &region.name));
        let seed = sampler_config.seed;
        let mut sampler = NestedSampler::new(sampler_config)?.with_label(region.name.clone());
        if let Some(bar) = &self.progress {
            sampler = sampler.with_progress(bar.clone());
        }
        let run = sampler.run_nested(&engine)?;

        let mut result = FitResult::from_run(
            run,
            region.clone(),
            layout,
            renderer,
            self.config.likelihood.noise,
            engine.usable_pixels(),
            seed,
        );
        result.reduced_chi2 = self.reduced_chi2(image, &mask, &result);
        if result.is_low_confidence() {
            warn!(
                "Region {}: sampler stopped early ({:?}), posterior is partial",
                region.name, result.status
            );
        }
        Ok(result)
    }

    fn reduced_chi2(&self, image: &ArrayView2<f64>, mask: &Mask, result: &FitResult) -> Option<f64> {
        if self.config.likelihood.noise != NoiseModel::Gaussian {
            return None;
        }
        let params = result.best_fit_params().ok()?;
        let model = result.render_region().ok()?;
        let region = &result.region;
        let data = image.slice(s![region.min_row..=region.max_row, region.min_col..=region.max_col]);
        reduced_chi_square(
            &data,
            &model.view(),
            &mask.usable().view(),
            params.noise_sigma,
            result.layout.ndim(),
        )
    }

    /// Fit several regions, skipping those that fail locally.
    ///
    /// Region-local failures (a degenerate mask) are logged and skipped; any
    /// other error aborts the whole run.
    pub fn fit_regions(
        &self,
        image: &ArrayView2<f64>,
        regions: &[Region],
        catalog: &StarCatalog,
        calibration: &ZeroPointCalibration,
    ) -> Result<Vec<FitResult>, FitError> {
        let mut results = Vec::with_capacity(regions.len());
        for region in regions {
            match self.fit_region(image, region, catalog, calibration) {
                Ok(result) => results.push(result),
                Err(err) if err.is_region_local() => {
                    warn!("Skipping region {}: {}", region.name, err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }
}
