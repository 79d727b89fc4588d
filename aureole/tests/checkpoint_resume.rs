//! Interrupted fits resume from their checkpoints.

use aureole::catalog::{StarCatalog, ZeroPointCalibration};
use aureole::fit::region_checkpoint_path;
use aureole::mask::Region;
use aureole::model::{BreakSet, Prior, PsfParams, RenderMode};
use aureole::sampler::{load_checkpoint, FailureReason, SamplerStatus};
use aureole::synthetic::{SyntheticField, SyntheticStar};
use aureole::{FitConfig, FitResult, PsfFitter};
use std::path::Path;
use tempfile::TempDir;

const ZERO_POINT: f64 = 25.0;
const SIZE: usize = 48;

fn field() -> SyntheticField {
    let truth = PsfParams {
        concentration: 3.0,
        width: 3.0,
        breaks: BreakSet::new(&[15.0], &[2.5]).unwrap(),
        cutoff: 200.0,
        aureole_fraction: 0.1,
        ellipticity: 0.0,
        position_angle: 0.0,
        background: 0.0,
        noise_sigma: 1.0,
    };
    SyntheticField::generate(
        (SIZE, SIZE),
        &[SyntheticStar {
            x: 24.0,
            y: 24.0,
            mag: 15.0,
        }],
        truth,
        ZERO_POINT,
        RenderMode::Analytic,
        21,
    )
    .unwrap()
}

/// Two free parameters and a single worker so runs are reproducible
fn config(checkpoint: Option<&Path>, max_iterations: Option<u64>) -> FitConfig {
    let mut config = FitConfig::default();
    config.catalog.bright_mag = 15.5;
    config.catalog.faint_mag = 16.5;
    config.catalog.saturation_mag = 5.0;
    config.catalog.mask_mag_limit = 17.0;
    config.model.render = RenderMode::Analytic;
    config.model.priors.slopes = vec![Prior::Fixed(2.5)];
    config.model.priors.break_radii = vec![Prior::Fixed(15.0)];
    config.model.priors.cutoff = Prior::Fixed(200.0);
    config.model.priors.aureole_fraction = Prior::Fixed(0.1);
    config.model.priors.background = Prior::Fixed(0.0);
    config.sampler.n_live = 60;
    config.sampler.stopping_fraction = 0.05;
    config.sampler.workers = 1;
    config.sampler.seed = 5;
    config.sampler.checkpoint_every = 50;
    config.sampler.checkpoint_path = checkpoint.map(Path::to_path_buf);
    config.sampler.max_iterations = max_iterations;
    config
}

fn fit(field: &SyntheticField, config: FitConfig) -> FitResult {
    let calibration = ZeroPointCalibration::constant(ZERO_POINT);
    let fitter = PsfFitter::new(config).unwrap();
    let catalog: StarCatalog = fitter
        .prepare(&field.detections, &field.cross_matches, &calibration)
        .unwrap();
    fitter
        .fit_region(
            &field.image.view(),
            &Region::whole_image((SIZE, SIZE)),
            &catalog,
            &calibration,
        )
        .unwrap()
}

#[test]
fn test_interrupted_fit_resumes_to_same_evidence() {
    let _ = env_logger::builder().is_test(true).try_init();
    let field = field();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sampler.json");

    let uninterrupted = fit(&field, config(None, None));
    assert!(uninterrupted.is_converged());

    let partial = fit(&field, config(Some(&path), Some(150)));
    assert_eq!(
        partial.status,
        SamplerStatus::Failed(FailureReason::MaxIterations)
    );
    assert!(partial.is_low_confidence());
    let saved = load_checkpoint(&region_checkpoint_path(&path, "full")).unwrap();
    assert_eq!(saved.iteration, 150);

    let resumed = fit(&field, config(Some(&path), None));
    assert!(resumed.is_converged());
    assert!(
        (resumed.log_z - uninterrupted.log_z).abs() <= uninterrupted.log_z_err,
        "resumed ln Z {} vs {} ± {}",
        resumed.log_z,
        uninterrupted.log_z,
        uninterrupted.log_z_err
    );
    assert_eq!(resumed.iterations, uninterrupted.iterations);
}

#[test]
fn test_corrupt_checkpoint_restarts_from_scratch() {
    let _ = env_logger::builder().is_test(true).try_init();
    let field = field();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sampler.json");
    std::fs::write(region_checkpoint_path(&path, "full"), "{ \"version\": 1, \"state\": [").unwrap();

    let uninterrupted = fit(&field, config(None, None));
    let restarted = fit(&field, config(Some(&path), None));
    assert!(restarted.is_converged());
    assert_eq!(restarted.log_z, uninterrupted.log_z);
    assert_eq!(restarted.samples, uninterrupted.samples);

    // The finished run replaced the corrupt file with a readable checkpoint
    let saved = load_checkpoint(&region_checkpoint_path(&path, "full")).unwrap();
    assert_eq!(saved.status, SamplerStatus::Converged);
}

#[test]
fn test_checkpoint_ignored_after_prior_change() {
    let _ = env_logger::builder().is_test(true).try_init();
    let field = field();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sampler.json");

    let mut original = config(Some(&path), Some(150));
    original.model.priors.concentration = Prior::Uniform { min: 2.0, max: 5.0 };
    let partial = fit(&field, original);
    assert!(partial.is_low_confidence());
    assert_eq!(
        load_checkpoint(&region_checkpoint_path(&path, "full"))
            .unwrap()
            .iteration,
        150
    );

    // Same dimension and seed, different prior: the saved run must not be reused
    let narrowed = |checkpoint: Option<&Path>| {
        let mut config = config(checkpoint, None);
        config.model.priors.concentration = Prior::Uniform { min: 2.5, max: 4.0 };
        config
    };
    let rerun = fit(&field, narrowed(Some(&path)));
    let fresh = fit(&field, narrowed(None));
    assert!(rerun.is_converged());
    assert_eq!(rerun.iterations, fresh.iterations);
    assert_eq!(rerun.log_z, fresh.log_z);
    assert_eq!(rerun.samples, fresh.samples);
}
