//! End-to-end recovery of injected PSF parameters from synthetic stars.

use aureole::catalog::ZeroPointCalibration;
use aureole::mask::Region;
use aureole::model::{BreakSet, Prior, PsfParams, RenderMode};
use aureole::synthetic::{SyntheticField, SyntheticStar};
use aureole::{FitConfig, FitResult, PsfFitter};

const ZERO_POINT: f64 = 25.0;

fn truth(noise_sigma: f64) -> PsfParams {
    PsfParams {
        concentration: 3.5,
        width: 5.0,
        breaks: BreakSet::new(&[30.0], &[2.5]).unwrap(),
        cutoff: 300.0,
        aureole_fraction: 0.3,
        ellipticity: 0.0,
        position_angle: 0.0,
        background: 0.0,
        noise_sigma,
    }
}

/// Tier thresholds put a mag 15 star in the bright tier without a bleed strip
fn base_config(n_live: usize, stopping_fraction: f64) -> FitConfig {
    let mut config = FitConfig::default();
    config.catalog.bright_mag = 15.5;
    config.catalog.faint_mag = 16.5;
    config.catalog.saturation_mag = 5.0;
    config.catalog.mask_mag_limit = 17.0;
    config.model.render = RenderMode::Analytic;
    config.model.priors.break_radii = vec![Prior::Fixed(30.0)];
    config.model.priors.cutoff = Prior::Fixed(300.0);
    config.model.priors.background = Prior::Fixed(0.0);
    config.model.priors.noise_sigma = Prior::Fixed(1.0);
    config.sampler.n_live = n_live;
    config.sampler.stopping_fraction = stopping_fraction;
    config.sampler.seed = 3;
    config
}

fn fit(config: FitConfig, size: usize, truth: PsfParams, seed: u64) -> FitResult {
    let centre = size as f64 / 2.0;
    let field = SyntheticField::generate(
        (size, size),
        &[SyntheticStar {
            x: centre,
            y: centre,
            mag: 15.0,
        }],
        truth,
        ZERO_POINT,
        RenderMode::Analytic,
        seed,
    )
    .unwrap();
    let calibration = ZeroPointCalibration::constant(ZERO_POINT);
    let fitter = PsfFitter::new(config).unwrap();
    let catalog = fitter
        .prepare(&field.detections, &field.cross_matches, &calibration)
        .unwrap();
    assert_eq!(catalog.fitting_targets().count(), 1);
    fitter
        .fit_region(
            &field.image.view(),
            &Region::whole_image(field.image.dim()),
            &catalog,
            &calibration,
        )
        .unwrap()
}

#[test]
fn test_bright_star_scenario() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Aureole fraction stays on its default prior and is fitted with the slope
    let config = base_config(400, 0.01);
    let result = fit(config, 96, truth(1.0), 7);

    assert!(result.is_converged(), "status {:?}", result.status);
    assert_eq!(
        result.layout.free_labels(),
        vec!["beta", "alpha", "n0", "frac"]
    );

    let (beta, _) = result.posterior("beta").unwrap();
    let (alpha, _) = result.posterior("alpha").unwrap();
    let (slope, _) = result.posterior("n0").unwrap();
    let (frac, _) = result.posterior("frac").unwrap();
    assert!((beta - 3.5).abs() < 0.05 * 3.5, "beta = {beta}");
    assert!((alpha - 5.0).abs() < 0.05 * 5.0, "alpha = {alpha}");
    assert!((slope - 2.5).abs() < 0.10 * 2.5, "slope = {slope}");
    assert!((frac - 0.3).abs() < 0.10 * 0.3, "frac = {frac}");

    let chi2 = result.reduced_chi2.unwrap();
    assert!((chi2 - 1.0).abs() < 0.1, "reduced chi2 = {chi2}");
}

#[test]
fn test_noise_free_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Fraction joins the free set; the slope stays at its injected value
    let mut config = base_config(100, 0.05);
    config.model.priors.slopes = vec![Prior::Fixed(2.5)];
    let truth = truth(0.0);
    let result = fit(config, 64, truth, 1);

    assert!(result.is_converged(), "status {:?}", result.status);
    for (label, injected) in [
        ("beta", truth.concentration),
        ("alpha", truth.width),
        ("frac", truth.aureole_fraction),
    ] {
        let (mean, std) = result.posterior(label).unwrap();
        assert!(
            (mean - injected).abs() <= 3.0 * std + 1e-3 * injected,
            "{label}: {mean} ± {std}, injected {injected}"
        );
    }

    // The best fit reproduces the injected image closely
    let rendered = result.render((64, 64)).unwrap();
    let field = SyntheticField::generate(
        (64, 64),
        &[SyntheticStar {
            x: 32.0,
            y: 32.0,
            mag: 15.0,
        }],
        truth,
        ZERO_POINT,
        RenderMode::Analytic,
        1,
    )
    .unwrap();
    let worst = rendered
        .iter()
        .zip(field.image.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    assert!(worst < 3.0, "largest residual {worst}");
}
