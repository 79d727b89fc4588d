//! Seeded synthetic star fields.
//!
//! Used by the integration tests and the `synthetic_fit` binary: a composite
//! PSF is rendered for a list of stars, Gaussian noise is added, and matching
//! detection and cross-match records are produced so the full pipeline can be
//! exercised without external inputs.

use crate::catalog::{CrossMatchRecord, DetectionRecord, ZeroPointCalibration};
use crate::model::{ModelRenderer, ModelStar, PriorViolation, PsfParams, RenderMode};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

/// Deterministic array of normally distributed values.
///
/// # Arguments
/// * `size` - `(rows, cols)` of the output
/// * `mean` - Mean of the distribution
/// * `std_dev` - Standard deviation of the distribution
/// * `seed` - Random seed
///
/// # Example
/// ```
/// use aureole::synthetic::simple_normal_array;
///
/// let noise = simple_normal_array((10, 10), 100.0, 10.0, 42);
/// assert_eq!(noise.dim(), (10, 10));
/// ```
pub fn simple_normal_array(size: (usize, usize), mean: f64, std_dev: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn(size, |_| {
        let z: f64 = StandardNormal.sample(&mut rng);
        mean + std_dev * z
    })
}

/// Add the rendered model of `renderer` at `params` onto `image`
pub fn inject_stars(
    image: &mut Array2<f64>,
    renderer: &ModelRenderer,
    params: &PsfParams,
) -> Result<(), PriorViolation> {
    let model = renderer.render(image.dim(), (0.0, 0.0), params)?;
    *image += &model;
    Ok(())
}

/// A star to place in a synthetic field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticStar {
    pub x: f64,
    pub y: f64,
    pub mag: f64,
}

/// A rendered field with its catalogs and ground truth
#[derive(Debug, Clone)]
pub struct SyntheticField {
    pub image: Array2<f64>,
    pub detections: Vec<DetectionRecord>,
    pub cross_matches: Vec<CrossMatchRecord>,
    pub calibration: ZeroPointCalibration,
    pub truth: PsfParams,
}

impl SyntheticField {
    /// Render `stars` with `truth` and add Gaussian noise of `truth.noise_sigma`.
    ///
    /// # Arguments
    /// * `shape` - `(rows, cols)` of the image
    /// * `stars` - Star positions and magnitudes
    /// * `truth` - PSF parameters, background and noise level
    /// * `zero_point` - Magnitude of a one-count source
    /// * `render` - Sampling of the profile onto pixels
    /// * `seed` - Noise seed
    pub fn generate(
        shape: (usize, usize),
        stars: &[SyntheticStar],
        truth: PsfParams,
        zero_point: f64,
        render: RenderMode,
        seed: u64,
    ) -> Result<Self, PriorViolation> {
        let calibration = ZeroPointCalibration::constant(zero_point);
        let model_stars = stars
            .iter()
            .map(|s| ModelStar {
                x: s.x,
                y: s.y,
                flux: calibration.flux(s.mag, s.x, s.y),
                oversample: true,
            })
            .collect();
        let renderer = ModelRenderer::new(model_stars, render);

        let mut image = simple_normal_array(shape, 0.0, truth.noise_sigma, seed);
        inject_stars(&mut image, &renderer, &truth)?;

        let detections = stars
            .iter()
            .enumerate()
            .map(|(i, s)| DetectionRecord {
                id: i as u64 + 1,
                x: s.x,
                y: s.y,
                flux: calibration.flux(s.mag, s.x, s.y),
                a: 2.0,
                b: 2.0,
                theta: 0.0,
                class_star: 0.98,
            })
            .collect();
        let cross_matches = stars
            .iter()
            .enumerate()
            .map(|(i, s)| CrossMatchRecord {
                id: i as u64 + 1,
                reference_mag: Some(s.mag),
            })
            .collect();

        Ok(Self {
            image,
            detections,
            cross_matches,
            calibration,
            truth,
        })
    }
}
