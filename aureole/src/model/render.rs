//! Model image synthesis.
//!
//! The renderer sums the composite profile of every model star plus the
//! uniform background. Pixel `(row, col)` of a rendered region has its centre
//! at image coordinates `(x, y) = (origin.0 + col, origin.1 + row)`.
//!
//! Near the centre of stars flagged for oversampling the profile is averaged
//! over a regular `factor × factor` sub-grid; everywhere else the analytic
//! value at the pixel centre is used.

use super::params::{PriorViolation, PsfParams};
use super::profile::CompositeProfile;
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// How the profile is sampled onto pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum RenderMode {
    /// Profile value at each pixel centre
    #[default]
    Analytic,
    /// Sub-grid mean within `radius` pixels of oversampled stars
    Oversampled { factor: usize, radius: f64 },
}

/// A star as seen by the model: position, total flux, and core treatment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelStar {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    /// Render the core on a sub-pixel grid when oversampling is enabled
    pub oversample: bool,
}

/// Renders the superposition of model stars for a given parameter vector.
///
/// The renderer holds only immutable data and can be shared across threads,
/// so residual maps may be produced while sampling is still running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRenderer {
    stars: Vec<ModelStar>,
    mode: RenderMode,
}

impl ModelRenderer {
    pub fn new(stars: Vec<ModelStar>, mode: RenderMode) -> Self {
        Self { stars, mode }
    }

    pub fn stars(&self) -> &[ModelStar] {
        &self.stars
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Summed stellar surface brightness at image coordinates `(x, y)`,
    /// excluding the background.
    pub fn star_light(&self, profile: &CompositeProfile, x: f64, y: f64) -> f64 {
        self.stars
            .iter()
            .map(|star| star.flux * self.sample_star(profile, star, x, y))
            .sum()
    }

    /// Unit-flux contribution of one star to the pixel centred on `(x, y)`
    fn sample_star(&self, profile: &CompositeProfile, star: &ModelStar, x: f64, y: f64) -> f64 {
        let dx = x - star.x;
        let dy = y - star.y;
        match self.mode {
            RenderMode::Oversampled { factor, radius }
                if star.oversample && factor > 1 && dx * dx + dy * dy <= radius * radius =>
            {
                let step = 1.0 / factor as f64;
                let offset = 0.5 * step - 0.5;
                let mut total = 0.0;
                for i in 0..factor {
                    let sy = dy + offset + i as f64 * step;
                    for j in 0..factor {
                        let sx = dx + offset + j as f64 * step;
                        total += profile.evaluate(sx, sy);
                    }
                }
                total / (factor * factor) as f64
            }
            _ => profile.evaluate(dx, dy),
        }
    }

    /// Render a rectangular region including the background level.
    ///
    /// # Arguments
    /// * `shape` - `(rows, cols)` of the output
    /// * `origin` - Image coordinates `(x, y)` of pixel `(0, 0)`
    /// * `params` - Model parameters to render
    ///
    /// # Returns
    /// Model surface brightness per pixel, or the [`PriorViolation`] that
    /// makes `params` unrenderable.
    pub fn render(
        &self,
        shape: (usize, usize),
        origin: (f64, f64),
        params: &PsfParams,
    ) -> Result<Array2<f64>, PriorViolation> {
        let profile = CompositeProfile::new(params)?;
        let mut image = Array2::<f64>::zeros(shape);
        Zip::indexed(&mut image).par_for_each(|(row, col), pixel| {
            let x = origin.0 + col as f64;
            let y = origin.1 + row as f64;
            *pixel = params.background + self.star_light(&profile, x, y);
        });
        Ok(image)
    }

    /// Render a model with the same geometry as `data`
    pub fn render_like(
        &self,
        data: &ArrayView2<f64>,
        params: &PsfParams,
    ) -> Result<Array2<f64>, PriorViolation> {
        self.render(data.dim(), (0.0, 0.0), params)
    }
}

/// Residual map `data - model`
pub fn residual_map(data: &ArrayView2<f64>, model: &ArrayView2<f64>) -> Array2<f64> {
    data - model
}

/// Reduced χ² over the pixels where `usable` is true.
///
/// # Arguments
/// * `data` - Observed pixels
/// * `model` - Rendered model with the same shape
/// * `usable` - Pixel usability mask
/// * `sigma` - Per-pixel noise level
/// * `n_free` - Number of fitted parameters
///
/// # Returns
/// `χ² / (n_usable - n_free)`, or `None` with no degrees of freedom left.
pub fn reduced_chi_square(
    data: &ArrayView2<f64>,
    model: &ArrayView2<f64>,
    usable: &ArrayView2<bool>,
    sigma: f64,
    n_free: usize,
) -> Option<f64> {
    let mut chi2 = 0.0;
    let mut count = 0usize;
    Zip::from(data)
        .and(model)
        .and(usable)
        .for_each(|&d, &m, &ok| {
            if ok {
                let r = (d - m) / sigma;
                chi2 += r * r;
                count += 1;
            }
        });
    let dof = count.checked_sub(n_free).filter(|&dof| dof > 0)?;
    Some(chi2 / dof as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::params::BreakSet;
    use approx::assert_relative_eq;

    fn params() -> PsfParams {
        PsfParams {
            concentration: 3.5,
            width: 2.0,
            breaks: BreakSet::new(&[15.0], &[2.5]).unwrap(),
            cutoff: 100.0,
            aureole_fraction: 0.1,
            ellipticity: 0.0,
            position_angle: 0.0,
            background: 5.0,
            noise_sigma: 1.0,
        }
    }

    fn star(x: f64, y: f64, oversample: bool) -> ModelStar {
        ModelStar {
            x,
            y,
            flux: 1000.0,
            oversample,
        }
    }

    #[test]
    fn test_render_peaks_at_star_position() {
        let renderer = ModelRenderer::new(vec![star(20.0, 12.0, false)], RenderMode::Analytic);
        let image = renderer.render((30, 40), (0.0, 0.0), &params()).unwrap();
        let (argmax, _) = image
            .indexed_iter()
            .fold(((0, 0), f64::MIN), |best, (idx, &v)| {
                if v > best.1 {
                    (idx, v)
                } else {
                    best
                }
            });
        assert_eq!(argmax, (12, 20));
    }

    #[test]
    fn test_render_is_additive_with_background() {
        let p = params();
        let one = ModelRenderer::new(vec![star(10.0, 10.0, false)], RenderMode::Analytic);
        let two = ModelRenderer::new(
            vec![star(10.0, 10.0, false), star(25.0, 18.0, false)],
            RenderMode::Analytic,
        );
        let other = ModelRenderer::new(vec![star(25.0, 18.0, false)], RenderMode::Analytic);

        let a = one.render((32, 32), (0.0, 0.0), &p).unwrap();
        let b = other.render((32, 32), (0.0, 0.0), &p).unwrap();
        let both = two.render((32, 32), (0.0, 0.0), &p).unwrap();
        for ((x, y), z) in a.iter().zip(b.iter()).zip(both.iter()) {
            assert_relative_eq!(x + y - p.background, *z, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_origin_offsets_coordinates() {
        let renderer = ModelRenderer::new(vec![star(50.0, 60.0, false)], RenderMode::Analytic);
        let full = renderer.render((80, 80), (0.0, 0.0), &params()).unwrap();
        let cutout = renderer.render((20, 20), (40.0, 50.0), &params()).unwrap();
        assert_relative_eq!(cutout[[10, 10]], full[[60, 50]], max_relative = 1e-12);
    }

    #[test]
    fn test_oversampling_only_changes_core() {
        let p = params();
        let analytic = ModelRenderer::new(vec![star(16.0, 16.0, true)], RenderMode::Analytic)
            .render((33, 33), (0.0, 0.0), &p)
            .unwrap();
        let oversampled = ModelRenderer::new(
            vec![star(16.0, 16.0, true)],
            RenderMode::Oversampled {
                factor: 5,
                radius: 4.0,
            },
        )
        .render((33, 33), (0.0, 0.0), &p)
        .unwrap();

        // Sub-pixel averaging lowers the cusp of a centred peak
        assert!(oversampled[[16, 16]] < analytic[[16, 16]]);
        assert_relative_eq!(oversampled[[0, 0]], analytic[[0, 0]], max_relative = 1e-12);
        assert_relative_eq!(oversampled[[16, 25]], analytic[[16, 25]], max_relative = 1e-12);
    }

    #[test]
    fn test_oversampling_skips_unflagged_stars() {
        let p = params();
        let mode = RenderMode::Oversampled {
            factor: 5,
            radius: 4.0,
        };
        let analytic = ModelRenderer::new(vec![star(16.0, 16.0, false)], RenderMode::Analytic)
            .render((33, 33), (0.0, 0.0), &p)
            .unwrap();
        let unflagged = ModelRenderer::new(vec![star(16.0, 16.0, false)], mode)
            .render((33, 33), (0.0, 0.0), &p)
            .unwrap();
        assert_eq!(analytic, unflagged);
    }

    #[test]
    fn test_reduced_chi_square() {
        let data = Array2::from_elem((4, 4), 2.0);
        let model = Array2::from_elem((4, 4), 1.0);
        let mut usable = Array2::from_elem((4, 4), true);
        usable[[0, 0]] = false;
        // 15 usable pixels, residual 1 each, 5 free parameters
        let chi = reduced_chi_square(&data.view(), &model.view(), &usable.view(), 1.0, 5).unwrap();
        assert_relative_eq!(chi, 1.5);
        assert!(reduced_chi_square(&data.view(), &model.view(), &usable.view(), 1.0, 15).is_none());

        let residual = residual_map(&data.view(), &model.view());
        assert!(residual.iter().all(|&r| r == 1.0));
    }
}
