//! Exclusion aperture shapes and the magnitude-to-radius law.
//!
//! The aperture radius follows an empirical polynomial in magnitude for
//! `log10 R`, clamped to `[r_min, r_max]`. [`ApertureLaw::fit`] derives the
//! polynomial from measured footprint radii with iterative outlier clipping.

use crate::stats::solve_least_squares;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Number of clip-and-refit rounds in [`ApertureLaw::fit`]
const CLIP_ROUNDS: usize = 3;

/// Points deviating by more than this multiple of the mean deviation are clipped
const CLIP_MULTIPLE: f64 = 3.0;

/// Empirical magnitude to aperture-radius relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApertureLaw {
    /// Polynomial coefficients for `log10 R`, lowest power first
    pub coefficients: Vec<f64>,
    /// Smallest aperture radius in pixels
    pub r_min: f64,
    /// Largest aperture radius in pixels
    pub r_max: f64,
}

impl Default for ApertureLaw {
    fn default() -> Self {
        Self {
            coefficients: vec![3.0, -0.15],
            r_min: 2.0,
            r_max: 100.0,
        }
    }
}

fn polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

impl ApertureLaw {
    pub fn validate(&self) -> Result<(), String> {
        if self.coefficients.is_empty() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("aperture law needs finite polynomial coefficients".to_string());
        }
        if !(self.r_min > 0.0) || self.r_min > self.r_max {
            return Err(format!(
                "aperture radius bounds [{}, {}] are invalid",
                self.r_min, self.r_max
            ));
        }
        Ok(())
    }

    /// Aperture radius in pixels for a star of magnitude `mag`
    pub fn radius(&self, mag: f64) -> f64 {
        10f64
            .powf(polynomial(&self.coefficients, mag))
            .clamp(self.r_min, self.r_max)
    }

    /// Fit the law to measured footprint radii.
    ///
    /// # Arguments
    /// * `mags` - Calibrated magnitudes
    /// * `radii` - Measured aperture radii in pixels (non-positive entries are ignored)
    /// * `degree` - Polynomial degree for `log10 R`
    /// * `r_min`, `r_max` - Clamp applied when evaluating the law
    ///
    /// # Returns
    /// The fitted law, or `None` with too few valid points for the degree.
    pub fn fit(mags: &[f64], radii: &[f64], degree: usize, r_min: f64, r_max: f64) -> Option<Self> {
        let points: Vec<(f64, f64)> = mags
            .iter()
            .zip(radii)
            .filter(|(m, r)| m.is_finite() && **r > 0.0)
            .map(|(&m, &r)| (m, r.log10()))
            .collect();
        let n_coef = degree + 1;
        if points.len() <= n_coef {
            return None;
        }

        let mut keep = vec![true; points.len()];
        let mut coefficients = Vec::new();
        for round in 0..CLIP_ROUNDS {
            let used: Vec<(f64, f64)> = points
                .iter()
                .zip(&keep)
                .filter(|(_, &k)| k)
                .map(|(&p, _)| p)
                .collect();
            if used.len() <= n_coef {
                break;
            }
            let design = DMatrix::from_fn(used.len(), n_coef, |i, j| used[i].0.powi(j as i32));
            let target = DVector::from_iterator(used.len(), used.iter().map(|p| p.1));
            coefficients = solve_least_squares(&design, &target)?.iter().copied().collect();

            let deviations: Vec<f64> = points
                .iter()
                .map(|(m, log_r)| (log_r - polynomial(&coefficients, *m)).abs())
                .collect();
            let mean_dev = deviations.iter().sum::<f64>() / deviations.len() as f64;
            keep = deviations.iter().map(|d| *d <= CLIP_MULTIPLE * mean_dev).collect();
            debug!(
                "Aperture law round {}: {} of {} points kept",
                round + 1,
                keep.iter().filter(|&&k| k).count(),
                points.len()
            );
        }
        if coefficients.is_empty() {
            return None;
        }

        info!("Fitted degree-{degree} aperture law: log10 R coefficients {coefficients:?}");
        Some(Self {
            coefficients,
            r_min,
            r_max,
        })
    }
}

/// Detector axis along which saturated stars bleed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BleedAxis {
    /// Bleed trails run along columns (constant x)
    #[default]
    Columns,
    /// Bleed trails run along rows (constant y)
    Rows,
}

/// Size of the saturation strip for a star at the saturation magnitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StripGeometry {
    pub axis: BleedAxis,
    /// Full strip width in pixels at the saturation magnitude
    pub base_width: f64,
    /// Full strip length in pixels at the saturation magnitude
    pub base_length: f64,
}

impl Default for StripGeometry {
    fn default() -> Self {
        Self {
            axis: BleedAxis::Columns,
            base_width: 8.0,
            base_length: 120.0,
        }
    }
}

impl StripGeometry {
    /// Full `(length, width)` of the strip for a star of magnitude `mag`.
    ///
    /// Length grows as flux^(1/2) and width as flux^(1/4) relative to a star
    /// at `saturation_mag`.
    pub fn size(&self, mag: f64, saturation_mag: f64) -> (f64, f64) {
        let excess = saturation_mag - mag;
        (
            self.base_length * 10f64.powf(0.2 * excess),
            self.base_width * 10f64.powf(0.1 * excess),
        )
    }
}

/// A single exclusion shape in image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aperture {
    Circle {
        x: f64,
        y: f64,
        radius: f64,
    },
    Ellipse {
        x: f64,
        y: f64,
        a: f64,
        b: f64,
        theta: f64,
    },
    Strip {
        x: f64,
        y: f64,
        half_length: f64,
        half_width: f64,
        axis: BleedAxis,
    },
}

impl Aperture {
    /// Whether the pixel centred on `(px, py)` falls inside the shape
    pub fn contains(&self, px: f64, py: f64) -> bool {
        match *self {
            Aperture::Circle { x, y, radius } => {
                let (dx, dy) = (px - x, py - y);
                dx * dx + dy * dy <= radius * radius
            }
            Aperture::Ellipse { x, y, a, b, theta } => {
                let (dx, dy) = (px - x, py - y);
                let (sin, cos) = theta.sin_cos();
                let u = (dx * cos + dy * sin) / a;
                let v = (-dx * sin + dy * cos) / b;
                u * u + v * v <= 1.0
            }
            Aperture::Strip {
                x,
                y,
                half_length,
                half_width,
                axis,
            } => {
                let (along, across) = match axis {
                    BleedAxis::Columns => ((py - y).abs(), (px - x).abs()),
                    BleedAxis::Rows => ((px - x).abs(), (py - y).abs()),
                };
                along <= half_length && across <= half_width
            }
        }
    }

    /// Bounding box `(x_min, x_max, y_min, y_max)` in image coordinates
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        match *self {
            Aperture::Circle { x, y, radius } => (x - radius, x + radius, y - radius, y + radius),
            Aperture::Ellipse { x, y, a, b, .. } => {
                let r = a.max(b);
                (x - r, x + r, y - r, y + r)
            }
            Aperture::Strip {
                x,
                y,
                half_length,
                half_width,
                axis,
            } => match axis {
                BleedAxis::Columns => (x - half_width, x + half_width, y - half_length, y + half_length),
                BleedAxis::Rows => (x - half_length, x + half_length, y - half_width, y + half_width),
            },
        }
    }
}
