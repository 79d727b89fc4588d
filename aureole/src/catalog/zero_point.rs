//! Photometric zero-point calibration.
//!
//! Maps instrumental flux to calibrated magnitude through
//! `mag = zp(x, y) - 2.5 log10(flux)`, where `zp` is a scalar optionally
//! refined by a linear spatial gradient across the field.

use crate::stats::{sigma_clipped_median, solve_least_squares};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Linear variation of the zero point across the field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialTerm {
    /// Reference position the gradient is measured from
    pub x0: f64,
    pub y0: f64,
    /// Zero-point change per pixel along x
    pub gx: f64,
    /// Zero-point change per pixel along y
    pub gy: f64,
}

/// A reference-catalog match used to derive the zero point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationStar {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub reference_mag: f64,
}

/// Zero point with optional spatial term
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZeroPointCalibration {
    pub zero_point: f64,
    pub spatial: Option<SpatialTerm>,
}

impl ZeroPointCalibration {
    /// A constant zero point
    pub fn constant(zero_point: f64) -> Self {
        Self {
            zero_point,
            spatial: None,
        }
    }

    /// Derive the zero point from cross-matched stars.
    ///
    /// The scalar term is the 3-sigma clipped median of
    /// `reference_mag + 2.5 log10(flux)`. With `fit_spatial` and at least
    /// four surviving stars, a linear gradient is fit to the clipped set by
    /// least squares.
    ///
    /// # Returns
    /// `None` when no star has a positive flux and finite magnitude.
    pub fn from_cross_match(stars: &[CalibrationStar], fit_spatial: bool) -> Option<Self> {
        let offsets: Vec<f64> = stars
            .iter()
            .map(|s| {
                if s.flux > 0.0 && s.reference_mag.is_finite() {
                    s.reference_mag + 2.5 * s.flux.log10()
                } else {
                    f64::NAN
                }
            })
            .collect();
        let (zero_point, keep) = sigma_clipped_median(&offsets, 3.0, 10)?;
        let n_kept = keep.iter().filter(|&&k| k).count();
        info!(
            "Zero point {:.4} from {} of {} cross-matched stars",
            zero_point,
            n_kept,
            stars.len()
        );

        let spatial = if fit_spatial && n_kept >= 4 {
            Self::fit_gradient(stars, &offsets, &keep)
        } else {
            None
        };

        Some(Self {
            zero_point: spatial.map_or(zero_point, |(zp0, _)| zp0),
            spatial: spatial.map(|(_, term)| term),
        })
    }

    fn fit_gradient(
        stars: &[CalibrationStar],
        offsets: &[f64],
        keep: &[bool],
    ) -> Option<(f64, SpatialTerm)> {
        let used: Vec<(&CalibrationStar, f64)> = stars
            .iter()
            .zip(offsets)
            .zip(keep)
            .filter(|(_, &k)| k)
            .map(|((s, &o), _)| (s, o))
            .collect();
        let n = used.len() as f64;
        let x0 = used.iter().map(|(s, _)| s.x).sum::<f64>() / n;
        let y0 = used.iter().map(|(s, _)| s.y).sum::<f64>() / n;

        let design = DMatrix::from_fn(used.len(), 3, |i, j| match j {
            0 => 1.0,
            1 => used[i].0.x - x0,
            _ => used[i].0.y - y0,
        });
        let target = DVector::from_iterator(used.len(), used.iter().map(|(_, o)| *o));
        let solution = solve_least_squares(&design, &target)?;
        debug!(
            "Spatial zero-point gradient: gx={:.3e} gy={:.3e} mag/pix",
            solution[1], solution[2]
        );
        Some((
            solution[0],
            SpatialTerm {
                x0,
                y0,
                gx: solution[1],
                gy: solution[2],
            },
        ))
    }

    /// Zero point at image position `(x, y)`
    pub fn at(&self, x: f64, y: f64) -> f64 {
        match self.spatial {
            Some(term) => self.zero_point + term.gx * (x - term.x0) + term.gy * (y - term.y0),
            None => self.zero_point,
        }
    }

    /// Calibrated magnitude of an instrumental flux; `None` for non-positive flux
    pub fn magnitude(&self, flux: f64, x: f64, y: f64) -> Option<f64> {
        (flux > 0.0).then(|| self.at(x, y) - 2.5 * flux.log10())
    }

    /// Instrumental flux of a calibrated magnitude
    pub fn flux(&self, mag: f64, x: f64, y: f64) -> f64 {
        10f64.powf((mag - self.at(x, y)) / -2.5)
    }

    /// Convert pixel intensity to surface brightness in mag/arcsec².
    ///
    /// # Arguments
    /// * `intensity` - Pixel value
    /// * `background` - Sky level subtracted before conversion
    /// * `pixel_scale` - Arcseconds per pixel
    ///
    /// # Returns
    /// `None` where the intensity does not exceed the background.
    pub fn intensity_to_surface_brightness(
        &self,
        intensity: f64,
        background: f64,
        pixel_scale: f64,
    ) -> Option<f64> {
        let excess = intensity - background;
        let area_term = 2.5 * (pixel_scale * pixel_scale).log10();
        (excess > 0.0).then(|| -2.5 * excess.log10() + self.zero_point + area_term)
    }

    /// Inverse of [`ZeroPointCalibration::intensity_to_surface_brightness`]
    pub fn surface_brightness_to_intensity(
        &self,
        surface_brightness: f64,
        background: f64,
        pixel_scale: f64,
    ) -> f64 {
        let area_term = 2.5 * (pixel_scale * pixel_scale).log10();
        10f64.powf((surface_brightness - self.zero_point - area_term) / -2.5) + background
    }
}
