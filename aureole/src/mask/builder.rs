//! Mask Builder.
//!
//! A mask is built in three boolean layers over the fitting region and then
//! collapsed into labels:
//!
//! 1. contamination apertures of every non-target star brighter than the mask
//!    limit (circles from the aperture law, ellipses for extended sources)
//! 2. bleed strips of every saturated point source, each skipping the keep-out
//!    core of its own star when that star is a fitting target
//! 3. the keep-out cores of all fitting targets
//!
//! Field-edge pixels win over strips, strips win over contamination, and
//! contamination only counts outside every keep-out core. The result is a pure
//! function of its inputs.

use super::aperture::Aperture;
use super::region::Region;
use super::{Mask, MaskLabel};
use crate::catalog::{Star, StarCatalog};
use crate::config::MaskConfig;
use log::info;
use ndarray::{Array2, Zip};

/// Builds usability masks for fitting regions
#[derive(Debug, Clone)]
pub struct MaskBuilder<'a> {
    config: &'a MaskConfig,
    saturation_mag: f64,
    mask_mag_limit: f64,
}

impl<'a> MaskBuilder<'a> {
    /// # Arguments
    /// * `config` - Aperture, strip and border settings
    /// * `saturation_mag` - Stars brighter than this get a bleed strip
    /// * `mask_mag_limit` - Non-target stars brighter than this are contamination
    pub fn new(config: &'a MaskConfig, saturation_mag: f64, mask_mag_limit: f64) -> Self {
        Self {
            config,
            saturation_mag,
            mask_mag_limit,
        }
    }

    /// Contamination aperture for a star, if it is bright enough to matter
    pub fn contamination_aperture(&self, star: &Star) -> Option<Aperture> {
        if star.is_fitting_target() || !(star.mag < self.mask_mag_limit) {
            return None;
        }
        if star.is_extended() {
            let scale = self.config.extended_scale * self.config.padding_factor;
            return Some(Aperture::Ellipse {
                x: star.x,
                y: star.y,
                a: (star.a * scale).max(1.0),
                b: (star.b * scale).max(1.0),
                theta: star.theta,
            });
        }
        Some(Aperture::Circle {
            x: star.x,
            y: star.y,
            radius: self.config.aperture_law.radius(star.mag) * self.config.padding_factor,
        })
    }

    /// Bleed strip for a saturated point source
    pub fn strip_aperture(&self, star: &Star) -> Option<Aperture> {
        if star.is_extended() || !(star.mag < self.saturation_mag) {
            return None;
        }
        let (length, width) = self.config.strip.size(star.mag, self.saturation_mag);
        Some(Aperture::Strip {
            x: star.x,
            y: star.y,
            half_length: 0.5 * length * self.config.padding_factor,
            half_width: 0.5 * width * self.config.padding_factor,
            axis: self.config.strip.axis,
        })
    }

    fn keepout(&self, star: &Star) -> Option<Aperture> {
        star.is_fitting_target().then_some(Aperture::Circle {
            x: star.x,
            y: star.y,
            radius: self.config.core_keepout,
        })
    }

    /// Build the mask of `region` inside an image of shape `image_shape`.
    ///
    /// # Arguments
    /// * `region` - Fitting region (image coordinates)
    /// * `image_shape` - `(rows, cols)` of the full image, for field-edge padding
    /// * `catalog` - Prepared stars, including those outside the region
    pub fn build(&self, region: &Region, image_shape: (usize, usize), catalog: &StarCatalog) -> Mask {
        let shape = region.shape();
        let mut contamination = Array2::from_elem(shape, false);
        let mut strips = Array2::from_elem(shape, false);
        let mut keepout = Array2::from_elem(shape, false);

        for star in catalog.stars() {
            if let Some(aperture) = self.contamination_aperture(star) {
                stamp(&mut contamination, region, &aperture, None);
            }
            if let Some(aperture) = self.strip_aperture(star) {
                let own_core = self.keepout(star);
                stamp(&mut strips, region, &aperture, own_core.as_ref());
            }
            if let Some(aperture) = self.keepout(star) {
                stamp(&mut keepout, region, &aperture, None);
            }
        }

        let edge = self.config.field_edge;
        let mut labels = Array2::from_elem(shape, MaskLabel::Usable);
        Zip::indexed(&mut labels)
            .and(&contamination)
            .and(&strips)
            .and(&keepout)
            .for_each(|(row, col), label, &contam, &strip, &core| {
                let image_row = region.min_row + row;
                let image_col = region.min_col + col;
                let at_edge = image_row < edge
                    || image_col < edge
                    || image_row + edge >= image_shape.0
                    || image_col + edge >= image_shape.1;
                *label = if at_edge {
                    MaskLabel::FieldEdge
                } else if strip {
                    MaskLabel::SaturatedStrip
                } else if contam && !core {
                    MaskLabel::Contamination
                } else {
                    MaskLabel::Usable
                };
            });

        let mask = Mask::new(region.clone(), labels);
        info!(
            "Mask for region {}: {} of {} pixels usable ({} contamination, {} strip, {} edge)",
            region.name,
            mask.usable_count(),
            region.area(),
            mask.count(MaskLabel::Contamination),
            mask.count(MaskLabel::SaturatedStrip),
            mask.count(MaskLabel::FieldEdge)
        );
        mask
    }
}

/// Set every region pixel whose centre falls inside `aperture`, skipping
/// pixels inside `except`.
fn stamp(layer: &mut Array2<bool>, region: &Region, aperture: &Aperture, except: Option<&Aperture>) {
    let (x_min, x_max, y_min, y_max) = aperture.bounds();
    let col_lo = (x_min.floor().max(region.min_col as f64)) as usize;
    let col_hi = x_max.ceil().min(region.max_col as f64);
    let row_lo = (y_min.floor().max(region.min_row as f64)) as usize;
    let row_hi = y_max.ceil().min(region.max_row as f64);
    if col_hi < col_lo as f64 || row_hi < row_lo as f64 {
        return;
    }
    let (col_hi, row_hi) = (col_hi as usize, row_hi as usize);

    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let (px, py) = (col as f64, row as f64);
            if aperture.contains(px, py) && !except.is_some_and(|e| e.contains(px, py)) {
                layer[[row - region.min_row, col - region.min_col]] = true;
            }
        }
    }
}
