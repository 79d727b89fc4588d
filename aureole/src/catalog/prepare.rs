//! Star Catalog Preparer.
//!
//! Joins the detection catalog with reference cross-matches, assigns each
//! detection a calibrated magnitude and brightness tier, and flags the stars
//! that must not be fitted. Every detection with a usable magnitude is kept in
//! the output so the mask builder can still treat it as contamination.

use super::star::{
    BrightnessTier, CrossMatchPolicy, CrossMatchRecord, DetectionRecord, Exclusion, Star,
};
use super::zero_point::ZeroPointCalibration;
use crate::config::CatalogConfig;
use crate::error::FitError;
use crate::mask::Region;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Prepared stars, ordered brightest first
#[derive(Debug, Clone, PartialEq)]
pub struct StarCatalog {
    stars: Vec<Star>,
}

impl StarCatalog {
    /// Wrap an already prepared star list, restoring the brightest-first order
    pub fn from_stars(mut stars: Vec<Star>) -> Self {
        sort_brightest_first(&mut stars);
        Self { stars }
    }

    pub fn stars(&self) -> &[Star] {
        &self.stars
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Stars that enter the model as fitting targets
    pub fn fitting_targets(&self) -> impl Iterator<Item = &Star> {
        self.stars.iter().filter(|s| s.is_fitting_target())
    }

    pub fn count_tier(&self, tier: BrightnessTier) -> usize {
        self.stars.iter().filter(|s| s.tier == tier).count()
    }

    /// Restrict fitting to stars near `region`.
    ///
    /// Stars farther than `outside_gap` pixels from the region are flagged
    /// [`Exclusion::OutsideRegion`] unless already excluded for another reason.
    pub fn for_region(&self, region: &Region, outside_gap: f64) -> Self {
        let stars = self
            .stars
            .iter()
            .map(|star| {
                let mut star = *star;
                if star.exclusion.is_none() && region.distance_to(star.x, star.y) > outside_gap {
                    star.exclusion = Some(Exclusion::OutsideRegion);
                }
                star
            })
            .collect();
        Self { stars }
    }
}

fn sort_brightest_first(stars: &mut [Star]) {
    stars.sort_by(|a, b| a.mag.total_cmp(&b.mag).then(a.id.cmp(&b.id)));
}

/// Build the prepared star list from the external catalogs.
///
/// # Arguments
/// * `detections` - Detection catalog records
/// * `cross_matches` - Reference magnitudes keyed by detection id
/// * `calibration` - Zero point used for the instrumental-magnitude fallback
/// * `config` - Tier thresholds, cross-match policy and classification cuts
///
/// # Returns
/// Stars sorted brightest first, or [`FitError::CatalogMismatch`] when the two
/// record counts differ by more than the configured tolerance.
pub fn prepare_catalog(
    detections: &[DetectionRecord],
    cross_matches: &[CrossMatchRecord],
    calibration: &ZeroPointCalibration,
    config: &CatalogConfig,
) -> Result<StarCatalog, FitError> {
    if detections.len().abs_diff(cross_matches.len()) > config.mismatch_tolerance {
        return Err(FitError::CatalogMismatch {
            detections: detections.len(),
            cross_matches: cross_matches.len(),
            tolerance: config.mismatch_tolerance,
        });
    }

    let matches: HashMap<u64, Option<f64>> = cross_matches
        .iter()
        .map(|m| (m.id, m.reference_mag.filter(|mag| mag.is_finite())))
        .collect();
    let thresholds = config.thresholds();

    let mut stars = Vec::with_capacity(detections.len());
    let mut unmatched = 0usize;
    for det in detections {
        let reference = matches.get(&det.id).copied().flatten();
        let mag = match reference {
            Some(mag) => mag,
            None => match calibration.magnitude(det.flux, det.x, det.y) {
                Some(mag) => mag,
                None => {
                    debug!("Detection {} has no match and no positive flux, dropped", det.id);
                    continue;
                }
            },
        };
        if reference.is_none() {
            unmatched += 1;
        }

        let bright_enough_to_mask = mag < config.mask_mag_limit;
        let extended = bright_enough_to_mask
            && (det.class_star < config.extended_class_star
                || det.ellipticity() > config.extended_ellipticity);

        let exclusion = if extended {
            Some(Exclusion::Extended)
        } else if reference.is_none() && config.cross_match == CrossMatchPolicy::Required {
            Some(Exclusion::Unmatched)
        } else {
            None
        };

        stars.push(Star {
            id: det.id,
            x: det.x,
            y: det.y,
            flux: det.flux,
            mag,
            class_star: det.class_star,
            a: det.a,
            b: det.b,
            theta: det.theta,
            tier: BrightnessTier::classify(mag, &thresholds),
            matched: reference.is_some(),
            exclusion,
        });
    }

    if unmatched > 0 {
        match config.cross_match {
            CrossMatchPolicy::Optional => warn!(
                "{unmatched} detections lack a reference match, using instrumental magnitudes"
            ),
            CrossMatchPolicy::Required => {
                warn!("{unmatched} detections lack a reference match and are excluded from fitting")
            }
        }
    }

    let catalog = StarCatalog::from_stars(stars);
    info!(
        "Prepared {} stars: {} bright, {} medium, {} faint, {} fitting targets",
        catalog.len(),
        catalog.count_tier(BrightnessTier::Bright),
        catalog.count_tier(BrightnessTier::Medium),
        catalog.count_tier(BrightnessTier::Faint),
        catalog.fitting_targets().count()
    );
    Ok(catalog)
}
