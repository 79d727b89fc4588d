//! Star records and brightness tiers.

use serde::{Deserialize, Serialize};

/// One object from the external detection catalog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: u64,
    /// Centroid in image pixel coordinates
    pub x: f64,
    pub y: f64,
    /// Instrumental flux
    pub flux: f64,
    /// Semi-major and semi-minor axes of the detection footprint (pixels)
    pub a: f64,
    pub b: f64,
    /// Orientation of the major axis in radians
    pub theta: f64,
    /// Star/galaxy classifier score, 1.0 for a perfect point source
    pub class_star: f64,
}

impl DetectionRecord {
    /// Footprint ellipticity `1 - b/a`
    pub fn ellipticity(&self) -> f64 {
        if self.a > 0.0 {
            1.0 - self.b / self.a
        } else {
            0.0
        }
    }
}

/// Reference-catalog magnitude for a detection, if a match was found
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossMatchRecord {
    pub id: u64,
    pub reference_mag: Option<f64>,
}

/// What to do with a detection that has no reference-catalog match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CrossMatchPolicy {
    /// Fall back to the instrumental magnitude through the zero point
    #[default]
    Optional,
    /// Exclude unmatched stars from fitting
    Required,
}

/// Magnitude thresholds that define the brightness tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub bright_mag: f64,
    pub faint_mag: f64,
}

/// Brightness class controlling how a star is fitted and masked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrightnessTier {
    /// Brighter than the bright threshold
    Bright,
    /// Between the bright and faint thresholds
    Medium,
    /// Fainter than the faint threshold
    Faint,
}

impl BrightnessTier {
    pub fn classify(mag: f64, thresholds: &TierThresholds) -> Self {
        if mag < thresholds.bright_mag {
            BrightnessTier::Bright
        } else if mag < thresholds.faint_mag {
            BrightnessTier::Medium
        } else {
            BrightnessTier::Faint
        }
    }

    /// Whether stars of this tier enter the model as fitting targets
    pub fn is_fitted(&self) -> bool {
        matches!(self, BrightnessTier::Bright | BrightnessTier::Medium)
    }

    /// Whether the core of stars in this tier is rendered on a sub-pixel grid
    pub fn oversample_core(&self) -> bool {
        matches!(self, BrightnessTier::Bright)
    }
}

/// Why a detected star is kept out of the fitting set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exclusion {
    /// Classified as an extended (non-stellar) source
    Extended,
    /// No reference match under the `Required` cross-match policy
    Unmatched,
    /// Too far outside the fitting region
    OutsideRegion,
}

/// A prepared catalog star
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Star {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    /// Instrumental flux as measured by the detector backend
    pub flux: f64,
    /// Calibrated magnitude (reference or zero-point fallback)
    pub mag: f64,
    pub class_star: f64,
    /// Footprint shape, used for extended-source apertures
    pub a: f64,
    pub b: f64,
    pub theta: f64,
    pub tier: BrightnessTier,
    pub matched: bool,
    pub exclusion: Option<Exclusion>,
}

impl Star {
    /// Fitted stars are modelled and keep their core usable
    pub fn is_fitting_target(&self) -> bool {
        self.exclusion.is_none() && self.tier.is_fitted()
    }

    pub fn is_extended(&self) -> bool {
        self.exclusion == Some(Exclusion::Extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_classification() {
        let thresholds = TierThresholds {
            bright_mag: 12.0,
            faint_mag: 14.0,
        };
        assert_eq!(BrightnessTier::classify(10.5, &thresholds), BrightnessTier::Bright);
        assert_eq!(BrightnessTier::classify(12.0, &thresholds), BrightnessTier::Medium);
        assert_eq!(BrightnessTier::classify(13.9, &thresholds), BrightnessTier::Medium);
        assert_eq!(BrightnessTier::classify(14.0, &thresholds), BrightnessTier::Faint);
    }

    #[test]
    fn test_tier_behaviour() {
        assert!(BrightnessTier::Bright.is_fitted());
        assert!(BrightnessTier::Medium.is_fitted());
        assert!(!BrightnessTier::Faint.is_fitted());
        assert!(BrightnessTier::Bright.oversample_core());
        assert!(!BrightnessTier::Medium.oversample_core());
    }

    #[test]
    fn test_detection_ellipticity() {
        let det = DetectionRecord {
            id: 1,
            x: 0.0,
            y: 0.0,
            flux: 1.0,
            a: 4.0,
            b: 1.0,
            theta: 0.0,
            class_star: 0.9,
        };
        assert_eq!(det.ellipticity(), 0.75);
    }
}
