//! Star catalog preparation: cross-matching, calibration and tiering.

pub mod prepare;
pub mod star;
pub mod zero_point;

pub use prepare::{prepare_catalog, StarCatalog};
pub use star::{
    BrightnessTier, CrossMatchPolicy, CrossMatchRecord, DetectionRecord, Exclusion, Star,
    TierThresholds,
};
pub use zero_point::{CalibrationStar, SpatialTerm, ZeroPointCalibration};
