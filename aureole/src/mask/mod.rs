//! Per-region pixel usability masks.
//!
//! Each fitting region gets exactly one [`Mask`], produced wholesale by
//! [`MaskBuilder::build`]. Masks are never edited in place; when the catalog
//! or configuration changes the mask is rebuilt.

pub mod aperture;
pub mod builder;
pub mod region;

pub use aperture::{Aperture, ApertureLaw, BleedAxis, StripGeometry};
pub use builder::MaskBuilder;
pub use region::Region;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Categorical label of a single pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskLabel {
    Usable,
    SaturatedStrip,
    Contamination,
    FieldEdge,
}

/// Pixel labels over one fitting region
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    region: Region,
    labels: Array2<MaskLabel>,
}

impl Mask {
    pub(crate) fn new(region: Region, labels: Array2<MaskLabel>) -> Self {
        Self { region, labels }
    }

    /// A mask with every pixel of `region` usable
    pub fn all_usable(region: Region) -> Self {
        let labels = Array2::from_elem(region.shape(), MaskLabel::Usable);
        Self { region, labels }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Labels indexed by `(row, col)` relative to the region origin
    pub fn labels(&self) -> &Array2<MaskLabel> {
        &self.labels
    }

    pub fn is_usable(&self, row: usize, col: usize) -> bool {
        self.labels
            .get((row, col))
            .is_some_and(|label| *label == MaskLabel::Usable)
    }

    /// Boolean usability map with the region's shape
    pub fn usable(&self) -> Array2<bool> {
        self.labels.mapv(|label| label == MaskLabel::Usable)
    }

    pub fn usable_count(&self) -> usize {
        self.count(MaskLabel::Usable)
    }

    pub fn count(&self, label: MaskLabel) -> usize {
        self.labels.iter().filter(|l| **l == label).count()
    }
}
