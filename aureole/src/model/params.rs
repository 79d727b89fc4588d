//! Parameter vector layout and prior transform for the composite PSF model.
//!
//! The sampler works in the unit hypercube. [`ParamLayout`] maps a cube point
//! onto physical parameters using one independent [`Prior`] per parameter;
//! parameters with a [`Prior::Fixed`] value do not occupy a cube dimension.
//!
//! Break radii and slopes are held in a fixed-capacity [`BreakSet`] with an
//! explicit count, so the prior transform and the likelihood always agree on
//! the number of aureole segments.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of aureole break radii supported by the model
pub const MAX_BREAKS: usize = 3;

/// Reasons a candidate parameter vector is infeasible.
///
/// These are normal sampling events: the likelihood engine scores them with
/// `-inf` and the sampler simply draws again.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriorViolation {
    #[error("break radius {index} ({inner:.3}) is not below the next break ({outer:.3})")]
    NonAscendingBreaks { index: usize, inner: f64, outer: f64 },

    #[error("cutoff radius {cutoff:.3} does not lie beyond the last break radius {last_break:.3}")]
    CutoffInsideBreaks { cutoff: f64, last_break: f64 },

    #[error("{name} = {value} outside [{min}, {max}]")]
    OutOfBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid profile shape: {0}")]
    InvalidShape(String),
}

/// Independent prior on a single model parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    /// Parameter held at a constant value (not sampled)
    Fixed(f64),
    /// Uniform between `min` and `max`
    Uniform { min: f64, max: f64 },
    /// Uniform in `log10` between `min` and `max` (both positive)
    LogUniform { min: f64, max: f64 },
}

impl Prior {
    /// Whether the parameter occupies a dimension of the sampling cube
    pub fn is_free(&self) -> bool {
        !matches!(self, Prior::Fixed(_))
    }

    /// Inclusive bounds of the parameter
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Prior::Fixed(v) => (v, v),
            Prior::Uniform { min, max } | Prior::LogUniform { min, max } => (min, max),
        }
    }

    /// Map a unit-interval coordinate onto the parameter range
    pub fn transform(&self, u: f64) -> f64 {
        match *self {
            Prior::Fixed(v) => v,
            Prior::Uniform { min, max } => min + u * (max - min),
            Prior::LogUniform { min, max } => {
                let (lo, hi) = (min.log10(), max.log10());
                10f64.powf(lo + u * (hi - lo))
            }
        }
    }

    /// Inverse of [`Prior::transform`]; `None` for fixed parameters or
    /// values outside the range.
    pub fn to_unit(&self, value: f64) -> Option<f64> {
        let (min, max) = self.bounds();
        if !(min..=max).contains(&value) {
            return None;
        }
        match *self {
            Prior::Fixed(_) => None,
            Prior::Uniform { .. } => Some((value - min) / (max - min)),
            Prior::LogUniform { .. } => {
                Some((value.log10() - min.log10()) / (max.log10() - min.log10()))
            }
        }
    }

    /// Check the prior is well formed
    pub fn validate(&self, name: &str) -> Result<(), String> {
        match *self {
            Prior::Fixed(v) if !v.is_finite() => Err(format!("{name}: fixed value is not finite")),
            Prior::Fixed(_) => Ok(()),
            Prior::Uniform { min, max } => {
                if !(min.is_finite() && max.is_finite()) || min >= max {
                    Err(format!("{name}: uniform bounds [{min}, {max}] are not ascending"))
                } else {
                    Ok(())
                }
            }
            Prior::LogUniform { min, max } => {
                if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min >= max {
                    Err(format!(
                        "{name}: log-uniform bounds [{min}, {max}] must be positive and ascending"
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Identity of each slot in the full parameter vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Moffat concentration index (beta)
    Concentration,
    /// Moffat characteristic width (alpha) in pixels
    Width,
    /// Power-law index of aureole segment `i`
    Slope(usize),
    /// Inner radius of aureole segment `i` in pixels
    BreakRadius(usize),
    /// Radius beyond which the aureole is held flat
    Cutoff,
    /// Fraction of the total flux carried by the aureole
    AureoleFraction,
    /// Ellipticity `1 - b/a`
    Ellipticity,
    /// Position angle of the major axis in radians
    PositionAngle,
    /// Uniform sky background level
    Background,
    /// Per-pixel Gaussian noise level
    NoiseSigma,
}

impl ParamKind {
    pub fn label(&self) -> String {
        match self {
            ParamKind::Concentration => "beta".to_string(),
            ParamKind::Width => "alpha".to_string(),
            ParamKind::Slope(i) => format!("n{i}"),
            ParamKind::BreakRadius(i) => format!("r{i}"),
            ParamKind::Cutoff => "r_cut".to_string(),
            ParamKind::AureoleFraction => "frac".to_string(),
            ParamKind::Ellipticity => "ellip".to_string(),
            ParamKind::PositionAngle => "pa".to_string(),
            ParamKind::Background => "mu".to_string(),
            ParamKind::NoiseSigma => "sigma".to_string(),
        }
    }
}

/// Prior configuration for every model parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSet {
    pub concentration: Prior,
    pub width: Prior,
    /// One prior per aureole segment; length is the break count
    pub slopes: Vec<Prior>,
    /// One prior per break radius; must match `slopes` in length
    pub break_radii: Vec<Prior>,
    pub cutoff: Prior,
    pub aureole_fraction: Prior,
    pub ellipticity: Prior,
    pub position_angle: Prior,
    pub background: Prior,
    pub noise_sigma: Prior,
}

impl Default for PriorSet {
    fn default() -> Self {
        Self {
            concentration: Prior::Uniform { min: 1.5, max: 8.0 },
            width: Prior::LogUniform { min: 1.0, max: 20.0 },
            slopes: vec![Prior::Uniform { min: 1.5, max: 4.0 }],
            break_radii: vec![Prior::LogUniform { min: 10.0, max: 100.0 }],
            cutoff: Prior::Fixed(300.0),
            aureole_fraction: Prior::LogUniform { min: 0.01, max: 0.5 },
            ellipticity: Prior::Fixed(0.0),
            position_angle: Prior::Fixed(0.0),
            background: Prior::Uniform { min: -5.0, max: 5.0 },
            noise_sigma: Prior::Fixed(1.0),
        }
    }
}

impl PriorSet {
    /// Number of aureole break radii described by this prior set
    pub fn n_breaks(&self) -> usize {
        self.slopes.len()
    }

    /// Validate counts and bounds
    pub fn validate(&self) -> Result<(), String> {
        let n = self.slopes.len();
        if n == 0 || n > MAX_BREAKS {
            return Err(format!(
                "break count {n} outside supported range 1..={MAX_BREAKS}"
            ));
        }
        if self.break_radii.len() != n {
            return Err(format!(
                "{} break-radius priors for {n} slope priors",
                self.break_radii.len()
            ));
        }
        self.concentration.validate("concentration")?;
        self.width.validate("width")?;
        for (i, prior) in self.slopes.iter().enumerate() {
            prior.validate(&format!("slope {i}"))?;
        }
        for (i, prior) in self.break_radii.iter().enumerate() {
            prior.validate(&format!("break radius {i}"))?;
        }
        self.cutoff.validate("cutoff")?;
        self.aureole_fraction.validate("aureole fraction")?;
        self.ellipticity.validate("ellipticity")?;
        self.position_angle.validate("position angle")?;
        self.background.validate("background")?;
        self.noise_sigma.validate("noise sigma")?;

        if self.concentration.bounds().0 <= 1.0 {
            return Err("concentration must be > 1 for a finite Moffat flux".to_string());
        }
        let (frac_lo, frac_hi) = self.aureole_fraction.bounds();
        if frac_lo < 0.0 || frac_hi > 1.0 {
            return Err("aureole fraction must lie within [0, 1]".to_string());
        }
        let (e_lo, e_hi) = self.ellipticity.bounds();
        if e_lo < 0.0 || e_hi >= 1.0 {
            return Err("ellipticity must lie within [0, 1)".to_string());
        }
        if self.noise_sigma.bounds().0 <= 0.0 {
            return Err("noise sigma must be positive".to_string());
        }
        Ok(())
    }
}

/// Break radii and slopes of the aureole, with an explicit segment count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakSet {
    count: usize,
    radii: [f64; MAX_BREAKS],
    slopes: [f64; MAX_BREAKS],
}

impl BreakSet {
    /// Build a break set, rejecting non-ascending radii or non-positive slopes
    pub fn new(radii: &[f64], slopes: &[f64]) -> Result<Self, PriorViolation> {
        if radii.is_empty() || radii.len() > MAX_BREAKS || radii.len() != slopes.len() {
            return Err(PriorViolation::InvalidShape(format!(
                "{} break radii with {} slopes",
                radii.len(),
                slopes.len()
            )));
        }
        for (i, pair) in radii.windows(2).enumerate() {
            if pair[0].partial_cmp(&pair[1]) != Some(std::cmp::Ordering::Less) {
                return Err(PriorViolation::NonAscendingBreaks {
                    index: i,
                    inner: pair[0],
                    outer: pair[1],
                });
            }
        }
        if !(radii[0] > 0.0) {
            return Err(PriorViolation::InvalidShape(format!(
                "first break radius {} must be positive",
                radii[0]
            )));
        }
        if let Some(bad) = slopes.iter().find(|s| !(**s > 0.0)) {
            return Err(PriorViolation::InvalidShape(format!(
                "aureole slope {bad} must be positive"
            )));
        }

        let mut set = Self {
            count: radii.len(),
            radii: [0.0; MAX_BREAKS],
            slopes: [0.0; MAX_BREAKS],
        };
        set.radii[..radii.len()].copy_from_slice(radii);
        set.slopes[..slopes.len()].copy_from_slice(slopes);
        Ok(set)
    }

    /// Number of aureole segments
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii[..self.count]
    }

    pub fn slopes(&self) -> &[f64] {
        &self.slopes[..self.count]
    }

    /// The core/aureole transition radius (first break)
    pub fn transition_radius(&self) -> f64 {
        self.radii[0]
    }
}

/// Physical parameters of one candidate composite PSF model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsfParams {
    pub concentration: f64,
    pub width: f64,
    pub breaks: BreakSet,
    pub cutoff: f64,
    pub aureole_fraction: f64,
    pub ellipticity: f64,
    pub position_angle: f64,
    pub background: f64,
    pub noise_sigma: f64,
}

/// Ordered mapping between the unit hypercube, the full parameter vector, and
/// [`PsfParams`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamLayout {
    entries: Vec<(ParamKind, Prior)>,
    free: Vec<usize>,
    n_breaks: usize,
}

impl ParamLayout {
    /// Build the layout from a validated prior set.
    ///
    /// When `elliptical` is false the ellipticity and position angle are
    /// pinned to zero regardless of their configured priors.
    pub fn new(priors: &PriorSet, elliptical: bool) -> Result<Self, String> {
        priors.validate()?;
        let n_breaks = priors.n_breaks();

        let mut entries = vec![
            (ParamKind::Concentration, priors.concentration),
            (ParamKind::Width, priors.width),
        ];
        for (i, prior) in priors.slopes.iter().enumerate() {
            entries.push((ParamKind::Slope(i), *prior));
        }
        for (i, prior) in priors.break_radii.iter().enumerate() {
            entries.push((ParamKind::BreakRadius(i), *prior));
        }
        entries.push((ParamKind::Cutoff, priors.cutoff));
        entries.push((ParamKind::AureoleFraction, priors.aureole_fraction));
        if elliptical {
            entries.push((ParamKind::Ellipticity, priors.ellipticity));
            entries.push((ParamKind::PositionAngle, priors.position_angle));
        } else {
            entries.push((ParamKind::Ellipticity, Prior::Fixed(0.0)));
            entries.push((ParamKind::PositionAngle, Prior::Fixed(0.0)));
        }
        entries.push((ParamKind::Background, priors.background));
        entries.push((ParamKind::NoiseSigma, priors.noise_sigma));

        let free = entries
            .iter()
            .enumerate()
            .filter(|(_, (_, prior))| prior.is_free())
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            entries,
            free,
            n_breaks,
        })
    }

    /// Number of sampled (free) dimensions
    pub fn ndim(&self) -> usize {
        self.free.len()
    }

    /// Length of the full parameter vector, fixed entries included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn n_breaks(&self) -> usize {
        self.n_breaks
    }

    /// Labels for every entry of the full parameter vector
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(kind, _)| kind.label()).collect()
    }

    /// Labels for the free entries only, in cube order
    pub fn free_labels(&self) -> Vec<String> {
        self.free.iter().map(|&i| self.entries[i].0.label()).collect()
    }

    /// Position of a parameter in the full vector
    pub fn index_of(&self, kind: ParamKind) -> Option<usize> {
        self.entries.iter().position(|(k, _)| *k == kind)
    }

    pub fn prior(&self, kind: ParamKind) -> Option<Prior> {
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, p)| *p)
    }

    /// Map a unit-cube point to the full physical parameter vector.
    ///
    /// Fails with [`PriorViolation::OutOfBounds`] if a coordinate lies outside
    /// `[0, 1]`; ordering is not checked here.
    pub fn cube_to_values(&self, cube: &[f64]) -> Result<Vec<f64>, PriorViolation> {
        if cube.len() != self.free.len() {
            return Err(PriorViolation::InvalidShape(format!(
                "cube point has {} coordinates, layout has {} free parameters",
                cube.len(),
                self.free.len()
            )));
        }
        let mut values: Vec<f64> = self.entries.iter().map(|(_, p)| p.transform(0.0)).collect();
        for (&slot, &u) in self.free.iter().zip(cube) {
            if !(0.0..=1.0).contains(&u) {
                return Err(PriorViolation::OutOfBounds {
                    name: format!("cube[{}]", self.entries[slot].0.label()),
                    value: u,
                    min: 0.0,
                    max: 1.0,
                });
            }
            values[slot] = self.entries[slot].1.transform(u);
        }
        Ok(values)
    }

    /// Prior transform: unit-cube point to validated model parameters.
    ///
    /// Returns a [`PriorViolation`] for any candidate with non-ascending
    /// break radii or a cutoff inside the last break.
    pub fn transform(&self, cube: &[f64]) -> Result<PsfParams, PriorViolation> {
        let values = self.cube_to_values(cube)?;
        self.values_to_params(&values)
    }

    /// Interpret a full parameter vector, checking bounds and ordering
    pub fn values_to_params(&self, values: &[f64]) -> Result<PsfParams, PriorViolation> {
        if values.len() != self.entries.len() {
            return Err(PriorViolation::InvalidShape(format!(
                "parameter vector has {} entries, layout has {}",
                values.len(),
                self.entries.len()
            )));
        }
        for ((kind, prior), &value) in self.entries.iter().zip(values) {
            let (min, max) = prior.bounds();
            let tolerance = 1e-12 * max.abs().max(1.0);
            if !(value >= min - tolerance && value <= max + tolerance) {
                return Err(PriorViolation::OutOfBounds {
                    name: kind.label(),
                    value,
                    min,
                    max,
                });
            }
        }

        let mut radii = [0.0; MAX_BREAKS];
        let mut slopes = [0.0; MAX_BREAKS];
        let mut params = PsfParams {
            concentration: 0.0,
            width: 0.0,
            breaks: BreakSet {
                count: 0,
                radii,
                slopes,
            },
            cutoff: 0.0,
            aureole_fraction: 0.0,
            ellipticity: 0.0,
            position_angle: 0.0,
            background: 0.0,
            noise_sigma: 0.0,
        };
        for ((kind, _), &value) in self.entries.iter().zip(values) {
            match *kind {
                ParamKind::Concentration => params.concentration = value,
                ParamKind::Width => params.width = value,
                ParamKind::Slope(i) => slopes[i] = value,
                ParamKind::BreakRadius(i) => radii[i] = value,
                ParamKind::Cutoff => params.cutoff = value,
                ParamKind::AureoleFraction => params.aureole_fraction = value,
                ParamKind::Ellipticity => params.ellipticity = value,
                ParamKind::PositionAngle => params.position_angle = value,
                ParamKind::Background => params.background = value,
                ParamKind::NoiseSigma => params.noise_sigma = value,
            }
        }

        params.breaks = BreakSet::new(&radii[..self.n_breaks], &slopes[..self.n_breaks])?;
        let last_break = params.breaks.radii()[self.n_breaks - 1];
        if !(params.cutoff > last_break) {
            return Err(PriorViolation::CutoffInsideBreaks {
                cutoff: params.cutoff,
                last_break,
            });
        }
        Ok(params)
    }

    /// Flatten model parameters into the full vector order
    pub fn params_to_values(&self, params: &PsfParams) -> Vec<f64> {
        self.entries
            .iter()
            .map(|(kind, _)| match *kind {
                ParamKind::Concentration => params.concentration,
                ParamKind::Width => params.width,
                ParamKind::Slope(i) => params.breaks.slopes()[i],
                ParamKind::BreakRadius(i) => params.breaks.radii()[i],
                ParamKind::Cutoff => params.cutoff,
                ParamKind::AureoleFraction => params.aureole_fraction,
                ParamKind::Ellipticity => params.ellipticity,
                ParamKind::PositionAngle => params.position_angle,
                ParamKind::Background => params.background,
                ParamKind::NoiseSigma => params.noise_sigma,
            })
            .collect()
    }

    /// Cube coordinates of a parameter set; `None` if any free value lies
    /// outside its prior.
    pub fn params_to_cube(&self, params: &PsfParams) -> Option<Vec<f64>> {
        let values = self.params_to_values(params);
        self.free
            .iter()
            .map(|&slot| self.entries[slot].1.to_unit(values[slot]))
            .collect()
    }
}
