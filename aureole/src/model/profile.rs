//! Composite core + aureole brightness profile.
//!
//! The profile is the flux-weighted sum of two unit-flux components:
//!
//! - a Moffat core `M(r) = (β-1)/(π α²) (1 + r²/α²)^(-β)`
//! - a piecewise power-law aureole `A(r)/N_A`, normalised by its analytic
//!   flux `N_A` inside the cutoff radius
//!
//! so that `I(r) = F [(1 - f) M(r) + f A(r)/N_A]`.
//!
//! # Aureole segments
//!
//! With break radii `r_0 < r_1 < ... < r_{k-1}` and cutoff `r_c`, segment `j`
//! covers `[r_j, r_{j+1})` (taking `r_k = r_c`) and follows
//!
//! ```text
//! A(r) = V_j (1 + g_j (r - r_j) / n_j)^(-n_j)
//! ```
//!
//! where `V_j` and `g_j` are the value and negative logarithmic derivative of
//! the previous segment at `r_j`. Only the slopes and break radii are free;
//! amplitudes follow from continuity of the value and first derivative. With
//! `V_0 = 1` and `g_0 = n_0 / r_0` the first segment is exactly `(r/r_0)^(-n_0)`.
//! Inside `r_0` the aureole is the cored parabola `1 + (n_0/2)(1 - r²/r_0²)`,
//! and beyond `r_c` it is held flat at `A(r_c)`.

use super::params::{PriorViolation, PsfParams, MAX_BREAKS};
use std::f64::consts::PI;

/// Below this distance from unity an exponent is treated as `-1` when
/// integrating `u^p`.
const LOG_EXPONENT_TOLERANCE: f64 = 1e-9;

/// One C1-continuous aureole segment
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: f64,
    end: f64,
    slope: f64,
    value: f64,
    gradient: f64,
}

impl Segment {
    fn base(&self, r: f64) -> f64 {
        1.0 + self.gradient * (r - self.start) / self.slope
    }

    fn value_at(&self, r: f64) -> f64 {
        self.value * self.base(r).powf(-self.slope)
    }

    fn derivative_at(&self, r: f64) -> f64 {
        -self.value * self.gradient * self.base(r).powf(-self.slope - 1.0)
    }

    /// Flux of the segment over its radial span
    fn flux(&self) -> f64 {
        let scale = self.slope / self.gradient;
        let upper = self.base(self.end);
        2.0 * PI
            * self.value
            * scale
            * ((self.start - scale) * power_integral(upper, -self.slope)
                + scale * power_integral(upper, 1.0 - self.slope))
    }
}

/// `∫_1^upper u^p du`
fn power_integral(upper: f64, p: f64) -> f64 {
    if (p + 1.0).abs() < LOG_EXPONENT_TOLERANCE {
        upper.ln()
    } else {
        (upper.powf(p + 1.0) - 1.0) / (p + 1.0)
    }
}

/// Evaluable composite PSF built from one candidate parameter vector.
///
/// Instances are cheap to build and are created per likelihood evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeProfile {
    concentration: f64,
    width: f64,
    moffat_norm: f64,
    aureole_fraction: f64,
    transition: f64,
    inner_slope: f64,
    segments: [Segment; MAX_BREAKS],
    n_segments: usize,
    cutoff: f64,
    cutoff_value: f64,
    aureole_norm: f64,
    axis_ratio: f64,
    cos_pa: f64,
    sin_pa: f64,
}

impl CompositeProfile {
    /// Build the profile, deriving every segment amplitude from continuity.
    ///
    /// # Arguments
    /// * `params` - Candidate model parameters (already ordering-checked)
    ///
    /// # Returns
    /// The evaluable profile, or a [`PriorViolation`] if the shape
    /// parameters cannot produce a finite, normalisable profile.
    pub fn new(params: &PsfParams) -> Result<Self, PriorViolation> {
        if !(params.concentration > 1.0) {
            return Err(PriorViolation::InvalidShape(format!(
                "concentration {} must exceed 1",
                params.concentration
            )));
        }
        if !(params.width > 0.0) {
            return Err(PriorViolation::InvalidShape(format!(
                "core width {} must be positive",
                params.width
            )));
        }
        if !(0.0..=1.0).contains(&params.aureole_fraction) {
            return Err(PriorViolation::InvalidShape(format!(
                "aureole fraction {} outside [0, 1]",
                params.aureole_fraction
            )));
        }
        if !(0.0..1.0).contains(&params.ellipticity) {
            return Err(PriorViolation::InvalidShape(format!(
                "ellipticity {} outside [0, 1)",
                params.ellipticity
            )));
        }

        let radii = params.breaks.radii();
        let slopes = params.breaks.slopes();
        let n = radii.len();
        let last_break = radii[n - 1];
        if !(params.cutoff > last_break) {
            return Err(PriorViolation::CutoffInsideBreaks {
                cutoff: params.cutoff,
                last_break,
            });
        }

        let empty = Segment {
            start: 0.0,
            end: 0.0,
            slope: 1.0,
            value: 0.0,
            gradient: 0.0,
        };
        let mut segments = [empty; MAX_BREAKS];
        let mut value = 1.0;
        let mut gradient = slopes[0] / radii[0];
        for j in 0..n {
            let end = if j + 1 < n { radii[j + 1] } else { params.cutoff };
            let segment = Segment {
                start: radii[j],
                end,
                slope: slopes[j],
                value,
                gradient,
            };
            let base = segment.base(end);
            value = segment.value_at(end);
            gradient /= base;
            segments[j] = segment;
        }
        let cutoff_value = value;

        let r0 = radii[0];
        let inner_flux = PI * r0 * r0 * (1.0 + slopes[0] / 4.0);
        let aureole_norm = inner_flux + segments[..n].iter().map(Segment::flux).sum::<f64>();
        if !(aureole_norm.is_finite() && aureole_norm > 0.0) {
            return Err(PriorViolation::InvalidShape(format!(
                "aureole flux {aureole_norm} is not normalisable"
            )));
        }

        let width = params.width;
        Ok(Self {
            concentration: params.concentration,
            width,
            moffat_norm: (params.concentration - 1.0) / (PI * width * width),
            aureole_fraction: params.aureole_fraction,
            transition: r0,
            inner_slope: slopes[0],
            segments,
            n_segments: n,
            cutoff: params.cutoff,
            cutoff_value,
            aureole_norm,
            axis_ratio: 1.0 - params.ellipticity,
            cos_pa: params.position_angle.cos(),
            sin_pa: params.position_angle.sin(),
        })
    }

    /// Unit-flux Moffat core
    pub fn core(&self, r: f64) -> f64 {
        let x = r / self.width;
        self.moffat_norm * (1.0 + x * x).powf(-self.concentration)
    }

    pub fn core_derivative(&self, r: f64) -> f64 {
        let w2 = self.width * self.width;
        let x2 = r * r / w2;
        let falloff = (1.0 + x2).powf(-self.concentration - 1.0);
        -2.0 * self.moffat_norm * self.concentration * falloff * r / w2
    }

    fn segment_for(&self, r: f64) -> Option<&Segment> {
        self.segments[..self.n_segments]
            .iter()
            .rev()
            .find(|segment| r >= segment.start)
    }

    /// Unnormalised aureole shape with `A(r_0) = 1`
    pub fn aureole_shape(&self, r: f64) -> f64 {
        if r >= self.cutoff {
            return self.cutoff_value;
        }
        match self.segment_for(r) {
            Some(segment) => segment.value_at(r),
            None => {
                let t = r / self.transition;
                1.0 + 0.5 * self.inner_slope * (1.0 - t * t)
            }
        }
    }

    /// Radial derivative of [`CompositeProfile::aureole_shape`]
    pub fn aureole_shape_derivative(&self, r: f64) -> f64 {
        if r >= self.cutoff {
            return 0.0;
        }
        match self.segment_for(r) {
            Some(segment) => segment.derivative_at(r),
            None => -self.inner_slope * r / (self.transition * self.transition),
        }
    }

    /// Analytic flux of the aureole shape inside the cutoff radius
    pub fn aureole_norm(&self) -> f64 {
        self.aureole_norm
    }

    /// Circular profile per unit total flux
    pub fn radial(&self, r: f64) -> f64 {
        (1.0 - self.aureole_fraction) * self.core(r)
            + self.aureole_fraction * self.aureole_shape(r) / self.aureole_norm
    }

    /// Radial derivative of [`CompositeProfile::radial`]
    pub fn radial_derivative(&self, r: f64) -> f64 {
        (1.0 - self.aureole_fraction) * self.core_derivative(r)
            + self.aureole_fraction * self.aureole_shape_derivative(r) / self.aureole_norm
    }

    /// Elliptical radius of a pixel offset, in major-axis units
    pub fn elliptical_radius(&self, dx: f64, dy: f64) -> f64 {
        let u = dx * self.cos_pa + dy * self.sin_pa;
        let v = (-dx * self.sin_pa + dy * self.cos_pa) / self.axis_ratio;
        (u * u + v * v).sqrt()
    }

    /// Surface brightness per unit total flux at an offset from the centre
    pub fn evaluate(&self, dx: f64, dy: f64) -> f64 {
        self.radial(self.elliptical_radius(dx, dy)) / self.axis_ratio
    }

    /// Radius beyond which the aureole is flat
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Break radii in ascending order
    pub fn break_radii(&self) -> impl Iterator<Item = f64> + '_ {
        self.segments[..self.n_segments].iter().map(|s| s.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::params::BreakSet;
    use approx::assert_relative_eq;

    fn params(radii: &[f64], slopes: &[f64]) -> PsfParams {
        PsfParams {
            concentration: 3.5,
            width: 5.0,
            breaks: BreakSet::new(radii, slopes).unwrap(),
            cutoff: 300.0,
            aureole_fraction: 0.3,
            ellipticity: 0.0,
            position_angle: 0.0,
            background: 0.0,
            noise_sigma: 1.0,
        }
    }

    /// Simple trapezoid integral of `2πr f(r)` over `[0, r_max]`
    fn radial_flux(f: impl Fn(f64) -> f64, r_max: f64, steps: usize) -> f64 {
        let h = r_max / steps as f64;
        let integrand = |r: f64| 2.0 * PI * r * f(r);
        let interior: f64 = (1..steps).map(|i| integrand(i as f64 * h)).sum();
        h * (0.5 * integrand(0.0) + interior + 0.5 * integrand(r_max))
    }

    #[test]
    fn test_value_and_derivative_continuous_at_breaks() {
        let cases: [(&[f64], &[f64]); 3] = [
            (&[30.0], &[2.5]),
            (&[20.0, 80.0], &[1.8, 3.2]),
            (&[10.0, 45.0, 150.0], &[3.5, 1.6, 2.9]),
        ];
        let eps = 1e-7;
        for (radii, slopes) in cases {
            let profile = CompositeProfile::new(&params(radii, slopes)).unwrap();
            for r in profile.break_radii().collect::<Vec<_>>() {
                let below = profile.aureole_shape(r - eps);
                let above = profile.aureole_shape(r + eps);
                assert_relative_eq!(below, above, max_relative = 1e-6);

                let d_below = profile.aureole_shape_derivative(r - eps);
                let d_above = profile.aureole_shape_derivative(r + eps);
                assert_relative_eq!(d_below, d_above, max_relative = 1e-5);

                let total_below = profile.radial_derivative(r - eps);
                let total_above = profile.radial_derivative(r + eps);
                assert_relative_eq!(total_below, total_above, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let profile = CompositeProfile::new(&params(&[20.0, 80.0], &[1.8, 3.2])).unwrap();
        let h = 1e-5;
        for r in [3.0, 15.0, 25.0, 60.0, 120.0, 250.0] {
            let numeric = (profile.radial(r + h) - profile.radial(r - h)) / (2.0 * h);
            assert_relative_eq!(profile.radial_derivative(r), numeric, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_first_segment_is_pure_power_law() {
        let profile = CompositeProfile::new(&params(&[30.0], &[2.5])).unwrap();
        for r in [30.0, 60.0, 150.0, 299.0] {
            let expected = (r / 30.0_f64).powf(-2.5);
            assert_relative_eq!(profile.aureole_shape(r), expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_profile_flat_beyond_cutoff() {
        let profile = CompositeProfile::new(&params(&[30.0], &[2.5])).unwrap();
        let at_cutoff = profile.aureole_shape(300.0);
        assert_relative_eq!(profile.aureole_shape(450.0), at_cutoff);
        assert_eq!(profile.aureole_shape_derivative(1000.0), 0.0);
    }

    #[test]
    fn test_aureole_norm_matches_numeric_integral() {
        for (radii, slopes) in [
            (vec![30.0], vec![2.5]),
            (vec![20.0, 80.0], vec![1.0, 3.2]),
            (vec![10.0, 45.0, 150.0], vec![2.0, 1.6, 2.9]),
        ] {
            let profile = CompositeProfile::new(&params(&radii, &slopes)).unwrap();
            let numeric = radial_flux(|r| profile.aureole_shape(r), 300.0 - 1e-9, 200_000);
            assert_relative_eq!(profile.aureole_norm(), numeric, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_moffat_core_has_unit_flux() {
        let profile = CompositeProfile::new(&params(&[30.0], &[2.5])).unwrap();
        let numeric = radial_flux(|r| profile.core(r), 5000.0, 500_000);
        assert_relative_eq!(numeric, 1.0, max_relative = 1e-3);
    }

    #[test]
    fn test_elliptical_profile_scales_minor_axis() {
        let mut p = params(&[30.0], &[2.5]);
        p.ellipticity = 0.4;
        p.position_angle = 0.0;
        let profile = CompositeProfile::new(&p).unwrap();
        let q = 0.6;

        let major = profile.evaluate(12.0, 0.0);
        let minor = profile.evaluate(0.0, 12.0 * q);
        assert_relative_eq!(major, minor, max_relative = 1e-12);
        assert_relative_eq!(major, profile.radial(12.0) / q, max_relative = 1e-12);
    }

    #[test]
    fn test_rotated_major_axis() {
        let mut p = params(&[30.0], &[2.5]);
        p.ellipticity = 0.5;
        p.position_angle = std::f64::consts::FRAC_PI_2;
        let profile = CompositeProfile::new(&p).unwrap();
        assert_relative_eq!(profile.elliptical_radius(0.0, 10.0), 10.0, epsilon = 1e-9);
        assert_relative_eq!(profile.elliptical_radius(10.0, 0.0), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_unnormalisable_core() {
        let mut p = params(&[30.0], &[2.5]);
        p.concentration = 1.0;
        assert!(matches!(
            CompositeProfile::new(&p),
            Err(PriorViolation::InvalidShape(_))
        ));
    }
}
