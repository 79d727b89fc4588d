//! Small robust-statistics and least-squares helpers shared by catalog
//! calibration and aperture-law fitting.

use nalgebra::{DMatrix, DVector};

/// Scale factor turning a median absolute deviation into a Gaussian sigma
const MAD_TO_SIGMA: f64 = 1.4826;

/// Median of a slice, ignoring NaN entries
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Iteratively sigma-clipped median.
///
/// # Arguments
/// * `values` - Samples to summarise
/// * `n_sigma` - Clipping threshold in MAD-derived sigmas
/// * `max_iterations` - Upper bound on clipping rounds
///
/// # Returns
/// The clipped median and a keep-mask over `values`, or `None` if no finite
/// sample remains.
pub fn sigma_clipped_median(
    values: &[f64],
    n_sigma: f64,
    max_iterations: usize,
) -> Option<(f64, Vec<bool>)> {
    let mut keep: Vec<bool> = values.iter().map(|v| v.is_finite()).collect();
    let mut center = median(&kept(values, &keep))?;

    for _ in 0..max_iterations {
        let deviations: Vec<f64> = kept(values, &keep)
            .iter()
            .map(|v| (v - center).abs())
            .collect();
        let sigma = MAD_TO_SIGMA * median(&deviations)?;
        if sigma <= 0.0 {
            break;
        }
        let next: Vec<bool> = values
            .iter()
            .map(|v| v.is_finite() && (v - center).abs() <= n_sigma * sigma)
            .collect();
        if next == keep {
            break;
        }
        keep = next;
        center = median(&kept(values, &keep))?;
    }
    Some((center, keep))
}

fn kept(values: &[f64], keep: &[bool]) -> Vec<f64> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, &k)| k)
        .map(|(&v, _)| v)
        .collect()
}

/// Linear least-squares solution of `design * x ≈ target` via SVD
pub fn solve_least_squares(design: &DMatrix<f64>, target: &DVector<f64>) -> Option<DVector<f64>> {
    if design.nrows() < design.ncols() || design.nrows() != target.len() {
        return None;
    }
    let svd = design.clone().svd(true, true);
    svd.solve(target, 1e-12).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[f64::NAN, 5.0]), Some(5.0));
    }

    #[test]
    fn test_sigma_clip_rejects_outlier() {
        let mut values = vec![25.0, 25.1, 24.9, 25.05, 24.95, 25.02, 24.98];
        values.push(31.0);
        let (center, keep) = sigma_clipped_median(&values, 3.0, 10).unwrap();
        assert_relative_eq!(center, 25.0, epsilon = 0.02);
        assert!(!keep[7]);
        assert!(keep[..7].iter().all(|&k| k));
    }

    #[test]
    fn test_least_squares_line() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let design = DMatrix::from_fn(xs.len(), 2, |i, j| if j == 0 { 1.0 } else { xs[i] });
        let target = DVector::from_iterator(xs.len(), xs.iter().map(|x| 2.0 - 0.5 * x));
        let solution = solve_least_squares(&design, &target).unwrap();
        assert_relative_eq!(solution[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(solution[1], -0.5, epsilon = 1e-10);
    }
}
