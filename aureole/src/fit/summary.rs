//! Posterior summaries from weighted nested-sampling output.

use crate::sampler::DeadPoint;
use crate::stats::median;
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Normalised importance weights `w_i ∝ exp(log_wt_i)`
pub fn importance_weights(samples: &[DeadPoint]) -> Vec<f64> {
    let max = samples
        .iter()
        .map(|s| s.log_wt)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![0.0; samples.len()];
    }
    let raw: Vec<f64> = samples.iter().map(|s| (s.log_wt - max).exp()).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Weighted mean and covariance of row vectors.
///
/// Uses the unbiased weighted estimator `Σ w (x - μ)(x - μ)ᵀ / (1 - Σ w²)`.
pub fn weighted_mean_and_covariance(
    values: &[Vec<f64>],
    weights: &[f64],
) -> Option<(DVector<f64>, DMatrix<f64>)> {
    let dim = values.first()?.len();
    let total: f64 = weights.iter().sum();
    if values.len() != weights.len() || !(total > 0.0) {
        return None;
    }

    let mut mean = DVector::zeros(dim);
    for (v, w) in values.iter().zip(weights) {
        mean += DVector::from_column_slice(v) * (w / total);
    }

    let mut cov = DMatrix::zeros(dim, dim);
    let mut sum_sq = 0.0;
    for (v, w) in values.iter().zip(weights) {
        let w = w / total;
        let d = DVector::from_column_slice(v) - &mean;
        cov += &d * d.transpose() * w;
        sum_sq += w * w;
    }
    if sum_sq < 1.0 {
        cov /= 1.0 - sum_sq;
    }
    Some((mean, cov))
}

/// Systematic resampling into `weights.len()` equally weighted draws.
///
/// # Arguments
/// * `weights` - Normalised weights
/// * `offset` - Position of the first comb tooth, in `[0, 1)`
///
/// # Returns
/// Indices of the selected samples, in ascending order.
pub fn resample_equal(weights: &[f64], offset: f64) -> Vec<usize> {
    let n = weights.len();
    let mut indices = Vec::with_capacity(n);
    let mut cumulative = 0.0;
    let mut j = 0;
    for i in 0..n {
        let position = (offset + i as f64) / n as f64;
        while j < n - 1 && cumulative + weights[j] < position {
            cumulative += weights[j];
            j += 1;
        }
        indices.push(j);
    }
    indices
}

/// Per-parameter posterior summary over the full parameter vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub labels: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    /// Median of the equally weighted draws
    pub median: Vec<f64>,
    /// Row-major covariance
    pub covariance: Vec<Vec<f64>>,
}

impl PosteriorSummary {
    /// Summarise weighted samples.
    ///
    /// # Arguments
    /// * `labels` - Parameter names, one per entry of each sample's vector
    /// * `samples` - Dead points with their importance weights
    /// * `seed` - Seed of the resampling offset
    pub fn from_samples(labels: Vec<String>, samples: &[DeadPoint], seed: u64) -> Option<Self> {
        // Infeasible points carry no parameter vector
        let usable: Vec<DeadPoint> = samples
            .iter()
            .filter(|s| s.v.len() == labels.len())
            .cloned()
            .collect();
        if usable.is_empty() {
            return None;
        }
        let weights = importance_weights(&usable);
        let values: Vec<Vec<f64>> = usable.into_iter().map(|s| s.v).collect();
        let (mean, cov) = weighted_mean_and_covariance(&values, &weights)?;

        let offset = ChaCha8Rng::seed_from_u64(seed).random::<f64>();
        let draws = resample_equal(&weights, offset);
        let medians = (0..labels.len())
            .map(|k| {
                let column: Vec<f64> = draws.iter().map(|&i| values[i][k]).collect();
                median(&column).unwrap_or(f64::NAN)
            })
            .collect();

        let dim = labels.len();
        Some(Self {
            labels,
            mean: mean.iter().copied().collect(),
            std: (0..dim).map(|k| cov[(k, k)].max(0.0).sqrt()).collect(),
            median: medians,
            covariance: (0..dim)
                .map(|r| (0..dim).map(|c| cov[(r, c)]).collect())
                .collect(),
        })
    }

    /// Mean and standard deviation of the named parameter
    pub fn get(&self, label: &str) -> Option<(f64, f64)> {
        let k = self.labels.iter().position(|l| l == label)?;
        Some((self.mean[k], self.std[k]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(v: f64, log_wt: f64) -> DeadPoint {
        DeadPoint {
            u: vec![v],
            v: vec![v],
            log_l: 0.0,
            n_live: 1,
            log_vol: 0.0,
            log_wt,
        }
    }

    #[test]
    fn test_weights_normalised() {
        let samples = vec![point(1.0, 0.0), point(2.0, 2f64.ln()), point(3.0, f64::NEG_INFINITY)];
        let w = importance_weights(&samples);
        assert_relative_eq!(w[0], 1.0 / 3.0, epsilon = 1e-15);
        assert_relative_eq!(w[1], 2.0 / 3.0, epsilon = 1e-15);
        assert_eq!(w[2], 0.0);
    }

    #[test]
    fn test_weighted_moments() {
        let values = vec![vec![0.0, 1.0], vec![2.0, 1.0]];
        let (mean, cov) = weighted_mean_and_covariance(&values, &[0.5, 0.5]).unwrap();
        assert_relative_eq!(mean[0], 1.0);
        assert_relative_eq!(mean[1], 1.0);
        // Unbiased: 0.5 * (1 + 1) / (1 - 0.5)
        assert_relative_eq!(cov[(0, 0)], 2.0);
        assert_relative_eq!(cov[(1, 1)], 0.0);
    }

    #[test]
    fn test_systematic_resampling_follows_weights() {
        let draws = resample_equal(&[0.1, 0.6, 0.3, 0.0], 0.5);
        assert_eq!(draws.len(), 4);
        let count = |k| draws.iter().filter(|&&i| i == k).count();
        assert_eq!(count(3), 0);
        assert!(count(1) >= 2);
        assert!(draws.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_summary_of_weighted_points() {
        let samples: Vec<DeadPoint> = (0..101)
            .map(|i| {
                let x = i as f64 / 10.0;
                point(x, -0.5 * (x - 5.0).powi(2))
            })
            .collect();
        let summary = PosteriorSummary::from_samples(vec!["x".to_string()], &samples, 3).unwrap();
        let (mean, std) = summary.get("x").unwrap();
        assert_relative_eq!(mean, 5.0, epsilon = 1e-9);
        assert_relative_eq!(std, 1.0, epsilon = 0.02);
        assert!((summary.median[0] - 5.0).abs() < 0.25);
        assert!(summary.get("y").is_none());
    }
}
