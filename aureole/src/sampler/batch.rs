//! Dynamic batch augmentation and run merging.
//!
//! After the baseline run converges, extra batches of live points are run
//! between likelihood bounds chosen where the posterior mass concentrates.
//! All runs are then merged into one sample set whose prior volumes come from
//! the combined live-point count at every likelihood level.

use super::evidence::{log_add_exp, EvidenceAccumulator};
use super::state::{DeadPoint, SamplerState};

/// Dead points of one run and the likelihood bound it started from
#[derive(Debug, Clone, PartialEq)]
pub struct RunSamples {
    /// Dead points in ascending likelihood order
    pub samples: Vec<DeadPoint>,
    pub log_l_low: Option<f64>,
    /// Log prior volume with a finite likelihood
    pub log_vol_init: f64,
}

impl RunSamples {
    pub fn from_state(state: &SamplerState) -> Self {
        Self {
            samples: state.dead.clone(),
            log_l_low: state.log_l_low,
            log_vol_init: state.log_vol_init,
        }
    }
}

/// Samples of several runs combined
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRun {
    pub samples: Vec<DeadPoint>,
    pub evidence: EvidenceAccumulator,
}

impl MergedRun {
    /// Largest live-point count over the merged samples
    pub fn max_live(&self) -> usize {
        self.samples.iter().map(|s| s.n_live).max().unwrap_or(0)
    }
}

/// Likelihood interval for the next batch.
///
/// Each sample is weighted by `f p_i / max p + (1 - f) e_i / max e`, where `p`
/// is the posterior weight, `e_i = 1 - Z_i / Z` the evidence still to be
/// accumulated and `f` the posterior fraction. The batch covers the samples
/// whose weight is at least 80% of the peak.
///
/// # Returns
/// `(log_l_low, log_l_high)`; `None` means unbounded on that side.
pub fn batch_bounds(samples: &[DeadPoint], posterior_fraction: f64) -> (Option<f64>, Option<f64>) {
    if samples.is_empty() {
        return (None, None);
    }
    let max_log_wt = samples
        .iter()
        .map(|s| s.log_wt)
        .fold(f64::NEG_INFINITY, f64::max);
    let posterior: Vec<f64> = samples.iter().map(|s| (s.log_wt - max_log_wt).exp()).collect();

    let mut running = f64::NEG_INFINITY;
    let cumulative: Vec<f64> = samples
        .iter()
        .map(|s| {
            running = log_add_exp(running, s.log_wt);
            running
        })
        .collect();
    let total = running;
    let remaining: Vec<f64> = cumulative.iter().map(|lz| 1.0 - (lz - total).exp()).collect();

    let normalise = |values: &[f64]| {
        let max = values.iter().copied().fold(0.0, f64::max);
        values
            .iter()
            .map(|v| if max > 0.0 { v / max } else { 0.0 })
            .collect::<Vec<_>>()
    };
    let posterior = normalise(&posterior);
    let remaining = normalise(&remaining);
    let weights: Vec<f64> = posterior
        .iter()
        .zip(&remaining)
        .map(|(p, e)| posterior_fraction * p + (1.0 - posterior_fraction) * e)
        .collect();

    let peak = weights.iter().copied().fold(0.0, f64::max);
    let selected = |i: &usize| weights[*i] >= 0.8 * peak;
    let first = (0..weights.len()).find(selected).unwrap_or(0);
    let last = (0..weights.len()).rev().find(selected).unwrap_or(weights.len() - 1);

    let low = first.checked_sub(1).map(|i| samples[i].log_l);
    let high = samples.get(last + 1).map(|s| s.log_l);
    (low, high)
}

/// Merge runs into a single weighted sample set.
///
/// Every merged sample at likelihood `L` dies with `n(L)` live points, the sum
/// over runs of the live count each run had at `L`. A run contributes nothing
/// below its starting bound or after its last sample. Shells start from the
/// feasible volume of the first (baseline) run.
pub fn merge_runs(runs: &[RunSamples]) -> MergedRun {
    let mut merged: Vec<&DeadPoint> = runs.iter().flat_map(|run| run.samples.iter()).collect();
    // Stable sort keeps run order on likelihood ties
    merged.sort_by(|a, b| a.log_l.total_cmp(&b.log_l));

    let mut cursors = vec![0usize; runs.len()];
    let mut evidence = EvidenceAccumulator::starting_at(runs.first().map_or(0.0, |r| r.log_vol_init));
    let mut samples = Vec::with_capacity(merged.len());

    for point in merged {
        let level = point.log_l;
        let mut n_live = 0;
        for (run, cursor) in runs.iter().zip(cursors.iter_mut()) {
            while *cursor < run.samples.len() && run.samples[*cursor].log_l < level {
                *cursor += 1;
            }
            let started = run.log_l_low.map_or(true, |low| level > low);
            if started {
                if let Some(next) = run.samples.get(*cursor) {
                    n_live += next.n_live;
                }
            }
        }
        let n_live = n_live.max(1);
        let (log_vol, log_wt) = evidence.add(level, n_live);
        samples.push(DeadPoint {
            u: point.u.clone(),
            v: point.v.clone(),
            log_l: level,
            n_live,
            log_vol,
            log_wt,
        });
    }

    MergedRun { samples, evidence }
}
