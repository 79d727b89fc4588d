//! Nested-Sampling Fitter.
//!
//! [`NestedSampler`] drives a [`SamplerState`] through
//! `Initialized -> Sampling -> {Converged, Failed}`. Bookkeeping is strictly
//! sequential; only the proposal tasks that refill the candidate queue run on
//! the worker pool. Each task draws from its own random stream, keyed by the
//! run seed and the task's serial number, so a run is reproducible for any
//! worker count and resumes exactly from a checkpoint.
//!
//! # Usage
//!
//! ```ignore
//! let sampler = NestedSampler::new(SamplerConfig::default())?;
//! let run = sampler.run_nested(&likelihood)?;
//! println!("ln Z = {} ± {}", run.log_z, run.log_z_err);
//! ```

pub mod batch;
pub mod checkpoint;
pub mod evidence;
pub mod proposal;
pub mod state;

pub use batch::{batch_bounds, merge_runs, MergedRun, RunSamples};
pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, CHECKPOINT_VERSION};
pub use evidence::{log_add_exp, EvidenceAccumulator};
pub use proposal::{BoundingEllipsoid, Proposal, ProposalOutcome, ProposalStrategy};
pub use state::{
    Candidate, DeadPoint, FailureReason, LivePoint, SamplerState, SamplerStatus,
};

use crate::error::FitError;
use crate::likelihood::Likelihood;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Consecutive fruitless queue refills before a run is declared stuck
const MAX_EMPTY_REFILLS: u32 = 100;

/// Rounds of prior draws allowed while populating the live set
const MAX_INIT_ROUNDS: usize = 50;

const WALK_SCALE_RANGE: (f64, f64) = (1e-4, 10.0);

/// Stopping fraction matching a remaining-evidence tolerance of
/// `ln(1 + f) = 1e-3 (n_live - 1) + 0.01`
pub fn default_stopping_fraction(n_live: usize) -> f64 {
    (1e-3 * n_live.saturating_sub(1) as f64 + 0.01).exp() - 1.0
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Batch augmentation after the baseline run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    pub enabled: bool,
    /// Live points of each batch
    pub batch_live: usize,
    pub max_batches: usize,
    /// Share of the batch weighting given to the posterior, the remainder to
    /// the evidence
    pub posterior_fraction: f64,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_live: 50,
            max_batches: 2,
            posterior_fraction: 0.8,
        }
    }
}

/// Sampler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub n_live: usize,
    /// Stop once the live set could add less than this fraction of the
    /// accumulated evidence
    pub stopping_fraction: f64,
    pub max_iterations: Option<u64>,
    pub max_calls: Option<u64>,
    pub max_wall_time_s: Option<f64>,
    /// Worker threads for proposal tasks
    pub workers: usize,
    /// Proposal tasks per queue refill. Results depend on this, not on
    /// `workers`.
    pub queue_size: usize,
    pub proposal: ProposalStrategy,
    pub seed: u64,
    pub checkpoint_path: Option<PathBuf>,
    /// Iterations between checkpoint writes
    pub checkpoint_every: u64,
    pub dynamic: DynamicConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let n_live = 100;
        Self {
            n_live,
            stopping_fraction: default_stopping_fraction(n_live),
            max_iterations: None,
            max_calls: None,
            max_wall_time_s: None,
            workers: default_workers(),
            queue_size: 8,
            proposal: ProposalStrategy::default(),
            seed: 42,
            checkpoint_path: None,
            checkpoint_every: 1000,
            dynamic: DynamicConfig::default(),
        }
    }
}

impl SamplerConfig {
    /// Check the settings for a problem of dimension `ndim`
    pub fn validate(&self, ndim: usize) -> Result<(), String> {
        if self.n_live == 0 || self.n_live < 2 * ndim {
            return Err(format!(
                "{} live points are too few for {} free parameters (need at least {})",
                self.n_live,
                ndim,
                (2 * ndim).max(1)
            ));
        }
        if !(self.stopping_fraction > 0.0 && self.stopping_fraction < 1.0) {
            return Err(format!(
                "stopping fraction {} must lie in (0, 1)",
                self.stopping_fraction
            ));
        }
        if self.workers == 0 {
            return Err("worker pool needs at least one thread".to_string());
        }
        if self.queue_size == 0 {
            return Err("proposal queue size must be positive".to_string());
        }
        if self.checkpoint_every == 0 {
            return Err("checkpoint interval must be positive".to_string());
        }
        if let Some(limit) = self.max_wall_time_s {
            if !(limit > 0.0) {
                return Err(format!("wall-clock limit {limit} s must be positive"));
            }
        }
        match self.proposal {
            ProposalStrategy::Ellipsoidal { enlarge } if !(enlarge >= 1.0 && enlarge.is_finite()) => {
                return Err(format!("ellipsoid enlargement {enlarge} must be at least 1"));
            }
            ProposalStrategy::RandomWalk { walks: 0 } => {
                return Err("random walk needs at least one step".to_string());
            }
            _ => {}
        }
        let dynamic = &self.dynamic;
        if dynamic.enabled {
            if dynamic.batch_live == 0 || dynamic.batch_live < 2 * ndim {
                return Err(format!(
                    "batch of {} live points is too small for {} free parameters",
                    dynamic.batch_live, ndim
                ));
            }
            if !(0.0..=1.0).contains(&dynamic.posterior_fraction) {
                return Err(format!(
                    "posterior fraction {} must lie in [0, 1]",
                    dynamic.posterior_fraction
                ));
            }
        }
        Ok(())
    }
}

/// Weighted samples and evidence of a finished (or stopped) sampling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedRun {
    /// Dead points in ascending likelihood order, baseline and batches merged
    pub samples: Vec<DeadPoint>,
    #[serde(with = "evidence::neg_inf_as_null")]
    pub log_z: f64,
    pub log_z_err: f64,
    pub information: f64,
    pub iterations: u64,
    pub calls: u64,
    /// Status of the baseline run
    pub status: SamplerStatus,
    pub batches: usize,
}

/// Drives nested-sampling runs on a fixed worker pool
pub struct NestedSampler {
    config: SamplerConfig,
    pool: rayon::ThreadPool,
    label: String,
    progress: Option<ProgressBar>,
}

impl NestedSampler {
    /// Build a sampler and its worker pool
    pub fn new(config: SamplerConfig) -> Result<Self, FitError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .build()
            .map_err(|e| FitError::InvalidConfig(format!("worker pool: {e}")))?;
        Ok(Self {
            config,
            pool,
            label: "sampler".to_string(),
            progress: None,
        })
    }

    /// Name used in log lines and errors, usually the region name
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Report each iteration on `bar`
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Draw the baseline live set from the prior
    pub fn initialize<L: Likelihood + ?Sized>(&self, likelihood: &L) -> Result<SamplerState, FitError> {
        self.initialize_from(likelihood, self.config.n_live, self.config.seed, &[], None, None)
    }

    /// Draw `n_live` points with likelihood above `log_l_low`, proposing from
    /// the `reference` points when there are any.
    ///
    /// For a run from the prior, the share of draws with a finite likelihood
    /// estimates the feasible prior volume, and the evidence starts there.
    fn initialize_from<L: Likelihood + ?Sized>(
        &self,
        likelihood: &L,
        n_live: usize,
        seed: u64,
        reference: &[LivePoint],
        log_l_low: Option<f64>,
        log_l_high: Option<f64>,
    ) -> Result<SamplerState, FitError> {
        let ndim = likelihood.ndim();
        let bound = log_l_low.unwrap_or(f64::NEG_INFINITY);
        let proposal = Proposal::build(self.config.proposal, reference, 1.0);
        let chunk = n_live.max(self.config.queue_size);

        let mut live: Vec<LivePoint> = Vec::with_capacity(n_live);
        let mut calls = 0;
        let mut feasible = 0u64;
        let mut next_serial = 0u64;
        for _ in 0..MAX_INIT_ROUNDS {
            if live.len() >= n_live {
                break;
            }
            let first = next_serial;
            let outcomes: Vec<ProposalOutcome> = self.pool.install(|| {
                (0..chunk)
                    .into_par_iter()
                    .map(|k| proposal.propose(likelihood, ndim, bound, seed, first + k as u64))
                    .collect()
            });
            next_serial += chunk as u64;

            let before = live.len();
            for outcome in outcomes {
                calls += outcome.calls;
                let Some(candidate) = outcome.candidate.filter(|c| c.log_l.is_finite()) else {
                    continue;
                };
                feasible += 1;
                if live.len() < n_live {
                    live.push(LivePoint {
                        u: candidate.u,
                        v: candidate.v,
                        log_l: candidate.log_l,
                        birth: live.len() as u64,
                    });
                }
            }
            if live.len() == before {
                break;
            }
        }

        if live.len() < n_live {
            return Err(FitError::ConvergenceFailure {
                region: self.label.clone(),
                iterations: 0,
                reason: format!(
                    "only {} of {} initial live points have a finite likelihood after {} calls",
                    live.len(),
                    n_live,
                    calls
                ),
            });
        }
        let log_vol_init = if log_l_low.is_none() && calls > 0 {
            (feasible as f64 / calls as f64).ln().min(0.0)
        } else {
            0.0
        };
        debug!(
            "{}: drew {} live points in {} calls, feasible log volume {:.3}",
            self.label, n_live, calls, log_vol_init
        );

        Ok(SamplerState {
            ndim,
            n_live,
            seed,
            status: SamplerStatus::Initialized,
            live,
            dead: Vec::new(),
            evidence: EvidenceAccumulator::starting_at(log_vol_init),
            queue: VecDeque::new(),
            iteration: 0,
            calls,
            next_serial,
            next_birth: n_live as u64,
            walk_scale: 1.0,
            empty_refills: 0,
            log_l_low,
            log_l_high,
            elapsed_s: 0.0,
            log_vol_init,
            fingerprint: likelihood.fingerprint(),
        })
    }

    /// Restore a compatible checkpoint from `path`, or start afresh.
    ///
    /// A checkpoint that cannot be read, or that belongs to a different
    /// problem, data set, prior or seed, is reported with a warning and
    /// ignored.
    pub fn resume_or_initialize<L: Likelihood + ?Sized>(
        &self,
        likelihood: &L,
        path: Option<&Path>,
    ) -> Result<SamplerState, FitError> {
        if let Some(path) = path.filter(|p| p.exists()) {
            match load_checkpoint(path).and_then(|state| self.check_compatible(state, likelihood, path)) {
                Ok(state) => {
                    info!(
                        "{}: resuming from {} at iteration {}",
                        self.label,
                        path.display(),
                        state.iteration
                    );
                    return Ok(state);
                }
                Err(err) => warn!("{}: {}; restarting from scratch", self.label, err),
            }
        }
        self.initialize(likelihood)
    }

    fn check_compatible<L: Likelihood + ?Sized>(
        &self,
        state: SamplerState,
        likelihood: &L,
        path: &Path,
    ) -> Result<SamplerState, FitError> {
        let ndim = likelihood.ndim();
        let fingerprint = likelihood.fingerprint();
        let mismatch = if state.ndim != ndim {
            Some(format!("dimension {} differs from {}", state.ndim, ndim))
        } else if state.n_live != self.config.n_live {
            Some(format!("{} live points differ from {}", state.n_live, self.config.n_live))
        } else if state.seed != self.config.seed {
            Some(format!("seed {} differs from {}", state.seed, self.config.seed))
        } else if state.log_l_low.is_some() || state.log_l_high.is_some() {
            Some("checkpoint belongs to a batch run".to_string())
        } else if state.fingerprint != fingerprint {
            Some(format!(
                "data or priors changed (fingerprint {} vs {})",
                state.fingerprint.as_deref().unwrap_or("none"),
                fingerprint.as_deref().unwrap_or("none")
            ))
        } else {
            None
        };
        match mismatch {
            Some(reason) => Err(FitError::CheckpointCorruption {
                path: path.to_path_buf(),
                reason,
            }),
            None => Ok(state),
        }
    }

    fn stopping_reached(&self, state: &SamplerState) -> bool {
        match state.log_l_high {
            Some(high) => state
                .worst_index()
                .is_some_and(|i| state.live[i].log_l >= high),
            None => state.log_remaining_ratio() < self.config.stopping_fraction.ln(),
        }
    }

    fn budget_exhausted(&self, state: &SamplerState, elapsed_s: f64) -> Option<FailureReason> {
        if self.config.max_iterations.is_some_and(|max| state.iteration >= max) {
            Some(FailureReason::MaxIterations)
        } else if self.config.max_calls.is_some_and(|max| state.calls >= max) {
            Some(FailureReason::MaxCalls)
        } else if self.config.max_wall_time_s.is_some_and(|limit| elapsed_s >= limit) {
            Some(FailureReason::WallClock)
        } else {
            None
        }
    }

    /// Advance the run by one replacement.
    ///
    /// # Returns
    /// `false` once the state is terminal; the live set has then been folded
    /// into the dead points.
    pub fn step<L: Likelihood + ?Sized>(&self, state: &mut SamplerState, likelihood: &L) -> bool {
        if state.status.is_terminal() {
            return false;
        }
        state.status = SamplerStatus::Sampling;

        if self.stopping_reached(state) {
            finalize(state, SamplerStatus::Converged);
            return false;
        }
        if let Some(reason) = self.budget_exhausted(state, state.elapsed_s) {
            finalize(state, SamplerStatus::Failed(reason));
            return false;
        }

        let Some(worst) = state.worst_index() else {
            finalize(state, SamplerStatus::Failed(FailureReason::ProposalExhausted));
            return false;
        };
        let bound = state.live[worst].log_l;

        let candidate = loop {
            match state.queue.pop_front() {
                Some(candidate) if candidate.log_l > bound => break candidate,
                Some(_) => continue,
                None => {
                    if self.refill(state, likelihood, bound) > 0 {
                        state.empty_refills = 0;
                    } else {
                        state.empty_refills += 1;
                        if state.empty_refills >= MAX_EMPTY_REFILLS {
                            finalize(state, SamplerStatus::Failed(FailureReason::ProposalExhausted));
                            return false;
                        }
                    }
                }
            }
        };

        let n_live = state.live.len();
        let replacement = LivePoint {
            u: candidate.u,
            v: candidate.v,
            log_l: candidate.log_l,
            birth: state.next_birth,
        };
        state.next_birth += 1;
        let dead = std::mem::replace(&mut state.live[worst], replacement);
        let (log_vol, log_wt) = state.evidence.add(bound, n_live);
        state.dead.push(DeadPoint {
            u: dead.u,
            v: dead.v,
            log_l: bound,
            n_live,
            log_vol,
            log_wt,
        });
        state.iteration += 1;
        true
    }

    /// Dispatch one batch of proposal tasks and queue their candidates.
    ///
    /// # Returns
    /// Number of candidates queued.
    fn refill<L: Likelihood + ?Sized>(&self, state: &mut SamplerState, likelihood: &L, bound: f64) -> usize {
        let strategy = if state.log_l_low.is_none() && state.iteration < state.n_live as u64 {
            ProposalStrategy::Uniform
        } else {
            self.config.proposal
        };
        let first = state.next_serial;
        let count = self.config.queue_size;
        let outcomes: Vec<ProposalOutcome> = {
            let proposal = Proposal::build(strategy, &state.live, state.walk_scale);
            let (ndim, seed) = (state.ndim, state.seed);
            self.pool.install(|| {
                (0..count)
                    .into_par_iter()
                    .map(|k| proposal.propose(likelihood, ndim, bound, seed, first + k as u64))
                    .collect()
            })
        };
        state.next_serial += count as u64;

        let mut queued = 0;
        let (mut accepted, mut rejected) = (0u64, 0u64);
        for outcome in outcomes {
            state.calls += outcome.calls;
            accepted += outcome.accepted_steps;
            rejected += outcome.rejected_steps;
            if let Some(candidate) = outcome.candidate.filter(|c| c.log_l.is_finite()) {
                state.queue.push_back(candidate);
                queued += 1;
            }
        }

        if matches!(strategy, ProposalStrategy::RandomWalk { .. }) && accepted + rejected > 0 {
            let acceptance = accepted as f64 / (accepted + rejected) as f64;
            state.walk_scale = (state.walk_scale * (2.0 * (acceptance - 0.5)).exp())
                .clamp(WALK_SCALE_RANGE.0, WALK_SCALE_RANGE.1);
        }
        debug!(
            "{}: iteration {} refill queued {}/{} candidates, {} calls so far",
            self.label, state.iteration, queued, count, state.calls
        );
        queued
    }

    /// Step until the state is terminal, writing checkpoints to `checkpoint`
    /// every `checkpoint_every` iterations and once more at the end.
    pub fn run<L: Likelihood + ?Sized>(
        &self,
        state: &mut SamplerState,
        likelihood: &L,
        checkpoint: Option<&Path>,
    ) -> Result<(), FitError> {
        let started = Instant::now();
        let previous = state.elapsed_s;
        let elapsed = || previous + started.elapsed().as_secs_f64();

        if !state.status.is_terminal() {
            info!(
                "{}: sampling {} parameters with {} live points",
                self.label, state.ndim, state.n_live
            );
        }
        let mut interrupted = false;
        loop {
            if !state.status.is_terminal() && !self.stopping_reached(state) {
                if let Some(reason) = self.budget_exhausted(state, elapsed()) {
                    // The checkpoint keeps the open state so a larger budget
                    // can pick up from here
                    if let Some(path) = checkpoint {
                        state.elapsed_s = elapsed();
                        save_checkpoint(path, state)?;
                    }
                    finalize(state, SamplerStatus::Failed(reason));
                    interrupted = true;
                }
            }
            if !self.step(state, likelihood) {
                break;
            }
            if let Some(bar) = &self.progress {
                bar.set_message(format!("ln Z {:.2}", state.evidence.log_z));
                bar.inc(1);
            }
            if let Some(path) = checkpoint {
                if state.iteration % self.config.checkpoint_every == 0 {
                    state.elapsed_s = elapsed();
                    save_checkpoint(path, state)?;
                }
            }
        }
        state.elapsed_s = elapsed();
        if let (Some(path), false) = (checkpoint, interrupted) {
            save_checkpoint(path, state)?;
        }

        let log_z_err = state.evidence.log_z_err(state.n_live);
        match state.status {
            SamplerStatus::Failed(reason) => warn!(
                "{}: stopped after {} iterations ({}), ln Z = {:.3} ± {:.3}",
                self.label, state.iteration, reason, state.evidence.log_z, log_z_err
            ),
            _ => info!(
                "{}: converged after {} iterations and {} calls, ln Z = {:.3} ± {:.3}",
                self.label, state.iteration, state.calls, state.evidence.log_z, log_z_err
            ),
        }
        Ok(())
    }

    /// Run (or resume) the baseline, add dynamic batches when enabled, and
    /// merge everything into one weighted sample set.
    pub fn run_nested<L: Likelihood + ?Sized>(&self, likelihood: &L) -> Result<NestedRun, FitError> {
        let path = self.config.checkpoint_path.as_deref();
        let mut baseline = self.resume_or_initialize(likelihood, path)?;
        self.run(&mut baseline, likelihood, path)?;

        let mut iterations = baseline.iteration;
        let mut calls = baseline.calls;
        let mut runs = vec![RunSamples::from_state(&baseline)];

        let dynamic = self.config.dynamic;
        if dynamic.enabled && baseline.status == SamplerStatus::Converged {
            for batch in 0..dynamic.max_batches {
                let merged = merge_runs(&runs);
                let (low, high) = batch_bounds(&merged.samples, dynamic.posterior_fraction);
                // A batch from the prior draws uniformly; otherwise it proposes
                // from the samples above its bound
                let seeds: Vec<&DeadPoint> = match low {
                    Some(low) => merged.samples.iter().filter(|s| s.log_l > low).collect(),
                    None => Vec::new(),
                };
                let reference: Vec<LivePoint> = seeds
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| LivePoint {
                        u: s.u.clone(),
                        v: s.v.clone(),
                        log_l: s.log_l,
                        birth: i as u64,
                    })
                    .collect();
                info!(
                    "{}: batch {} between ln L {:?} and {:?}",
                    self.label,
                    batch + 1,
                    low,
                    high
                );
                let seed = batch_seed(self.config.seed, batch);
                let mut state =
                    self.initialize_from(likelihood, dynamic.batch_live, seed, &reference, low, high)?;
                self.run(&mut state, likelihood, None)?;
                iterations += state.iteration;
                calls += state.calls;
                runs.push(RunSamples::from_state(&state));
            }
        }

        let merged = merge_runs(&runs);
        Ok(NestedRun {
            log_z: merged.evidence.log_z,
            log_z_err: merged.evidence.log_z_err(merged.max_live()),
            information: merged.evidence.information,
            samples: merged.samples,
            iterations,
            calls,
            status: baseline.status,
            batches: runs.len() - 1,
        })
    }
}

/// Seed of dynamic batch `batch`, distinct from the baseline seed
fn batch_seed(seed: u64, batch: usize) -> u64 {
    seed ^ (batch as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Fold the live set into the dead points and mark the run terminal.
///
/// Live points are added in ascending likelihood order with live counts
/// `N, N - 1, ..., 1`, so the remaining prior volume is fully spent.
fn finalize(state: &mut SamplerState, status: SamplerStatus) {
    let mut live = std::mem::take(&mut state.live);
    live.sort_by(|a, b| a.log_l.total_cmp(&b.log_l).then(a.birth.cmp(&b.birth)));
    let count = live.len();
    for (i, point) in live.into_iter().enumerate() {
        let n_live = count - i;
        let (log_vol, log_wt) = state.evidence.add(point.log_l, n_live);
        state.dead.push(DeadPoint {
            u: point.u,
            v: point.v,
            log_l: point.log_l,
            n_live,
            log_vol,
            log_wt,
        });
    }
    state.queue.clear();
    state.status = status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::Evaluation;
    use std::f64::consts::PI;
    use tempfile::TempDir;

    /// Normalised isotropic Gaussian centred in the cube; ln Z is 0 to well
    /// within sampling error.
    struct Gaussian {
        ndim: usize,
        sigma: f64,
    }

    impl Likelihood for Gaussian {
        fn ndim(&self) -> usize {
            self.ndim
        }

        fn evaluate(&self, cube: &[f64]) -> Evaluation {
            let r2: f64 = cube.iter().map(|u| (u - 0.5) * (u - 0.5)).sum();
            let norm = -0.5 * self.ndim as f64 * (2.0 * PI * self.sigma * self.sigma).ln();
            Evaluation {
                values: cube.to_vec(),
                log_l: norm - 0.5 * r2 / (self.sigma * self.sigma),
            }
        }

        fn fingerprint(&self) -> Option<String> {
            Some(format!("gaussian {} {}", self.ndim, self.sigma))
        }
    }

    /// Normalised Gaussian at (0.3, 0.7) that only exists where `u0 < u1`,
    /// so half the cube is infeasible while ln Z stays 0.
    struct HalfPlaneGaussian;

    impl Likelihood for HalfPlaneGaussian {
        fn ndim(&self) -> usize {
            2
        }

        fn evaluate(&self, cube: &[f64]) -> Evaluation {
            if cube[0] >= cube[1] {
                return Evaluation::infeasible();
            }
            let sigma: f64 = 0.05;
            let r2 = (cube[0] - 0.3).powi(2) + (cube[1] - 0.7).powi(2);
            Evaluation {
                values: cube.to_vec(),
                log_l: -(2.0 * PI * sigma * sigma).ln() - 0.5 * r2 / (sigma * sigma),
            }
        }
    }

    fn config(workers: usize) -> SamplerConfig {
        SamplerConfig {
            n_live: 150,
            stopping_fraction: 0.01,
            workers,
            queue_size: 8,
            seed: 7,
            ..SamplerConfig::default()
        }
    }

    const GAUSSIAN: Gaussian = Gaussian {
        ndim: 2,
        sigma: 0.1,
    };

    #[test]
    fn test_default_stopping_fraction() {
        let f = default_stopping_fraction(100);
        assert!((f - (0.109f64.exp() - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(SamplerConfig::default().validate(6).is_ok());
        let too_few = SamplerConfig {
            n_live: 5,
            ..SamplerConfig::default()
        };
        assert!(too_few.validate(6).is_err());
        let bad_fraction = SamplerConfig {
            stopping_fraction: 1.5,
            ..SamplerConfig::default()
        };
        assert!(bad_fraction.validate(2).is_err());
        let no_workers = SamplerConfig {
            workers: 0,
            ..SamplerConfig::default()
        };
        assert!(no_workers.validate(2).is_err());
    }

    #[test]
    fn test_gaussian_evidence() {
        let sampler = NestedSampler::new(config(2)).unwrap();
        let run = sampler.run_nested(&GAUSSIAN).unwrap();
        assert_eq!(run.status, SamplerStatus::Converged);
        assert!(run.log_z.abs() < 4.0 * run.log_z_err + 0.05, "ln Z = {}", run.log_z);
        assert!(run
            .samples
            .windows(2)
            .all(|w| w[0].log_l <= w[1].log_l));
    }

    #[test]
    fn test_infeasible_prior_volume_excluded_from_evidence() {
        let sampler = NestedSampler::new(SamplerConfig {
            n_live: 200,
            seed: 3,
            ..config(2)
        })
        .unwrap();
        let state = sampler.initialize(&HalfPlaneGaussian).unwrap();
        assert!(
            (state.log_vol_init + 2f64.ln()).abs() < 0.15,
            "feasible log volume {}",
            state.log_vol_init
        );
        assert_eq!(state.evidence.log_vol, state.log_vol_init);

        let run = sampler.run_nested(&HalfPlaneGaussian).unwrap();
        assert_eq!(run.status, SamplerStatus::Converged);
        assert!(
            run.log_z.abs() < 3.0 * run.log_z_err + 0.05,
            "ln Z = {} ± {}",
            run.log_z,
            run.log_z_err
        );
    }

    #[test]
    fn test_fully_feasible_prior_starts_at_unit_volume() {
        let state = NestedSampler::new(config(1)).unwrap().initialize(&GAUSSIAN).unwrap();
        assert_eq!(state.log_vol_init, 0.0);
        assert_eq!(state.evidence, EvidenceAccumulator::new());
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let serial = NestedSampler::new(config(1)).unwrap().run_nested(&GAUSSIAN).unwrap();
        let parallel = NestedSampler::new(config(4)).unwrap().run_nested(&GAUSSIAN).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_iteration_limit_keeps_partial_results() {
        let limited = SamplerConfig {
            max_iterations: Some(50),
            ..config(2)
        };
        let sampler = NestedSampler::new(limited).unwrap();
        let run = sampler.run_nested(&GAUSSIAN).unwrap();
        assert_eq!(run.status, SamplerStatus::Failed(FailureReason::MaxIterations));
        assert_eq!(run.iterations, 50);
        // Partial run keeps the dead points plus the folded live set
        assert_eq!(run.samples.len(), 50 + 150);
        assert!(run.log_z.is_finite());
    }

    #[test]
    fn test_budget_stop_leaves_resumable_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let limited = NestedSampler::new(SamplerConfig {
            max_iterations: Some(120),
            ..config(1)
        })
        .unwrap();
        let mut state = limited.initialize(&GAUSSIAN).unwrap();
        limited.run(&mut state, &GAUSSIAN, Some(&path)).unwrap();
        assert_eq!(state.status, SamplerStatus::Failed(FailureReason::MaxIterations));

        let saved = load_checkpoint(&path).unwrap();
        assert_eq!(saved.iteration, 120);
        assert!(!saved.status.is_terminal());

        let sampler = NestedSampler::new(config(1)).unwrap();
        let mut resumed = sampler.resume_or_initialize(&GAUSSIAN, Some(&path)).unwrap();
        sampler.run(&mut resumed, &GAUSSIAN, None).unwrap();
        let mut uninterrupted = sampler.initialize(&GAUSSIAN).unwrap();
        sampler.run(&mut uninterrupted, &GAUSSIAN, None).unwrap();
        assert_eq!(resumed.status, SamplerStatus::Converged);
        assert_eq!(resumed.dead, uninterrupted.dead);
    }

    #[test]
    fn test_resume_matches_uninterrupted_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let sampler = NestedSampler::new(config(2)).unwrap();

        let mut state = sampler.initialize(&GAUSSIAN).unwrap();
        for _ in 0..300 {
            assert!(sampler.step(&mut state, &GAUSSIAN));
        }
        save_checkpoint(&path, &state).unwrap();

        let mut resumed = sampler.resume_or_initialize(&GAUSSIAN, Some(&path)).unwrap();
        assert_eq!(resumed.iteration, 300);
        sampler.run(&mut resumed, &GAUSSIAN, None).unwrap();

        let mut uninterrupted = sampler.initialize(&GAUSSIAN).unwrap();
        sampler.run(&mut uninterrupted, &GAUSSIAN, None).unwrap();
        assert_eq!(resumed.evidence, uninterrupted.evidence);
        assert_eq!(resumed.dead, uninterrupted.dead);
    }

    #[test]
    fn test_incompatible_checkpoint_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let other = NestedSampler::new(SamplerConfig {
            seed: 99,
            ..config(1)
        })
        .unwrap();
        let state = other.initialize(&GAUSSIAN).unwrap();
        save_checkpoint(&path, &state).unwrap();

        let sampler = NestedSampler::new(config(1)).unwrap();
        let restored = sampler.resume_or_initialize(&GAUSSIAN, Some(&path)).unwrap();
        assert_eq!(restored, sampler.initialize(&GAUSSIAN).unwrap());
    }

    #[test]
    fn test_checkpoint_for_other_likelihood_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let sampler = NestedSampler::new(config(1)).unwrap();
        let mut state = sampler.initialize(&GAUSSIAN).unwrap();
        for _ in 0..100 {
            assert!(sampler.step(&mut state, &GAUSSIAN));
        }
        save_checkpoint(&path, &state).unwrap();

        let wider = Gaussian {
            ndim: 2,
            sigma: 0.2,
        };
        let restored = sampler.resume_or_initialize(&wider, Some(&path)).unwrap();
        assert_eq!(restored.iteration, 0);
        assert_eq!(restored, sampler.initialize(&wider).unwrap());

        let same = sampler.resume_or_initialize(&GAUSSIAN, Some(&path)).unwrap();
        assert_eq!(same.iteration, 100);
    }

    #[test]
    fn test_dynamic_batches_extend_run() {
        let dynamic = SamplerConfig {
            dynamic: DynamicConfig {
                enabled: true,
                batch_live: 50,
                max_batches: 2,
                posterior_fraction: 0.8,
            },
            ..config(2)
        };
        let baseline = NestedSampler::new(config(2)).unwrap().run_nested(&GAUSSIAN).unwrap();
        let run = NestedSampler::new(dynamic).unwrap().run_nested(&GAUSSIAN).unwrap();
        assert_eq!(run.batches, 2);
        assert!(run.samples.len() > baseline.samples.len());
        assert!(run.log_z.abs() < 4.0 * run.log_z_err + 0.05, "ln Z = {}", run.log_z);
    }

    #[test]
    fn test_infeasible_prior_fails_initialisation() {
        struct Nowhere;
        impl Likelihood for Nowhere {
            fn ndim(&self) -> usize {
                1
            }
            fn evaluate(&self, _cube: &[f64]) -> Evaluation {
                Evaluation::infeasible()
            }
        }
        let sampler = NestedSampler::new(SamplerConfig {
            n_live: 10,
            ..config(1)
        })
        .unwrap();
        assert!(matches!(
            sampler.initialize(&Nowhere),
            Err(FitError::ConvergenceFailure { iterations: 0, .. })
        ));
    }
}
