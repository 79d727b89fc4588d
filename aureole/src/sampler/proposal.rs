//! Replacement proposals for the nested-sampling loop.
//!
//! A proposal turns a snapshot of the live set into a candidate point whose
//! likelihood exceeds the current bound. Proposals run on worker threads and
//! must not share mutable state: each one draws from its own ChaCha stream,
//! selected by a serial number, so results do not depend on scheduling.

use super::state::{Candidate, LivePoint};
use crate::likelihood::Likelihood;
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Draws attempted by uniform and ellipsoidal proposals before giving up
const MAX_ATTEMPTS: u64 = 2_000;

/// Rejection draws allowed when an ellipsoid sample falls outside the cube
const MAX_CUBE_REDRAWS: usize = 1_000;

/// Configured proposal strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProposalStrategy {
    /// Independent draws from the whole prior
    Uniform,
    /// Draws from the bounding ellipsoid of the live set, enlarged in volume
    Ellipsoidal { enlarge: f64 },
    /// Random walk of `walks` steps from a random live point
    RandomWalk { walks: usize },
}

impl Default for ProposalStrategy {
    fn default() -> Self {
        ProposalStrategy::Ellipsoidal { enlarge: 1.25 }
    }
}

/// Random stream for proposal `serial` of a run seeded with `seed`
pub fn proposal_rng(seed: u64, serial: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(serial);
    rng
}

fn unit_ball_point(rng: &mut ChaCha8Rng, ndim: usize) -> DVector<f64> {
    let direction = DVector::from_fn(ndim, |_, _| StandardNormal.sample(rng));
    let norm = direction.norm();
    let radius = rng.random::<f64>().powf(1.0 / ndim as f64);
    if norm > 0.0 {
        direction * (radius / norm)
    } else {
        direction
    }
}

fn in_unit_cube(u: &[f64]) -> bool {
    u.iter().all(|x| (0.0..=1.0).contains(x))
}

/// Sample mean and covariance of a point set
fn mean_and_covariance(points: &[&[f64]]) -> Option<(DVector<f64>, DMatrix<f64>)> {
    let n = points.len();
    let ndim = points.first()?.len();
    if n < 2 {
        return None;
    }
    let mut mean = DVector::zeros(ndim);
    for p in points {
        mean += DVector::from_column_slice(p);
    }
    mean /= n as f64;

    let mut cov = DMatrix::zeros(ndim, ndim);
    for p in points {
        let d = DVector::from_column_slice(p) - &mean;
        cov += &d * d.transpose();
    }
    cov /= (n - 1) as f64;
    Some((mean, cov))
}

/// Ellipsoid enclosing a point set in the unit cube
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingEllipsoid {
    center: DVector<f64>,
    /// Maps the unit ball onto the ellipsoid
    axes: DMatrix<f64>,
}

impl BoundingEllipsoid {
    /// Smallest covariance-shaped ellipsoid containing every point, with its
    /// volume multiplied by `enlarge`.
    ///
    /// # Returns
    /// `None` for fewer than two points or a degenerate covariance.
    pub fn from_points(points: &[&[f64]], enlarge: f64) -> Option<Self> {
        let (center, cov) = mean_and_covariance(points)?;
        let ndim = center.len();
        let chol = cov.clone().cholesky()?;

        let max_d2 = points
            .iter()
            .map(|p| {
                let d = DVector::from_column_slice(p) - &center;
                let solved = chol.solve(&d);
                d.dot(&solved)
            })
            .fold(0.0, f64::max);
        if !(max_d2.is_finite() && max_d2 > 0.0) {
            return None;
        }
        let radius_scale = max_d2.sqrt() * enlarge.max(1.0).powf(1.0 / ndim as f64);
        Some(Self {
            center,
            axes: chol.l() * radius_scale,
        })
    }

    pub fn ndim(&self) -> usize {
        self.center.len()
    }

    /// Uniform draw from the ellipsoid
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let point = &self.center + &self.axes * unit_ball_point(rng, self.ndim());
        point.iter().copied().collect()
    }

    pub fn contains(&self, u: &[f64]) -> bool {
        let d = DVector::from_column_slice(u) - &self.center;
        match self.axes.clone().lu().solve(&d) {
            Some(z) => z.norm_squared() <= 1.0 + 1e-12,
            None => false,
        }
    }
}

/// Outcome of one proposal task
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalOutcome {
    /// Accepted candidate, if any draw beat the bound
    pub candidate: Option<Candidate>,
    /// Likelihood evaluations consumed
    pub calls: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
}

/// A proposal ready to be dispatched, built from a live-set snapshot
#[derive(Debug, Clone)]
pub enum Proposal<'a> {
    Uniform,
    Ellipsoid(BoundingEllipsoid),
    Walk {
        reference: &'a [LivePoint],
        walks: usize,
        scale: f64,
        axes: DMatrix<f64>,
    },
}

impl<'a> Proposal<'a> {
    /// Build the proposal for `strategy` from the reference points.
    ///
    /// Ellipsoidal proposals fall back to uniform draws when the reference set
    /// is empty or degenerate. Random walks with a degenerate set step isotropically.
    pub fn build(strategy: ProposalStrategy, reference: &'a [LivePoint], walk_scale: f64) -> Self {
        if reference.is_empty() {
            return Proposal::Uniform;
        }
        let points: Vec<&[f64]> = reference.iter().map(|p| p.u.as_slice()).collect();
        match strategy {
            ProposalStrategy::Uniform => Proposal::Uniform,
            ProposalStrategy::Ellipsoidal { enlarge } => {
                match BoundingEllipsoid::from_points(&points, enlarge) {
                    Some(ellipsoid) => Proposal::Ellipsoid(ellipsoid),
                    None => Proposal::Uniform,
                }
            }
            ProposalStrategy::RandomWalk { walks } => {
                let ndim = points.first().map_or(0, |p| p.len());
                let axes = mean_and_covariance(&points)
                    .and_then(|(_, cov)| cov.cholesky())
                    .map(|chol| chol.l())
                    .unwrap_or_else(|| DMatrix::identity(ndim, ndim) * 0.1);
                Proposal::Walk {
                    reference,
                    walks: walks.max(1),
                    scale: walk_scale,
                    axes,
                }
            }
        }
    }

    /// Run one proposal task against `bound`.
    ///
    /// # Arguments
    /// * `likelihood` - Likelihood to evaluate candidates with
    /// * `ndim` - Dimension of the unit cube
    /// * `bound` - Candidates must have a log-likelihood strictly above this
    /// * `seed`, `serial` - Select the proposal's random stream
    pub fn propose<L: Likelihood + ?Sized>(
        &self,
        likelihood: &L,
        ndim: usize,
        bound: f64,
        seed: u64,
        serial: u64,
    ) -> ProposalOutcome {
        let mut rng = proposal_rng(seed, serial);
        match self {
            Proposal::Uniform => draw_until(likelihood, bound, serial, || {
                Some((0..ndim).map(|_| rng.random::<f64>()).collect())
            }),
            Proposal::Ellipsoid(ellipsoid) => draw_until(likelihood, bound, serial, || {
                (0..MAX_CUBE_REDRAWS)
                    .map(|_| ellipsoid.sample(&mut rng))
                    .find(|u| in_unit_cube(u))
            }),
            Proposal::Walk {
                reference,
                walks,
                scale,
                axes,
            } => walk(likelihood, reference, *walks, *scale, axes, bound, serial, &mut rng),
        }
    }
}

fn draw_until<L, F>(likelihood: &L, bound: f64, serial: u64, mut draw: F) -> ProposalOutcome
where
    L: Likelihood + ?Sized,
    F: FnMut() -> Option<Vec<f64>>,
{
    let mut calls = 0;
    while calls < MAX_ATTEMPTS {
        let Some(u) = draw() else { break };
        calls += 1;
        let evaluation = likelihood.evaluate(&u);
        if evaluation.log_l > bound {
            return ProposalOutcome {
                candidate: Some(Candidate {
                    u,
                    v: evaluation.values,
                    log_l: evaluation.log_l,
                    serial,
                }),
                calls,
                accepted_steps: 0,
                rejected_steps: 0,
            };
        }
    }
    ProposalOutcome {
        candidate: None,
        calls,
        accepted_steps: 0,
        rejected_steps: 0,
    }
}

#[allow(clippy::too_many_arguments)]
fn walk<L: Likelihood + ?Sized>(
    likelihood: &L,
    reference: &[LivePoint],
    walks: usize,
    scale: f64,
    axes: &DMatrix<f64>,
    bound: f64,
    serial: u64,
    rng: &mut ChaCha8Rng,
) -> ProposalOutcome {
    let mut outcome = ProposalOutcome {
        candidate: None,
        calls: 0,
        accepted_steps: 0,
        rejected_steps: 0,
    };
    if reference.is_empty() {
        return outcome;
    }
    let start = &reference[rng.random_range(0..reference.len())];
    let ndim = start.u.len();
    let mut current = Candidate {
        u: start.u.clone(),
        v: start.v.clone(),
        log_l: start.log_l,
        serial,
    };

    for _ in 0..walks {
        let step = axes * unit_ball_point(rng, ndim) * scale;
        let trial: Vec<f64> = current.u.iter().zip(step.iter()).map(|(u, s)| u + s).collect();
        if !in_unit_cube(&trial) {
            outcome.rejected_steps += 1;
            continue;
        }
        outcome.calls += 1;
        let evaluation = likelihood.evaluate(&trial);
        if evaluation.log_l > bound {
            outcome.accepted_steps += 1;
            current = Candidate {
                u: trial,
                v: evaluation.values,
                log_l: evaluation.log_l,
                serial,
            };
        } else {
            outcome.rejected_steps += 1;
        }
    }

    if outcome.accepted_steps > 0 && current.log_l > bound {
        outcome.candidate = Some(current);
    }
    outcome
}
