//! Serializable sampler state.
//!
//! Everything the sampling loop needs to continue lives in [`SamplerState`]:
//! the live set, the dead points recorded so far, the evidence accumulator,
//! the pending proposal queue and every counter that feeds the random
//! streams. Restoring a state and continuing is equivalent to never having
//! stopped.

use super::evidence::EvidenceAccumulator;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Why a run stopped before meeting its stopping criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    MaxIterations,
    MaxCalls,
    WallClock,
    /// No proposal beat the likelihood bound within the attempt budget
    ProposalExhausted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::MaxIterations => "iteration limit reached",
            FailureReason::MaxCalls => "likelihood call limit reached",
            FailureReason::WallClock => "wall-clock limit reached",
            FailureReason::ProposalExhausted => "proposals failed to improve on the bound",
        };
        f.write_str(text)
    }
}

/// Lifecycle of a sampling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerStatus {
    Initialized,
    Sampling,
    Converged,
    Failed(FailureReason),
}

impl SamplerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SamplerStatus::Converged | SamplerStatus::Failed(_))
    }
}

/// A member of the active population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePoint {
    /// Unit-cube coordinates
    pub u: Vec<f64>,
    /// Full physical parameter vector
    pub v: Vec<f64>,
    pub log_l: f64,
    /// Insertion serial; the earliest-born point loses likelihood ties
    pub birth: u64,
}

/// A point removed from the live set, with its evidence bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadPoint {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub log_l: f64,
    /// Live-point count when this point died
    pub n_live: usize,
    /// Log prior volume after this point's shell
    pub log_vol: f64,
    /// Log importance weight `log L + log ΔX`
    pub log_wt: f64,
}

/// A proposed replacement waiting in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub log_l: f64,
    /// Serial of the proposal that produced this candidate
    pub serial: u64,
}

/// Complete, resumable state of one nested-sampling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerState {
    pub ndim: usize,
    /// Target live-point count
    pub n_live: usize,
    /// Seed of the proposal random streams
    pub seed: u64,
    pub status: SamplerStatus,
    pub live: Vec<LivePoint>,
    pub dead: Vec<DeadPoint>,
    pub evidence: EvidenceAccumulator,
    pub queue: VecDeque<Candidate>,
    pub iteration: u64,
    /// Likelihood evaluations so far
    pub calls: u64,
    /// Next proposal serial (selects the random stream)
    pub next_serial: u64,
    /// Next live-point birth serial
    pub next_birth: u64,
    /// Adaptive random-walk step scale
    pub walk_scale: f64,
    /// Consecutive queue refills that produced no usable candidate
    pub empty_refills: u32,
    /// Lower likelihood bound of a batch run; `None` for a run from the prior
    pub log_l_low: Option<f64>,
    /// Likelihood at which a batch run stops; `None` to use the evidence criterion
    pub log_l_high: Option<f64>,
    /// Wall-clock seconds spent in previous sessions
    pub elapsed_s: f64,
    /// Log prior volume with a finite likelihood, estimated while drawing
    /// the initial live set; evidence shells start from here
    pub log_vol_init: f64,
    /// Digest of the data and priors the run was started against
    pub fingerprint: Option<String>,
}

impl SamplerState {
    /// Index of the live point to replace next: lowest likelihood, earliest
    /// birth on ties.
    pub fn worst_index(&self) -> Option<usize> {
        self.live
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.log_l.total_cmp(&b.log_l).then(a.birth.cmp(&b.birth)))
            .map(|(i, _)| i)
    }

    /// Highest likelihood in the live set
    pub fn max_live_log_l(&self) -> f64 {
        self.live
            .iter()
            .map(|p| p.log_l)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Estimated `ln(Z_remaining / Z)`: live-set upper bound against the
    /// accumulated evidence.
    pub fn log_remaining_ratio(&self) -> f64 {
        if !self.evidence.log_z.is_finite() {
            return f64::INFINITY;
        }
        self.max_live_log_l() + self.evidence.log_vol - self.evidence.log_z
    }

    /// Check the structural consistency of a restored state
    pub fn validate(&self) -> Result<(), String> {
        if self.live.len() != self.n_live && !self.status.is_terminal() {
            return Err(format!(
                "live set holds {} points, expected {}",
                self.live.len(),
                self.n_live
            ));
        }
        let bad_dim = self
            .live
            .iter()
            .map(|p| p.u.len())
            .chain(self.dead.iter().map(|p| p.u.len()))
            .chain(self.queue.iter().map(|c| c.u.len()))
            .any(|len| len != self.ndim);
        if bad_dim {
            return Err(format!("point dimension differs from ndim {}", self.ndim));
        }
        if self.live.iter().any(|p| !p.log_l.is_finite()) {
            return Err("live point with non-finite likelihood".to_string());
        }
        if !(self.log_vol_init.is_finite() && self.log_vol_init <= 0.0) {
            return Err(format!("invalid initial log volume {}", self.log_vol_init));
        }
        if !(self.walk_scale.is_finite() && self.walk_scale > 0.0) {
            return Err(format!("invalid random-walk scale {}", self.walk_scale));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(log_l: f64, birth: u64) -> LivePoint {
        LivePoint {
            u: vec![0.5],
            v: vec![0.5],
            log_l,
            birth,
        }
    }

    fn state(live_points: Vec<LivePoint>) -> SamplerState {
        SamplerState {
            ndim: 1,
            n_live: live_points.len(),
            seed: 1,
            status: SamplerStatus::Sampling,
            live: live_points,
            dead: Vec::new(),
            evidence: EvidenceAccumulator::new(),
            queue: VecDeque::new(),
            iteration: 0,
            calls: 0,
            next_serial: 0,
            next_birth: 0,
            walk_scale: 1.0,
            empty_refills: 0,
            log_l_low: None,
            log_l_high: None,
            elapsed_s: 0.0,
            log_vol_init: 0.0,
            fingerprint: None,
        }
    }

    #[test]
    fn test_ties_replace_earliest_birth() {
        let s = state(vec![live(-3.0, 7), live(-5.0, 4), live(-5.0, 2), live(-1.0, 0)]);
        assert_eq!(s.worst_index(), Some(2));
    }

    #[test]
    fn test_state_survives_json() {
        let mut s = state(vec![live(-3.0, 0), live(-2.0, 1)]);
        s.queue.push_back(Candidate {
            u: vec![0.25],
            v: vec![0.25],
            log_l: -2.5,
            serial: 9,
        });
        let json = serde_json::to_string(&s).unwrap();
        let restored: SamplerState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, s);
        restored.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_wrong_dimension() {
        let mut s = state(vec![live(-3.0, 0), live(-2.0, 1)]);
        s.live[1].u.push(0.1);
        assert!(s.validate().is_err());
    }
}
