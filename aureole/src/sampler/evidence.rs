//! Running evidence and information accumulator.
//!
//! Each dead point shrinks the prior volume by `n / (n + 1)`, where `n` is the
//! live-point count at its death, and contributes `L_i (X_{i-1} - X_i)` to the
//! evidence. The information `H` (KL divergence of posterior from prior)
//! gives the evidence uncertainty `sqrt(H / n)`.

use serde::{Deserialize, Serialize};

/// `ln(e^a + e^b)` without overflow
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Serde adapter storing `-inf` as `null`, since JSON has no infinities
pub(crate) mod neg_inf_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        value.is_finite().then_some(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

/// Evidence `ln Z`, information `H` and current log prior volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAccumulator {
    #[serde(with = "neg_inf_as_null")]
    pub log_z: f64,
    pub information: f64,
    pub log_vol: f64,
}

impl Default for EvidenceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceAccumulator {
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    /// Accumulator whose first shell starts at log prior volume `log_vol`,
    /// for runs where only part of the prior has a finite likelihood
    pub fn starting_at(log_vol: f64) -> Self {
        Self {
            log_z: f64::NEG_INFINITY,
            information: 0.0,
            log_vol,
        }
    }

    /// Record the death of a point at `log_l` with `n_live` live points.
    ///
    /// # Returns
    /// `(log_vol, log_wt)`: the log prior volume after the shell and the
    /// point's log importance weight.
    pub fn add(&mut self, log_l: f64, n_live: usize) -> (f64, f64) {
        let n = n_live as f64;
        let log_dvol = self.log_vol - (n + 1.0).ln();
        let log_wt = log_l + log_dvol;
        let log_z_new = log_add_exp(self.log_z, log_wt);

        let mut information = (log_wt - log_z_new).exp() * log_l - log_z_new;
        if self.log_z.is_finite() {
            information += (self.log_z - log_z_new).exp() * (self.information + self.log_z);
        }

        self.information = information;
        self.log_z = log_z_new;
        self.log_vol += (n / (n + 1.0)).ln();
        (self.log_vol, log_wt)
    }

    /// Statistical uncertainty of `ln Z` for a run with `n_live` live points
    pub fn log_z_err(&self, n_live: usize) -> f64 {
        (self.information.max(0.0) / n_live.max(1) as f64).sqrt()
    }
}
