//! Privacy parameters and their validation.

use crate::core::{Error, Result};
use crate::privacy::mechanism::tight_gaussian_sigma;
use serde::{Deserialize, Serialize};

/// Per-client privacy configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyParams {
    /// Clip bound `C` applied to gradients (and to gradient releases).
    pub clip_bound: f32,
    /// Noise multiplier `σ` applied to the round sensitivity in parameter mode.
    pub noise_multiplier: f64,
    /// Privacy budget ε for Gaussian-mechanism releases (gradient mode).
    pub epsilon: f64,
    /// Privacy budget δ for Gaussian-mechanism releases (gradient mode).
    pub delta: f64,
    /// Order `p` of the norm used for per-epoch gradient clipping.
    pub norm_order: f32,
}

impl Default for PrivacyParams {
    fn default() -> Self {
        Self {
            clip_bound: 1.0,
            noise_multiplier: 1.0,
            epsilon: 1.0,
            delta: 1e-5,
            norm_order: 2.0,
        }
    }
}

impl PrivacyParams {
    /// Reject configurations that would break the sensitivity bound.
    pub fn validate(&self) -> Result<()> {
        if !(self.clip_bound > 0.0 && self.clip_bound.is_finite()) {
            return Err(Error::precondition(format!(
                "clip bound must be positive and finite, got {}",
                self.clip_bound
            )));
        }
        if !(self.noise_multiplier >= 0.0 && self.noise_multiplier.is_finite()) {
            return Err(Error::precondition(format!(
                "noise multiplier must be non-negative, got {}",
                self.noise_multiplier
            )));
        }
        if !(self.epsilon > 0.0) {
            return Err(Error::precondition(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(Error::precondition(format!(
                "delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        if !(self.norm_order >= 1.0) {
            return Err(Error::precondition(format!(
                "norm order must be at least 1, got {}",
                self.norm_order
            )));
        }
        Ok(())
    }

    /// Check that `σ` meets the composition-aware minimum for `target` at
    /// sampling rate `sample_rate`.
    pub fn check_target(&self, target: &PrivacyTarget, sample_rate: f64) -> Result<()> {
        let required = target.required_noise_multiplier(sample_rate);
        if self.noise_multiplier < required {
            return Err(Error::precondition(format!(
                "noise multiplier {} is below the required {:.4} for ε={}, δ={} over {} rounds",
                self.noise_multiplier, required, target.epsilon, target.delta, target.rounds
            )));
        }
        Ok(())
    }
}

/// Privacy budget the whole run must respect.
///
/// Only the single tight-sigma bound is checked. Accounting composition across
/// rounds beyond that bound is left to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyTarget {
    pub epsilon: f64,
    pub delta: f64,
    /// Number of rounds `T` the budget has to cover.
    pub rounds: u64,
    /// Constant `c2` of the moments-accountant bound.
    pub c2: f64,
}

impl PrivacyTarget {
    /// Minimum noise multiplier for a unit-sensitivity query.
    pub fn required_noise_multiplier(&self, sample_rate: f64) -> f64 {
        tight_gaussian_sigma(1.0, self.c2, sample_rate, self.rounds, self.delta, self.epsilon)
    }
}

/// L2 sensitivity of one client's parameter release after a local pass:
/// `2·lr·C/n + (E−1)·2·lr·C`.
pub fn round_sensitivity(learning_rate: f32, clip_bound: f32, data_size: usize, epochs: usize) -> f64 {
    let lr = learning_rate as f64;
    let clip = clip_bound as f64;
    let first = 2.0 * lr * clip / data_size.max(1) as f64;
    let rest = epochs.saturating_sub(1) as f64 * 2.0 * lr * clip;
    first + rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_validate() {
        assert!(PrivacyParams::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let cases = [
            PrivacyParams { clip_bound: 0.0, ..Default::default() },
            PrivacyParams { clip_bound: -1.0, ..Default::default() },
            PrivacyParams { noise_multiplier: -0.1, ..Default::default() },
            PrivacyParams { epsilon: 0.0, ..Default::default() },
            PrivacyParams { delta: 1.0, ..Default::default() },
            PrivacyParams { norm_order: 0.5, ..Default::default() },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(Error::Precondition(_))),
                "{params:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_round_sensitivity() {
        // Single epoch: only the per-sample term remains.
        let s = round_sensitivity(0.1, 1.0, 100, 1);
        assert!((s - 0.002).abs() < 1e-9);

        let s = round_sensitivity(0.1, 1.0, 100, 3);
        assert!((s - (0.002 + 2.0 * 0.2)).abs() < 1e-7);
    }

    #[test]
    fn test_target_check() {
        let target = PrivacyTarget {
            epsilon: 1.0,
            delta: 1e-5,
            rounds: 100,
            c2: 1.0,
        };
        let required = target.required_noise_multiplier(0.6);

        let enough = PrivacyParams {
            noise_multiplier: required + 0.01,
            ..Default::default()
        };
        assert!(enough.check_target(&target, 0.6).is_ok());

        let weak = PrivacyParams {
            noise_multiplier: required * 0.5,
            ..Default::default()
        };
        assert!(weak.check_target(&target, 0.6).is_err());
    }
}
