//! Differential privacy primitives.
//!
//! Clipping and noising are separate functions so the same sensitivity math
//! serves per-gradient noising and per-round parameter noising. Nothing here
//! holds state; randomness is always passed in by the caller.

use crate::core::{Error, Result, Tensor};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Rescale `update` so that its flattened p-norm does not exceed `clip_bound`.
///
/// Returns `update / max(1, ‖update‖_p / clip_bound)`. An update already inside
/// the bound is returned unchanged. `clip_bound > 0` and `p >= 1` are caller
/// contracts.
pub fn clip(update: &Tensor, clip_bound: f32, p: f32) -> Tensor {
    let mut clipped = update.clone();
    clip_in_place(&mut clipped, clip_bound, p);
    clipped
}

/// In-place variant of [`clip`].
pub fn clip_in_place(update: &mut Tensor, clip_bound: f32, p: f32) {
    debug_assert!(clip_bound > 0.0, "clip bound must be positive");
    debug_assert!(p >= 1.0, "norm order must be at least 1");

    let divisor = (update.norm(p) / clip_bound).max(1.0);
    if divisor > 1.0 {
        update.scale(1.0 / divisor);
    }
}

/// Zero-mean Gaussian noise with standard deviation `sigma_multiplier * sensitivity`.
pub fn calibrated_gaussian_noise<R: Rng + ?Sized>(
    shape: &[usize],
    sensitivity: f64,
    sigma_multiplier: f64,
    rng: &mut R,
) -> Result<Tensor> {
    let std_dev = sigma_multiplier * sensitivity;
    let mut noise = Tensor::zeros(shape);
    add_gaussian(noise.data_mut(), std_dev, rng)?;
    Ok(noise)
}

/// Noise scale of the classic Gaussian mechanism for an L2 sensitivity of `clip_bound`:
/// `σ = clip_bound · sqrt(2 ln(1.25/δ)) / ε`.
pub fn gaussian_sigma(clip_bound: f64, epsilon: f64, delta: f64) -> f64 {
    clip_bound * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon
}

/// Clip `value` to `clip_bound` in L2 and add `N(0, σ²)` noise with σ from
/// [`gaussian_sigma`].
///
/// Satisfies (ε, δ)-DP for a single release. Composing several releases is the
/// caller's responsibility.
pub fn gaussian_mechanism<R: Rng + ?Sized>(
    value: &Tensor,
    clip_bound: f32,
    epsilon: f64,
    delta: f64,
    rng: &mut R,
) -> Result<Tensor> {
    check_budget(epsilon, delta)?;
    if clip_bound <= 0.0 {
        return Err(Error::precondition(format!(
            "clip bound must be positive, got {clip_bound}"
        )));
    }

    let mut released = clip(value, clip_bound, 2.0);
    let sigma = gaussian_sigma(clip_bound as f64, epsilon, delta);
    add_gaussian(released.data_mut(), sigma, rng)?;
    Ok(released)
}

/// Composition-aware noise scale for `T` adaptive releases at sampling rate `q`
/// (moments-accountant style bound):
///
/// `σ = c2 · S² · q · sqrt(T · ln(1/δ)) / ε`
///
/// This is a formula, not a mechanism. Multiply it into a noise sampler.
pub fn tight_gaussian_sigma(
    sensitivity: f64,
    c2: f64,
    sample_rate: f64,
    rounds: u64,
    delta: f64,
    epsilon: f64,
) -> f64 {
    let sigma = c2 * sample_rate * (rounds as f64 * (1.0 / delta).ln()).sqrt() / epsilon;
    sigma * sensitivity * sensitivity
}

/// Add noise scaled by [`tight_gaussian_sigma`] to `data`.
#[allow(clippy::too_many_arguments)]
pub fn tight_gaussian<R: Rng + ?Sized>(
    data: &Tensor,
    sensitivity: f64,
    c2: f64,
    sample_rate: f64,
    rounds: u64,
    delta: f64,
    epsilon: f64,
    rng: &mut R,
) -> Result<Tensor> {
    check_budget(epsilon, delta)?;
    let sigma = tight_gaussian_sigma(sensitivity, c2, sample_rate, rounds, delta, epsilon);
    let mut released = data.clone();
    add_gaussian(released.data_mut(), sigma, rng)?;
    Ok(released)
}

fn check_budget(epsilon: f64, delta: f64) -> Result<()> {
    if !(epsilon > 0.0) {
        return Err(Error::precondition(format!(
            "epsilon must be positive, got {epsilon}"
        )));
    }
    if !(delta > 0.0 && delta < 1.0) {
        return Err(Error::precondition(format!(
            "delta must lie in (0, 1), got {delta}"
        )));
    }
    Ok(())
}

fn add_gaussian<R: Rng + ?Sized>(out: &mut [f32], std_dev: f64, rng: &mut R) -> Result<()> {
    if std_dev == 0.0 {
        return Ok(());
    }
    let normal = Normal::new(0.0f64, std_dev)?;
    for x in out.iter_mut() {
        *x += normal.sample(rng) as f32;
    }
    Ok(())
}
