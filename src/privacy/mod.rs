//! Differential Privacy Module
//!
//! Provides the noise primitives used by clients:
//! - Norm clipping to bound sensitivity
//! - Gaussian mechanism calibrated to (ε, δ)
//! - Composition-aware ("tight") noise scale

pub mod mechanism;
pub mod params;

pub use mechanism::{
    calibrated_gaussian_noise, clip, clip_in_place, gaussian_mechanism, gaussian_sigma,
    tight_gaussian, tight_gaussian_sigma,
};
pub use params::{round_sensitivity, PrivacyParams, PrivacyTarget};
