//! Simulation configuration.
//!
//! Configuration is plain serde data so it can come from a JSON file or be
//! built in code. `validate` rejects every invalid setting up front instead of
//! coercing it.

use crate::core::{Error, Result};
use crate::federated::client::UpdateMode;
use crate::federated::coordinator::Weighting;
use crate::model::LossFn;
use crate::privacy::{PrivacyParams, PrivacyTarget};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Local training hyperparameters shared by every client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Learning rate
    pub learning_rate: f32,
    /// Local epochs per round
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// SGD momentum in parameter mode (gradient mode always uses plain SGD)
    pub momentum: f32,
    /// Training loss
    pub loss: LossFn,
    /// Whether clients release parameters or gradients
    pub mode: UpdateMode,
    /// Clipping and noise settings
    pub privacy: PrivacyParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epochs: 1,
            batch_size: 32,
            momentum: 0.9,
            loss: LossFn::CrossEntropy,
            mode: UpdateMode::Parameters,
            privacy: PrivacyParams::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::precondition(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(Error::precondition("epochs must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::precondition("batch size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::precondition(format!(
                "momentum must lie in [0, 1), got {}",
                self.momentum
            )));
        }
        self.privacy.validate()
    }
}

/// Coordinator-level settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Number of clients
    pub num_clients: usize,
    /// Share of clients selected each round, in (0, 1]
    pub participation_fraction: f64,
    /// Seed for selection, per-client shuffling and noise
    pub seed: u64,
    /// Client hyperparameters
    pub client: ClientConfig,
    /// Normalisation of aggregation weights; `None` picks the mode's default
    pub weighting: Option<Weighting>,
    /// Per-client deadline for one local pass
    pub client_timeout_ms: Option<u64>,
    /// Optional privacy target the noise multiplier must satisfy
    pub target: Option<PrivacyTarget>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            num_clients: 10,
            participation_fraction: 0.5,
            seed: 0,
            client: ClientConfig::default(),
            weighting: None,
            client_timeout_ms: None,
            target: None,
        }
    }
}

impl FederationConfig {
    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective weighting: `Population` for parameter updates and
    /// `Participants` for gradient updates unless set explicitly.
    pub fn weighting(&self) -> Weighting {
        self.weighting.unwrap_or(match self.client.mode {
            UpdateMode::Parameters => Weighting::Population,
            UpdateMode::Gradients => Weighting::Participants,
        })
    }

    pub fn client_timeout(&self) -> Option<Duration> {
        self.client_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_clients == 0 {
            return Err(Error::precondition("at least one client is required"));
        }
        validate_fraction(self.participation_fraction)?;
        if self.client_timeout_ms == Some(0) {
            return Err(Error::precondition("client timeout must be positive"));
        }
        self.client.validate()?;
        if let Some(target) = &self.target {
            self.client
                .privacy
                .check_target(target, self.participation_fraction)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_fraction(fraction: f64) -> Result<()> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(Error::precondition(format!(
            "participation fraction must lie in (0, 1], got {fraction}"
        )));
    }
    Ok(())
}
