//! Trainable model interface.
//!
//! The federated protocol only sees a model through [`TrainableModel`]:
//! forward evaluation, a gradient-producing backward pass, and get/set of the
//! full named parameter state. Two small reference models are provided for
//! simulations and tests.

pub mod dense;
pub mod linear;
pub mod mlp;
pub mod optimizer;

pub use linear::LinearClassifier;
pub use mlp::Mlp;
pub use optimizer::Sgd;

use crate::core::{Error, ParameterState, Result};
use crate::data::Sample;
use serde::{Deserialize, Serialize};

/// Loss applied to a model's output scores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossFn {
    /// Softmax cross-entropy over class scores
    #[default]
    CrossEntropy,
    /// Mean squared error against the one-hot label
    MeanSquaredError,
}

impl LossFn {
    /// Loss of one sample and its gradient with respect to `outputs`.
    pub fn evaluate(&self, outputs: &[f32], label: usize) -> Result<(f32, Vec<f32>)> {
        if label >= outputs.len() {
            return Err(Error::precondition(format!(
                "label {label} out of range for {} outputs",
                outputs.len()
            )));
        }

        match self {
            LossFn::CrossEntropy => {
                let max = outputs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = outputs.iter().map(|o| (o - max).exp()).collect();
                let sum: f32 = exps.iter().sum();
                let loss = sum.ln() + max - outputs[label];

                let mut grad: Vec<f32> = exps.iter().map(|e| e / sum).collect();
                grad[label] -= 1.0;
                Ok((loss, grad))
            }
            LossFn::MeanSquaredError => {
                let k = outputs.len() as f32;
                let mut loss = 0.0;
                let mut grad = Vec::with_capacity(outputs.len());
                for (i, &o) in outputs.iter().enumerate() {
                    let target = if i == label { 1.0 } else { 0.0 };
                    let err = o - target;
                    loss += err * err / k;
                    grad.push(2.0 * err / k);
                }
                Ok((loss, grad))
            }
        }
    }
}

/// A model the coordinator and clients can train without knowing its architecture.
pub trait TrainableModel: Clone + Send + Sync + 'static {
    /// Expected feature dimension.
    fn input_dim(&self) -> usize;

    /// Number of output scores (classes).
    fn output_dim(&self) -> usize;

    /// Class scores for one feature vector.
    fn forward(&self, features: &[f32]) -> Vec<f32>;

    /// Mean loss over `batch` and the gradient of that mean for every parameter.
    fn backward(&self, batch: &[Sample], loss: LossFn) -> Result<(f32, ParameterState)>;

    /// Deep copy of the full parameter state.
    fn parameters(&self) -> ParameterState;

    /// Replace the parameter state; names and shapes must match.
    fn set_parameters(&mut self, state: &ParameterState) -> Result<()>;

    /// Index of the highest score.
    fn predict(&self, features: &[f32]) -> usize {
        self.forward(features)
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &s)| {
                if s > best.1 {
                    (i, s)
                } else {
                    best
                }
            })
            .0
    }
}
