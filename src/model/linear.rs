//! Multinomial logistic regression.

use crate::core::{Error, ParameterState, Result, Tensor};
use crate::data::Sample;
use crate::model::dense::Dense;
use crate::model::{LossFn, TrainableModel};
use rand::Rng;

/// Single linear layer producing class scores (`linear.weight`, `linear.bias`).
#[derive(Clone, Debug)]
pub struct LinearClassifier {
    linear: Dense,
}

impl LinearClassifier {
    /// Create a randomly initialised classifier.
    pub fn new<R: Rng + ?Sized>(num_features: usize, num_classes: usize, rng: &mut R) -> Self {
        Self {
            linear: Dense::new(num_features, num_classes, rng),
        }
    }

    /// Create from explicit weights (`[classes, features]`) and bias.
    pub fn from_weights(weight: Tensor, bias: Tensor) -> Result<Self> {
        if weight.shape().len() != 2 || bias.shape() != [weight.shape()[0]] {
            return Err(Error::precondition(format!(
                "incompatible weight {:?} and bias {:?}",
                weight.shape(),
                bias.shape()
            )));
        }
        Ok(Self {
            linear: Dense { weight, bias },
        })
    }
}

impl TrainableModel for LinearClassifier {
    fn input_dim(&self) -> usize {
        self.linear.inputs()
    }

    fn output_dim(&self) -> usize {
        self.linear.outputs()
    }

    fn forward(&self, features: &[f32]) -> Vec<f32> {
        self.linear.forward(features)
    }

    fn backward(&self, batch: &[Sample], loss: LossFn) -> Result<(f32, ParameterState)> {
        let mut grad_w = Tensor::zeros(self.linear.weight.shape());
        let mut grad_b = Tensor::zeros(self.linear.bias.shape());
        let mut total = 0.0;

        for sample in batch {
            if sample.features.len() != self.input_dim() {
                return Err(Error::precondition(format!(
                    "expected {} features, got {}",
                    self.input_dim(),
                    sample.features.len()
                )));
            }
            let outputs = self.linear.forward(&sample.features);
            let (l, grad_out) = loss.evaluate(&outputs, sample.label)?;
            total += l;
            self.linear
                .accumulate(&sample.features, &grad_out, &mut grad_w, &mut grad_b);
        }

        let n = batch.len().max(1) as f32;
        grad_w.scale(1.0 / n);
        grad_b.scale(1.0 / n);

        let mut grads = ParameterState::new();
        grads.insert("linear.weight", grad_w);
        grads.insert("linear.bias", grad_b);
        Ok((total / n, grads))
    }

    fn parameters(&self) -> ParameterState {
        let mut state = ParameterState::new();
        self.linear.export("linear", &mut state);
        state
    }

    fn set_parameters(&mut self, state: &ParameterState) -> Result<()> {
        self.parameters().check_layout(state)?;
        self.linear.import("linear", state)
    }
}
