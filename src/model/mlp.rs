//! One-hidden-layer perceptron with ReLU activation.

use crate::core::{Error, ParameterState, Result, Tensor};
use crate::data::Sample;
use crate::model::dense::Dense;
use crate::model::{LossFn, TrainableModel};
use rand::Rng;

/// Default hidden width.
pub const DEFAULT_HIDDEN: usize = 200;

#[derive(Clone, Debug)]
pub struct Mlp {
    hidden: Dense,
    output: Dense,
}

impl Mlp {
    pub fn new<R: Rng + ?Sized>(num_features: usize, num_classes: usize, rng: &mut R) -> Self {
        Self::with_hidden(num_features, DEFAULT_HIDDEN, num_classes, rng)
    }

    pub fn with_hidden<R: Rng + ?Sized>(
        num_features: usize,
        hidden: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            hidden: Dense::new(num_features, hidden, rng),
            output: Dense::new(hidden, num_classes, rng),
        }
    }

    fn hidden_activations(&self, features: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let pre = self.hidden.forward(features);
        let act = pre.iter().map(|z| z.max(0.0)).collect();
        (pre, act)
    }
}

impl TrainableModel for Mlp {
    fn input_dim(&self) -> usize {
        self.hidden.inputs()
    }

    fn output_dim(&self) -> usize {
        self.output.outputs()
    }

    fn forward(&self, features: &[f32]) -> Vec<f32> {
        let (_, act) = self.hidden_activations(features);
        self.output.forward(&act)
    }

    fn backward(&self, batch: &[Sample], loss: LossFn) -> Result<(f32, ParameterState)> {
        let mut grad_hw = Tensor::zeros(self.hidden.weight.shape());
        let mut grad_hb = Tensor::zeros(self.hidden.bias.shape());
        let mut grad_ow = Tensor::zeros(self.output.weight.shape());
        let mut grad_ob = Tensor::zeros(self.output.bias.shape());
        let mut total = 0.0;

        for sample in batch {
            if sample.features.len() != self.input_dim() {
                return Err(Error::precondition(format!(
                    "expected {} features, got {}",
                    self.input_dim(),
                    sample.features.len()
                )));
            }
            let (pre, act) = self.hidden_activations(&sample.features);
            let outputs = self.output.forward(&act);
            let (l, grad_out) = loss.evaluate(&outputs, sample.label)?;
            total += l;

            self.output.accumulate(&act, &grad_out, &mut grad_ow, &mut grad_ob);
            let grad_hidden: Vec<f32> = self
                .output
                .input_grad(&grad_out)
                .into_iter()
                .zip(&pre)
                .map(|(g, &z)| if z > 0.0 { g } else { 0.0 })
                .collect();
            self.hidden
                .accumulate(&sample.features, &grad_hidden, &mut grad_hw, &mut grad_hb);
        }

        let scale = 1.0 / batch.len().max(1) as f32;
        let mut grads = ParameterState::new();
        for (name, mut g) in [
            ("hidden.weight", grad_hw),
            ("hidden.bias", grad_hb),
            ("output.weight", grad_ow),
            ("output.bias", grad_ob),
        ] {
            g.scale(scale);
            grads.insert(name, g);
        }
        Ok((total * scale, grads))
    }

    fn parameters(&self) -> ParameterState {
        let mut state = ParameterState::new();
        self.hidden.export("hidden", &mut state);
        self.output.export("output", &mut state);
        state
    }

    fn set_parameters(&mut self, state: &ParameterState) -> Result<()> {
        self.parameters().check_layout(state)?;
        self.hidden.import("hidden", state)?;
        self.output.import("output", state)
    }
}
