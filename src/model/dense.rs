//! Fully connected layer shared by the reference models.

use crate::core::{Error, ParameterState, Result, Tensor};
use rand::Rng;

/// `y = W x + b` with `W` of shape `[outputs, inputs]`.
#[derive(Clone, Debug)]
pub struct Dense {
    pub(crate) weight: Tensor,
    pub(crate) bias: Tensor,
}

impl Dense {
    /// Uniform init in `±1/sqrt(inputs)`.
    pub fn new<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (inputs.max(1) as f32).sqrt();
        let mut weight = Tensor::zeros(&[outputs, inputs]);
        let mut bias = Tensor::zeros(&[outputs]);
        for w in weight.data_mut() {
            *w = rng.gen_range(-bound..=bound);
        }
        for b in bias.data_mut() {
            *b = rng.gen_range(-bound..=bound);
        }
        Self { weight, bias }
    }

    pub fn inputs(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn outputs(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let cols = self.inputs();
        self.weight
            .data()
            .chunks(cols)
            .zip(self.bias.data())
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect()
    }

    /// Accumulate `grad_out ⊗ x` into `grad_w` and `grad_out` into `grad_b`.
    pub fn accumulate(&self, x: &[f32], grad_out: &[f32], grad_w: &mut Tensor, grad_b: &mut Tensor) {
        let cols = self.inputs();
        for (row, &g) in grad_w.data_mut().chunks_mut(cols).zip(grad_out) {
            for (dw, v) in row.iter_mut().zip(x) {
                *dw += g * v;
            }
        }
        for (db, g) in grad_b.data_mut().iter_mut().zip(grad_out) {
            *db += g;
        }
    }

    /// Gradient with respect to the layer input, `Wᵀ grad_out`.
    pub fn input_grad(&self, grad_out: &[f32]) -> Vec<f32> {
        let cols = self.inputs();
        let mut grad_in = vec![0.0; cols];
        for (row, &g) in self.weight.data().chunks(cols).zip(grad_out) {
            for (gi, w) in grad_in.iter_mut().zip(row) {
                *gi += g * w;
            }
        }
        grad_in
    }

    pub fn export(&self, prefix: &str, state: &mut ParameterState) {
        state.insert(format!("{prefix}.weight"), self.weight.clone());
        state.insert(format!("{prefix}.bias"), self.bias.clone());
    }

    pub fn import(&mut self, prefix: &str, state: &ParameterState) -> Result<()> {
        let weight = lookup(state, &format!("{prefix}.weight"), self.weight.shape())?;
        let bias = lookup(state, &format!("{prefix}.bias"), self.bias.shape())?;
        self.weight = weight.clone();
        self.bias = bias.clone();
        Ok(())
    }
}

fn lookup<'a>(state: &'a ParameterState, name: &str, shape: &[usize]) -> Result<&'a Tensor> {
    let tensor = state.get(name).ok_or_else(|| Error::AggregationShape {
        detail: format!("missing parameter '{name}'"),
    })?;
    if tensor.shape() != shape {
        return Err(Error::AggregationShape {
            detail: format!(
                "parameter '{name}' has shape {:?}, expected {:?}",
                tensor.shape(),
                shape
            ),
        });
    }
    Ok(tensor)
}
