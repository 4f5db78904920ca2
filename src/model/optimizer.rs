//! Stochastic gradient descent with momentum.

use crate::core::{ParameterState, Result};

/// SGD with heavy-ball momentum: `v = μ·v + g`, `p -= lr·v`.
#[derive(Clone, Debug)]
pub struct Sgd {
    pub learning_rate: f32,
    pub momentum: f32,
    velocity: Option<ParameterState>,
}

impl Sgd {
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: None,
        }
    }

    /// Apply one step to `params` using `grads`.
    pub fn step(&mut self, params: &mut ParameterState, grads: &ParameterState) -> Result<()> {
        if self.momentum == 0.0 {
            return params.axpy(-self.learning_rate, grads);
        }

        let velocity = self.velocity.get_or_insert_with(|| grads.zeros_like());
        velocity.scale(self.momentum);
        velocity.axpy(1.0, grads)?;
        params.axpy(-self.learning_rate, velocity)
    }

    /// Forget accumulated momentum.
    pub fn reset(&mut self) {
        self.velocity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tensor;

    fn single(value: f32) -> ParameterState {
        let mut state = ParameterState::new();
        state.insert("w", Tensor::from_vec(&[1], vec![value]).unwrap());
        state
    }

    fn value(state: &ParameterState) -> f32 {
        state.get("w").unwrap().data()[0]
    }

    #[test]
    fn test_plain_sgd() {
        let mut params = single(1.0);
        let mut sgd = Sgd::new(0.5, 0.0);
        sgd.step(&mut params, &single(2.0)).unwrap();
        assert!((value(&params) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut params = single(0.0);
        let mut sgd = Sgd::new(1.0, 0.9);
        sgd.step(&mut params, &single(1.0)).unwrap();
        assert!((value(&params) + 1.0).abs() < 1e-6);
        // v = 0.9 * 1 + 1 = 1.9
        sgd.step(&mut params, &single(1.0)).unwrap();
        assert!((value(&params) + 2.9).abs() < 1e-6);

        sgd.reset();
        sgd.step(&mut params, &single(1.0)).unwrap();
        assert!((value(&params) + 3.9).abs() < 1e-6);
    }
}
