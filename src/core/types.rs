//! Common types used across fedprivacy modules.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;

/// SHA3-256 digest; displays as lowercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// SHA3-256 over the concatenation of `chunks`.
pub fn sha3_digest(chunks: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash256::new(bytes)
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Dense row-major array of `f32` with an explicit shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        let numel = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; numel],
        }
    }

    /// Build a tensor from raw data; the element count must match the shape.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(Error::precondition(format!(
                "tensor shape {:?} needs {} elements, got {}",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Flattened p-norm, `(Σ|x|^p)^(1/p)`.
    pub fn norm(&self, p: f32) -> f32 {
        if p == 2.0 {
            return self.data.iter().map(|x| x * x).sum::<f32>().sqrt();
        }
        self.data
            .iter()
            .map(|x| x.abs().powf(p))
            .sum::<f32>()
            .powf(1.0 / p)
    }

    /// Multiply every element by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for x in &mut self.data {
            *x *= factor;
        }
    }

    /// `self += alpha * other`. Shapes must match.
    pub fn axpy(&mut self, alpha: f32, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::AggregationShape {
                detail: format!("shape {:?} vs {:?}", self.shape, other.shape),
            });
        }
        for (x, y) in self.data.iter_mut().zip(other.data.iter()) {
            *x += alpha * y;
        }
        Ok(())
    }

    /// True when no element is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

/// Named parameter tensors of a model (`name -> tensor`).
///
/// Cloning is a deep copy; a received state never aliases its sender.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    tensors: BTreeMap<String, Tensor>,
}

impl ParameterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a named tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.tensors.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.tensors.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Tensor)> {
        self.tensors.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total element count across all tensors.
    pub fn numel(&self) -> usize {
        self.tensors.values().map(Tensor::numel).sum()
    }

    /// Same names and shapes, every element zero.
    pub fn zeros_like(&self) -> Self {
        Self {
            tensors: self
                .tensors
                .iter()
                .map(|(name, t)| (name.clone(), Tensor::zeros(t.shape())))
                .collect(),
        }
    }

    /// Check that `other` has exactly the same parameter names and shapes.
    pub fn check_layout(&self, other: &ParameterState) -> Result<()> {
        if self.tensors.len() != other.tensors.len() {
            return Err(Error::AggregationShape {
                detail: format!(
                    "expected {} parameters, got {}",
                    self.tensors.len(),
                    other.tensors.len()
                ),
            });
        }
        for (name, tensor) in &self.tensors {
            match other.tensors.get(name) {
                None => {
                    return Err(Error::AggregationShape {
                        detail: format!("missing parameter '{name}'"),
                    })
                }
                Some(t) if t.shape() != tensor.shape() => {
                    return Err(Error::AggregationShape {
                        detail: format!(
                            "parameter '{name}' has shape {:?}, expected {:?}",
                            t.shape(),
                            tensor.shape()
                        ),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// `self += alpha * other`, parameter by parameter.
    pub fn axpy(&mut self, alpha: f32, other: &ParameterState) -> Result<()> {
        self.check_layout(other)?;
        for (name, tensor) in self.tensors.iter_mut() {
            if let Some(o) = other.tensors.get(name) {
                tensor.axpy(alpha, o)?;
            }
        }
        Ok(())
    }

    /// Multiply every tensor by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for tensor in self.tensors.values_mut() {
            tensor.scale(factor);
        }
    }

    /// True when every tensor is finite.
    pub fn is_finite(&self) -> bool {
        self.tensors.values().all(Tensor::is_finite)
    }
}

impl FromIterator<(String, Tensor)> for ParameterState {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}
