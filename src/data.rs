//! Labeled datasets used for partitioning, local training and evaluation.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One labeled row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Input features
    pub features: Vec<f32>,
    /// Class label
    pub label: usize,
}

impl Sample {
    pub fn new(features: Vec<f32>, label: usize) -> Self {
        Self { features, label }
    }
}

/// Row-addressable labeled data.
///
/// Loading, cleaning and encoding happen outside the crate; anything that can
/// answer these queries can be partitioned across clients.
pub trait DataSource {
    /// Number of rows.
    fn len(&self) -> usize;

    /// Feature vector of row `index`.
    fn features(&self, index: usize) -> &[f32];

    /// Label of row `index`.
    fn label(&self, index: usize) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the given rows out, in order.
    fn select(&self, indices: &[usize]) -> Result<Vec<Sample>> {
        indices
            .iter()
            .map(|&i| {
                if i >= self.len() {
                    return Err(Error::precondition(format!(
                        "row {i} out of range for dataset of {} rows",
                        self.len()
                    )));
                }
                Ok(Sample::new(self.features(i).to_vec(), self.label(i)))
            })
            .collect()
    }
}

/// In-memory dataset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Feature dimension of the first row, 0 when empty.
    pub fn feature_dim(&self) -> usize {
        self.samples.first().map(|s| s.features.len()).unwrap_or(0)
    }

    /// One more than the largest label.
    pub fn num_classes(&self) -> usize {
        self.samples.iter().map(|s| s.label + 1).max().unwrap_or(0)
    }
}

impl DataSource for Dataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn features(&self, index: usize) -> &[f32] {
        &self.samples[index].features
    }

    fn label(&self, index: usize) -> usize {
        self.samples[index].label
    }
}

impl From<Vec<Sample>> for Dataset {
    fn from(samples: Vec<Sample>) -> Self {
        Self::new(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        Dataset::new(vec![
            Sample::new(vec![0.0, 1.0], 0),
            Sample::new(vec![1.0, 0.0], 2),
            Sample::new(vec![1.0, 1.0], 1),
        ])
    }

    #[test]
    fn test_dataset_queries() {
        let data = toy();
        assert_eq!(data.len(), 3);
        assert_eq!(data.feature_dim(), 2);
        assert_eq!(data.num_classes(), 3);
        assert_eq!(data.label(1), 2);
        assert_eq!(data.features(2), &[1.0, 1.0]);
    }

    #[test]
    fn test_select_rows() {
        let data = toy();
        let rows = data.select(&[2, 0]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, 1);
        assert_eq!(rows[1].label, 0);
        assert!(data.select(&[3]).is_err());
    }
}
