//! # fedprivacy - Federated Averaging with Differential Privacy
//!
//! Simulates the federated-learning round protocol:
//! - **Partitioning**: non-IID label-sorted shards per client
//! - **Clients**: local SGD with gradient clipping and calibrated Gaussian noise
//! - **Coordinator**: client sampling, weighted aggregation, broadcast, evaluation
//! - **Privacy**: Gaussian mechanism and composition-aware noise scale
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedprivacy::config::FederationConfig;
//! use fedprivacy::data::{Dataset, Sample};
//! use fedprivacy::federated::Coordinator;
//! use fedprivacy::model::LinearClassifier;
//! use rand::SeedableRng;
//!
//! #[tokio::main]
//! async fn main() -> fedprivacy::Result<()> {
//!     let train: Dataset = (0..300)
//!         .map(|i| Sample::new(vec![(i % 3) as f32, 1.0], i % 3))
//!         .collect::<Vec<_>>()
//!         .into();
//!     let test = train.samples().to_vec();
//!
//!     let config = FederationConfig { num_clients: 5, participation_fraction: 0.6, ..Default::default() };
//!     let model = LinearClassifier::new(2, 3, &mut rand::rngs::StdRng::seed_from_u64(0));
//!     let mut coordinator = Coordinator::with_partitioned(model, &train, vec![test], config)?;
//!
//!     let report = coordinator.run_round().await?;
//!     println!("round {} accuracy {:.3}", report.round, report.accuracy);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod federated;
pub mod model;
pub mod privacy;
pub mod telemetry;

pub use crate::core::error::{Error, Result};
