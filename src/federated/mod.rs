//! Federated Learning Module
//!
//! Provides the round protocol with differentially private clients:
//! - Non-IID shard partitioning of a labeled dataset
//! - Client local updates with clipping and Gaussian noise
//! - Coordinator selection, weighted aggregation and broadcast
//! - Global-state checkpoints

pub mod checkpoint;
pub mod client;
pub mod coordinator;
pub mod partition;

pub use checkpoint::Checkpoint;
pub use client::{Client, ClientPhase, ClientUpdate, LocalTask, UpdateMode};
pub use coordinator::{Coordinator, DroppedClient, RoundReport, Weighting};
pub use partition::{partition, shards_per_client, Partition, PartitionStats};
