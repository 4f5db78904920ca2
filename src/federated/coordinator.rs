//! Federated coordinator.
//!
//! Owns the global model, one [`Client`] per partition and the round protocol:
//! select → broadcast → local update → aggregate → broadcast → evaluate.
//! Only the coordinator ever writes the global state; clients get copies.

use crate::config::{validate_fraction, FederationConfig};
use crate::core::{now, Error, ParameterState, Result, Timestamp};
use crate::data::{DataSource, Sample};
use crate::federated::checkpoint::Checkpoint;
use crate::federated::client::{Client, ClientUpdate, LocalTask, UpdateMode};
use crate::federated::partition::partition;
use crate::model::TrainableModel;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Normalisation of the weighted sum.
///
/// Both variants then divide by the realised sampling rate (selected clients
/// over all clients). `Population` assumes the clients left out of the round
/// would have contributed in proportion to their weight. That is a modelling
/// choice, not a law. Parameter updates default to `Population` and gradient
/// updates to `Participants`; see [`FederationConfig::weighting`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    /// `w_i / Σ_all w_j`: unbiased estimate of the full-population average
    #[default]
    Population,
    /// `w_i / Σ_participants w_j`
    Participants,
}

/// A client removed from a round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DroppedClient {
    /// Client ID
    pub client_id: usize,
    /// Why it was dropped
    pub reason: String,
}

/// Summary of one completed round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundReport {
    /// Round number (1-based)
    pub round: u64,
    /// Clients drawn for the round
    pub selected: Vec<usize>,
    /// Clients whose updates were averaged
    pub aggregated: Vec<usize>,
    /// Clients dropped from the round
    pub dropped: Vec<DroppedClient>,
    /// Mean local loss of the aggregated clients
    pub mean_loss: f32,
    /// Pooled held-out accuracy after aggregation
    pub accuracy: f64,
    /// Round start time
    pub started_at: Timestamp,
    /// Wall-clock duration
    pub duration_ms: u64,
}

enum TaskOutcome<M> {
    Finished(M, Result<ClientUpdate>),
    Lost(Error),
}

/// The party that owns the global model and drives rounds.
pub struct Coordinator<M: TrainableModel> {
    global: M,
    clients: Vec<Client<M>>,
    test_sets: Vec<Vec<Sample>>,
    config: FederationConfig,
    rng: StdRng,
    round: u64,
    history: Vec<RoundReport>,
}

impl<M: TrainableModel> Coordinator<M> {
    /// Build a coordinator over pre-partitioned client data.
    pub fn new(
        model: M,
        client_data: Vec<Vec<Sample>>,
        test_sets: Vec<Vec<Sample>>,
        config: FederationConfig,
    ) -> Result<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::assemble(model, client_data, test_sets, config, rng)
    }

    /// Partition `train` non-IID across `config.num_clients` clients and build
    /// the coordinator. The same seeded source drives partitioning and rounds.
    pub fn with_partitioned<D: DataSource + ?Sized>(
        model: M,
        train: &D,
        test_sets: Vec<Vec<Sample>>,
        config: FederationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let assignment = partition(train, config.num_clients, &mut rng)?;
        let client_data = assignment.materialize(train)?;
        Self::assemble(model, client_data, test_sets, config, rng)
    }

    fn assemble(
        model: M,
        client_data: Vec<Vec<Sample>>,
        test_sets: Vec<Vec<Sample>>,
        config: FederationConfig,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        if client_data.len() != config.num_clients {
            return Err(Error::precondition(format!(
                "configured {} clients but got {} partitions",
                config.num_clients,
                client_data.len()
            )));
        }
        if test_sets.iter().all(Vec::is_empty) {
            return Err(Error::precondition("at least one held-out sample is required"));
        }
        for sample in test_sets.iter().flatten() {
            if sample.features.len() != model.input_dim() || sample.label >= model.output_dim() {
                return Err(Error::precondition(
                    "test sample does not fit the model's input or output dimension",
                ));
            }
        }

        let clients = client_data
            .into_iter()
            .enumerate()
            .map(|(id, data)| Client::new(id, model.clone(), data, config.client.clone()))
            .collect::<Result<Vec<_>>>()?;

        let mut coordinator = Self {
            global: model,
            clients,
            test_sets,
            config,
            rng,
            round: 0,
            history: Vec::new(),
        };
        let initial = coordinator.global.parameters();
        coordinator.broadcast(&initial)?;
        Ok(coordinator)
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Completed rounds.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn history(&self) -> &[RoundReport] {
        &self.history
    }

    pub fn clients(&self) -> &[Client<M>] {
        &self.clients
    }

    pub fn client(&self, id: usize) -> Option<&Client<M>> {
        self.clients.get(id)
    }

    pub fn global_model(&self) -> &M {
        &self.global
    }

    /// Copy of the current global state.
    pub fn global_state(&self) -> ParameterState {
        self.global.parameters()
    }

    /// Sum of every client's weight.
    pub fn total_weight(&self) -> f64 {
        self.clients.iter().map(Client::weight).sum()
    }

    /// Change the local learning rate of every client.
    pub fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()> {
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(Error::precondition(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        self.config.client.learning_rate = learning_rate;
        for client in &mut self.clients {
            client.set_learning_rate(learning_rate);
        }
        Ok(())
    }

    /// Draw `⌈fraction · n⌉` distinct client ids (at least one).
    pub fn select_round(&mut self, fraction: f64) -> Result<Vec<usize>> {
        validate_fraction(fraction)?;
        let n = self.clients.len();
        // Guard against 0.6 * 5 = 3.0000000000000004 style rounding.
        let count = ((fraction * n as f64) - 1e-9).ceil().clamp(1.0, n as f64) as usize;
        Ok(rand::seq::index::sample(&mut self.rng, n, count).into_vec())
    }

    /// Push a private copy of `state` to every client.
    pub fn broadcast(&mut self, state: &ParameterState) -> Result<()> {
        for client in &mut self.clients {
            client.receive(state)?;
        }
        Ok(())
    }

    /// Weighted combination of the surviving updates of `selected` clients.
    ///
    /// Each update contributes `w_i / denominator / q`, where `q` is the share
    /// of clients in `selected` and the denominator follows [`Weighting`]. The
    /// denominator never counts clients that were selected but returned nothing. Parameter updates are combined directly;
    /// gradient updates are applied to the current global state with the
    /// clients' learning rate. Returns the new global state without installing it.
    pub fn aggregate(&self, selected: &[usize], updates: &[ClientUpdate]) -> Result<ParameterState> {
        if updates.is_empty() {
            return Err(Error::NoSurvivingUpdates { round: self.round + 1 });
        }

        let global = self.global.parameters();
        let selected_set: HashSet<usize> = selected.iter().copied().collect();
        let mut seen = HashSet::new();
        for update in updates {
            if !selected_set.contains(&update.client_id) || !seen.insert(update.client_id) {
                return Err(Error::AggregationShape {
                    detail: format!(
                        "update from client {} is not a unique member of the selection",
                        update.client_id
                    ),
                });
            }
            if update.mode != self.config.client.mode {
                return Err(Error::AggregationShape {
                    detail: format!(
                        "client {} sent a {:?} update, expected {:?}",
                        update.client_id, update.mode, self.config.client.mode
                    ),
                });
            }
            global.check_layout(&update.state)?;
        }

        let participating: f64 = updates.iter().map(|u| self.weight_of(u.client_id)).sum();
        let denominator = match self.config.weighting() {
            Weighting::Population => {
                let missing: f64 = selected_set
                    .difference(&seen)
                    .map(|&id| self.weight_of(id))
                    .sum();
                self.total_weight() - missing
            }
            Weighting::Participants => participating,
        };
        if !(denominator > 0.0) {
            return Err(Error::precondition("aggregation weights sum to zero"));
        }

        let sample_rate = selected_set.len() as f64 / self.clients.len() as f64;
        let mut combined = global.zeros_like();
        for update in updates {
            let coefficient = self.weight_of(update.client_id) / denominator / sample_rate;
            combined.axpy(coefficient as f32, &update.state)?;
        }

        match self.config.client.mode {
            UpdateMode::Parameters => Ok(combined),
            UpdateMode::Gradients => {
                let mut next = global;
                next.axpy(-self.config.client.learning_rate, &combined)?;
                Ok(next)
            }
        }
    }

    /// Pooled accuracy of the global model on the configured held-out sets.
    pub fn evaluate(&self) -> Result<f64> {
        self.evaluate_on(&self.test_sets)
    }

    /// Pooled accuracy `correct / total` across all `test_sets`.
    pub fn evaluate_on(&self, test_sets: &[Vec<Sample>]) -> Result<f64> {
        pooled_accuracy(&self.global, test_sets)
    }

    /// Run one full round and return its report.
    ///
    /// Local passes of the selected clients run concurrently on blocking
    /// tasks. Aggregation waits for every one of them. Clients that fail
    /// numerically, panic or miss the deadline are dropped; any other error
    /// aborts the round before the global state is touched.
    pub async fn run_round(&mut self) -> Result<RoundReport> {
        let round = self.round + 1;
        let started_at = now();
        let clock = Instant::now();

        let selected = self.select_round(self.config.participation_fraction)?;
        info!(round, selected = ?selected, "round started");

        let global = self.global.parameters();
        self.broadcast(&global)?;

        let mut tasks = Vec::with_capacity(selected.len());
        for &id in &selected {
            let seed: u64 = self.rng.gen();
            tasks.push(self.clients[id].begin(seed));
        }

        let timeout = self.config.client_timeout();
        let outcomes = join_all(tasks.into_iter().map(|task| run_task(task, timeout))).await;

        let mut updates = Vec::with_capacity(selected.len());
        let mut dropped = Vec::new();
        let mut fatal = None;
        for (&id, outcome) in selected.iter().zip(outcomes) {
            let failure = match outcome {
                TaskOutcome::Finished(trained, Ok(update)) => {
                    self.clients[id].finish(trained);
                    updates.push(update);
                    continue;
                }
                TaskOutcome::Finished(_, Err(err)) | TaskOutcome::Lost(err) => err,
            };
            self.clients[id].abandon()?;
            if failure.is_client_recoverable() {
                warn!(round, client = id, error = %failure, "client dropped from round");
                dropped.push(DroppedClient {
                    client_id: id,
                    reason: failure.to_string(),
                });
            } else if fatal.is_none() {
                fatal = Some(failure);
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        // Score a candidate first so a failed round leaves the global model alone.
        let next = self.aggregate(&selected, &updates)?;
        let mut candidate = self.global.clone();
        candidate.set_parameters(&next)?;
        let accuracy = pooled_accuracy(&candidate, &self.test_sets)?;

        self.global = candidate;
        self.broadcast(&next)?;
        self.round = round;

        let mean_loss = updates.iter().map(|u| u.loss).sum::<f32>() / updates.len() as f32;
        let report = RoundReport {
            round,
            selected,
            aggregated: updates.iter().map(|u| u.client_id).collect(),
            dropped,
            mean_loss,
            accuracy,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        info!(
            round,
            aggregated = report.aggregated.len(),
            dropped = report.dropped.len(),
            accuracy,
            "round finished"
        );
        self.history.push(report.clone());
        Ok(report)
    }

    /// Run `rounds` consecutive rounds, stopping at the first error.
    pub async fn train(&mut self, rounds: usize) -> Result<Vec<RoundReport>> {
        let mut reports = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            reports.push(self.run_round().await?);
        }
        Ok(reports)
    }

    /// Snapshot the global state.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.round, self.global.parameters())
    }

    /// Install a checkpointed global state and broadcast it.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.global.set_parameters(&checkpoint.state)?;
        self.broadcast(&checkpoint.state)?;
        self.round = checkpoint.round;
        debug!(round = checkpoint.round, "restored global state");
        Ok(())
    }

    fn weight_of(&self, client_id: usize) -> f64 {
        self.clients.get(client_id).map(Client::weight).unwrap_or(0.0)
    }
}

fn pooled_accuracy<M: TrainableModel>(model: &M, test_sets: &[Vec<Sample>]) -> Result<f64> {
    let mut correct = 0usize;
    let mut total = 0usize;
    for sample in test_sets.iter().flatten() {
        if model.predict(&sample.features) == sample.label {
            correct += 1;
        }
        total += 1;
    }
    if total == 0 {
        return Err(Error::precondition("no held-out samples to evaluate on"));
    }
    Ok(correct as f64 / total as f64)
}

async fn run_task<M: TrainableModel>(task: LocalTask<M>, timeout: Option<Duration>) -> TaskOutcome<M> {
    let client_id = task.client_id();
    let handle = tokio::task::spawn_blocking(move || task.run());
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => return TaskOutcome::Lost(Error::ClientTimeout { client_id }),
        },
        None => handle.await,
    };
    match joined {
        Ok((trained, outcome)) => TaskOutcome::Finished(trained, outcome),
        Err(err) => TaskOutcome::Lost(Error::ClientAborted {
            client_id,
            detail: err.to_string(),
        }),
    }
}
