//! Federated client: private data, a local model replica, and the DP-bounded
//! local update.
//!
//! A client is `Idle` between rounds and `Training` while a local pass is in
//! flight. The pass itself runs on a detached [`LocalTask`] so the coordinator
//! can execute several clients concurrently; raw data never leaves the task.

use crate::config::ClientConfig;
use crate::core::{Error, ParameterState, Result};
use crate::data::Sample;
use crate::model::{Sgd, TrainableModel};
use crate::privacy::{
    calibrated_gaussian_noise, clip_in_place, gaussian_mechanism, gaussian_sigma, round_sensitivity,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What a client releases at the end of its local pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Noised parameter state after local training
    #[default]
    Parameters,
    /// Accumulated gradients released through the Gaussian mechanism
    Gradients,
}

/// Client lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    Idle,
    Training,
}

/// Result of one client's local pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// Client ID
    pub client_id: usize,
    /// Space the update lives in
    pub mode: UpdateMode,
    /// Noised parameters or noised gradients
    pub state: ParameterState,
    /// Aggregation weight (local data size)
    pub weight: f64,
    /// Mean training loss over the pass
    pub loss: f32,
    /// Standard deviation of the noise that was added
    pub noise_std: f64,
}

/// A federated participant.
pub struct Client<M: TrainableModel> {
    id: usize,
    data: Arc<Vec<Sample>>,
    model: M,
    received: ParameterState,
    config: ClientConfig,
    phase: ClientPhase,
}

impl<M: TrainableModel> Client<M> {
    /// Create a client. An empty partition is a setup error.
    pub fn new(id: usize, model: M, data: Vec<Sample>, config: ClientConfig) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::precondition(format!("client {id} has no local data")));
        }
        config.validate()?;
        for sample in &data {
            if sample.features.len() != model.input_dim() {
                return Err(Error::precondition(format!(
                    "client {id}: expected {} features, got {}",
                    model.input_dim(),
                    sample.features.len()
                )));
            }
            if sample.label >= model.output_dim() {
                return Err(Error::precondition(format!(
                    "client {id}: label {} exceeds model outputs {}",
                    sample.label,
                    model.output_dim()
                )));
            }
        }

        let received = model.parameters();
        Ok(Self {
            id,
            data: Arc::new(data),
            model,
            received,
            config,
            phase: ClientPhase::Idle,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// Number of local rows.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Aggregation weight (the partition size).
    pub fn weight(&self) -> f64 {
        self.data.len() as f64
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.config.learning_rate = learning_rate;
    }

    /// Local model replica.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// State received at the start of the round.
    pub fn received_state(&self) -> &ParameterState {
        &self.received
    }

    /// Take a private copy of the global state into both replicas.
    pub fn receive(&mut self, state: &ParameterState) -> Result<()> {
        self.model.set_parameters(state)?;
        self.received = state.clone();
        Ok(())
    }

    /// Start a local pass; the client stays `Training` until
    /// [`finish`](Self::finish) or [`abandon`](Self::abandon).
    pub fn begin(&mut self, seed: u64) -> LocalTask<M> {
        self.phase = ClientPhase::Training;
        LocalTask {
            client_id: self.id,
            model: self.model.clone(),
            data: Arc::clone(&self.data),
            config: self.config.clone(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Adopt the trained replica and return to `Idle`.
    pub fn finish(&mut self, trained: M) {
        self.model = trained;
        self.phase = ClientPhase::Idle;
    }

    /// Discard a failed or late pass: restore the received state and return to `Idle`.
    pub fn abandon(&mut self) -> Result<()> {
        self.phase = ClientPhase::Idle;
        self.model.set_parameters(&self.received)
    }

    /// Run a full local pass in place, in the configured [`UpdateMode`].
    pub fn local_update<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<ClientUpdate> {
        let task = self.begin(rng.gen());
        let (trained, outcome) = task.run();
        match outcome {
            Ok(update) => {
                self.finish(trained);
                Ok(update)
            }
            Err(err) => {
                self.abandon()?;
                Err(err)
            }
        }
    }
}

/// A detached local pass over one client's data.
pub struct LocalTask<M: TrainableModel> {
    client_id: usize,
    model: M,
    data: Arc<Vec<Sample>>,
    config: ClientConfig,
    rng: StdRng,
}

impl<M: TrainableModel> LocalTask<M> {
    pub fn client_id(&self) -> usize {
        self.client_id
    }

    /// Train and release. The model replica is always handed back.
    pub fn run(mut self) -> (M, Result<ClientUpdate>) {
        let outcome = match self.config.mode {
            UpdateMode::Parameters => self.train_parameters(),
            UpdateMode::Gradients => self.train_gradients(),
        };
        if let Ok(update) = &outcome {
            debug!(
                client = self.client_id,
                mode = ?update.mode,
                loss = update.loss,
                noise_std = update.noise_std,
                "local pass finished"
            );
        }
        (self.model, outcome)
    }

    /// Epoch-averaged gradients, clipped per parameter, one optimizer step per
    /// epoch, then Gaussian noise scaled to the round sensitivity.
    fn train_parameters(&mut self) -> Result<ClientUpdate> {
        let cfg = &self.config;
        let mut rows = self.data.as_ref().clone();
        let num_batches = rows.len().div_ceil(cfg.batch_size);
        let mut sgd = Sgd::new(cfg.learning_rate, cfg.momentum);
        let mut total_loss = 0.0;

        for _ in 0..cfg.epochs {
            rows.shuffle(&mut self.rng);
            let mut epoch_grads = self.model.parameters().zeros_like();
            for batch in rows.chunks(cfg.batch_size) {
                let (loss, grads) = self.model.backward(batch, cfg.loss)?;
                self.ensure_finite_loss(loss)?;
                total_loss += loss / num_batches as f32;
                epoch_grads.axpy(1.0 / num_batches as f32, &grads)?;
            }

            for (_, grad) in epoch_grads.iter_mut() {
                clip_in_place(grad, cfg.privacy.clip_bound, cfg.privacy.norm_order);
            }
            self.ensure_finite(&epoch_grads, "gradient")?;

            let mut params = self.model.parameters();
            sgd.step(&mut params, &epoch_grads)?;
            self.model.set_parameters(&params)?;
        }

        let sensitivity = round_sensitivity(
            cfg.learning_rate,
            cfg.privacy.clip_bound,
            rows.len(),
            cfg.epochs,
        );
        let mut released = self.model.parameters();
        for (_, tensor) in released.iter_mut() {
            let noise = calibrated_gaussian_noise(
                tensor.shape(),
                sensitivity,
                cfg.privacy.noise_multiplier,
                &mut self.rng,
            )?;
            tensor.axpy(1.0, &noise)?;
        }
        self.ensure_finite(&released, "parameter")?;
        self.model.set_parameters(&released)?;

        Ok(ClientUpdate {
            client_id: self.client_id,
            mode: UpdateMode::Parameters,
            state: released,
            weight: rows.len() as f64,
            loss: total_loss / cfg.epochs as f32,
            noise_std: sensitivity * cfg.privacy.noise_multiplier,
        })
    }

    /// Plain SGD over every mini-batch while summing the raw gradients; the
    /// sum of each parameter is released through the Gaussian mechanism.
    fn train_gradients(&mut self) -> Result<ClientUpdate> {
        let cfg = &self.config;
        let mut rows = self.data.as_ref().clone();
        let mut sgd = Sgd::new(cfg.learning_rate, 0.0);
        let mut accumulated = self.model.parameters().zeros_like();
        let mut total_loss = 0.0;
        let mut steps = 0usize;

        for _ in 0..cfg.epochs {
            rows.shuffle(&mut self.rng);
            for batch in rows.chunks(cfg.batch_size) {
                let (loss, grads) = self.model.backward(batch, cfg.loss)?;
                self.ensure_finite_loss(loss)?;
                self.ensure_finite(&grads, "gradient")?;
                total_loss += loss;
                steps += 1;

                let mut params = self.model.parameters();
                sgd.step(&mut params, &grads)?;
                self.model.set_parameters(&params)?;
                accumulated.axpy(1.0, &grads)?;
            }
        }

        let mut released = ParameterState::new();
        for (name, grad) in accumulated.iter() {
            let noised = gaussian_mechanism(
                grad,
                cfg.privacy.clip_bound,
                cfg.privacy.epsilon,
                cfg.privacy.delta,
                &mut self.rng,
            )?;
            released.insert(name.clone(), noised);
        }
        self.ensure_finite(&released, "gradient")?;

        Ok(ClientUpdate {
            client_id: self.client_id,
            mode: UpdateMode::Gradients,
            state: released,
            weight: rows.len() as f64,
            loss: total_loss / steps.max(1) as f32,
            noise_std: gaussian_sigma(
                cfg.privacy.clip_bound as f64,
                cfg.privacy.epsilon,
                cfg.privacy.delta,
            ),
        })
    }

    fn ensure_finite_loss(&self, loss: f32) -> Result<()> {
        if !loss.is_finite() {
            return Err(Error::NumericInstability {
                client_id: self.client_id,
                detail: format!("loss is {loss}"),
            });
        }
        Ok(())
    }

    fn ensure_finite(&self, state: &ParameterState, what: &str) -> Result<()> {
        if !state.is_finite() {
            return Err(Error::NumericInstability {
                client_id: self.client_id,
                detail: format!("non-finite {what}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearClassifier;
    use crate::privacy::PrivacyParams;

    fn toy_data() -> Vec<Sample> {
        (0..20)
            .map(|i| {
                let x = i as f32 / 10.0 - 1.0;
                Sample::new(vec![x, -x], usize::from(x > 0.0))
            })
            .collect()
    }

    fn noiseless() -> ClientConfig {
        ClientConfig {
            learning_rate: 0.1,
            epochs: 3,
            batch_size: 4,
            privacy: PrivacyParams {
                noise_multiplier: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn client(config: ClientConfig) -> Client<LinearClassifier> {
        let model = LinearClassifier::new(2, 2, &mut StdRng::seed_from_u64(0));
        Client::new(0, model, toy_data(), config).unwrap()
    }

    #[test]
    fn test_empty_partition_rejected() {
        let model = LinearClassifier::new(2, 2, &mut StdRng::seed_from_u64(0));
        let result = Client::new(4, model, Vec::new(), ClientConfig::default());
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[test]
    fn test_mismatched_features_rejected() {
        let model = LinearClassifier::new(3, 2, &mut StdRng::seed_from_u64(0));
        assert!(Client::new(0, model, toy_data(), ClientConfig::default()).is_err());
    }

    #[test]
    fn test_receive_deep_copies() {
        let mut c = client(noiseless());
        let mut global = c.model().parameters();
        global.get_mut("linear.bias").unwrap().data_mut()[0] = 3.0;

        c.receive(&global).unwrap();
        assert_eq!(c.received_state(), &global);
        assert_eq!(c.model().parameters(), global);

        global.get_mut("linear.bias").unwrap().data_mut()[0] = -9.0;
        assert_eq!(c.received_state().get("linear.bias").unwrap().data()[0], 3.0);
    }

    #[test]
    fn test_parameter_update_changes_model_and_returns_idle() {
        let mut c = client(noiseless());
        let before = c.model().parameters();
        let update = c.local_update(&mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!(c.phase(), ClientPhase::Idle);
        assert_eq!(update.mode, UpdateMode::Parameters);
        assert_eq!(update.weight, 20.0);
        assert_eq!(update.noise_std, 0.0);
        assert_ne!(update.state, before);
        assert_eq!(c.model().parameters(), update.state);
        assert!(before.check_layout(&update.state).is_ok());
    }

    #[test]
    fn test_step_size_bounded_by_clip() {
        let mut config = noiseless();
        config.epochs = 1;
        config.momentum = 0.0;
        config.privacy.clip_bound = 0.01;
        let mut c = client(config);
        let before = c.model().parameters();
        let update = c.local_update(&mut StdRng::seed_from_u64(1)).unwrap();

        for (name, tensor) in update.state.iter() {
            let mut delta = tensor.clone();
            delta.axpy(-1.0, before.get(name).unwrap()).unwrap();
            // One SGD step of a clipped gradient: ‖Δ‖ ≤ lr · C
            assert!(delta.norm(2.0) <= 0.1 * 0.01 * 1.001);
        }
    }

    #[test]
    fn test_noise_is_reproducible_for_seed() {
        let mut config = noiseless();
        config.privacy.noise_multiplier = 1.0;

        let a = client(config.clone())
            .local_update(&mut StdRng::seed_from_u64(5))
            .unwrap();
        let b = client(config.clone())
            .local_update(&mut StdRng::seed_from_u64(5))
            .unwrap();
        let c = client(config)
            .local_update(&mut StdRng::seed_from_u64(6))
            .unwrap();

        assert_eq!(a.state, b.state);
        assert_ne!(a.state, c.state);
        assert!(a.noise_std > 0.0);
    }

    #[test]
    fn test_gradient_mode_releases_clipped_noised_gradients() {
        let mut config = noiseless();
        config.mode = UpdateMode::Gradients;
        config.privacy.epsilon = 1e6;
        let mut c = client(config);
        let update = c.local_update(&mut StdRng::seed_from_u64(2)).unwrap();

        assert_eq!(update.mode, UpdateMode::Gradients);
        assert!(update.noise_std < 1e-4);
        for (_, grad) in update.state.iter() {
            assert!(grad.norm(2.0) <= 1.0 + 1e-3);
        }
    }

    #[test]
    fn test_non_finite_loss_aborts_and_restores() {
        let mut c = client(noiseless());
        let mut poisoned = c.model().parameters();
        poisoned
            .get_mut("linear.weight")
            .unwrap()
            .data_mut()
            .fill(f32::NAN);
        c.receive(&poisoned).unwrap();

        let err = c.local_update(&mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::NumericInstability { client_id: 0, .. }));
        assert_eq!(c.phase(), ClientPhase::Idle);
    }

    #[test]
    fn test_begin_marks_training() {
        let mut c = client(noiseless());
        let task = c.begin(9);
        assert_eq!(c.phase(), ClientPhase::Training);
        assert_eq!(task.client_id(), 0);
        let (trained, outcome) = task.run();
        assert!(outcome.is_ok());
        c.finish(trained);
        assert_eq!(c.phase(), ClientPhase::Idle);
    }

    #[test]
    fn test_received_state_survives_training() {
        let mut c = client(noiseless());
        let global = c.model().parameters();
        c.receive(&global).unwrap();
        c.local_update(&mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(c.received_state(), &global);
    }
}
