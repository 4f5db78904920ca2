//! Error types for fedprivacy.

use thiserror::Error;

/// Result type alias for fedprivacy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the federated protocol.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Precondition violated: {0}")]
    Precondition(String),

    // Per-client training errors
    #[error("Numeric instability on client {client_id}: {detail}")]
    NumericInstability { client_id: usize, detail: String },

    #[error("Client {client_id} did not return within the round deadline")]
    ClientTimeout { client_id: usize },

    #[error("Client {client_id} task aborted: {detail}")]
    ClientAborted { client_id: usize, detail: String },

    // Round errors
    #[error("Aggregation shape mismatch: {detail}")]
    AggregationShape { detail: String },

    #[error("No client update survived round {round}")]
    NoSurvivingUpdates { round: u64 },

    // Persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a precondition failure.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Whether this failure only removes one client from the current round.
    ///
    /// The coordinator drops such clients and aggregates the rest; every other
    /// error aborts the round before broadcast.
    pub fn is_client_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NumericInstability { .. }
                | Error::ClientTimeout { .. }
                | Error::ClientAborted { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<rand_distr::NormalError> for Error {
    fn from(err: rand_distr::NormalError) -> Self {
        Error::Precondition(format!("invalid normal distribution: {err}"))
    }
}
