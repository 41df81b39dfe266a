//! Error types for Trueno-Train
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Train error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (fatal at construction, never retried)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid argument to a ledger or query operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Data store unavailable or returned an unusable response
    #[error("Data fetch failed: {0}")]
    DataFetch(String),

    /// Data store returned fewer records than were requested
    #[error("Data store returned {returned} of {requested} requested records\nCheck that the identifier universe has not changed since partitioning.")]
    MissingRecords {
        /// Number of identifiers requested
        requested: usize,
        /// Number of records actually returned
        returned: usize,
    },

    /// A processing stage rejected a sample
    #[error("Processing failed for sample {index}: {reason}")]
    Processing {
        /// Position of the sample within its batch
        index: usize,
        /// Stage-provided failure reason
        reason: String,
    },

    /// Model backend train/evaluate step failed (fatal, halts the loop)
    #[error("Model backend error: {0}")]
    Backend(String),

    /// Operation not allowed in the trainer's current state
    #[error("Cannot {operation} while trainer is {state}")]
    InvalidState {
        /// Current trainer state
        state: String,
        /// Rejected operation
        operation: &'static str,
    },

    /// Experiment record asked to move to a status its lifecycle forbids
    #[error("Experiment cannot move from {from} to {to}")]
    InvalidTransition {
        /// Persisted status
        from: String,
        /// Requested status
        to: String,
    },

    /// Experiment metadata/metrics write failed (idempotent, retry-safe)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Checkpoint could not be appended after all retries
    #[error("Checkpoint append failed after {attempts} attempt(s): {reason}\nThe checkpoint was NOT recorded.")]
    CheckpointAppend {
        /// Number of attempts made
        attempts: u32,
        /// Last failure reason
        reason: String,
    },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
