//! Error handling - hierarchical errors for the trading pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error taxonomy.
///
/// `Validation` and `Venue` are recoverable within a cycle; a
/// `ReconciliationAnomaly` is surfaced to the operator and never
/// silently corrected.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed plan or intent - discarded, logged, cycle continues
    #[error("Validation error: {0}")]
    Validation(String),

    /// Venue submission/cancel call failed
    #[error("Venue error: {0}")]
    Venue(String),

    /// Venue call exceeded its bounded timeout
    #[error("Venue timeout: {0}")]
    VenueTimeout(String),

    /// Fill for an unknown/terminal order, or overfill
    #[error("Reconciliation anomaly: {0}")]
    ReconciliationAnomaly(String),

    /// Network/IO errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem errors (ledger, config)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}
