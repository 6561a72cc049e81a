use crate::args::ArgumentError;
use crate::computation::ComputationError;
use crate::persistence::PersistenceError;
use crate::state_machine::StateMachineError;
use thiserror::Error;

/// Crate-level error for engine, registry and configuration operations.
///
/// Stage-level failures travel as [`ComputationError`]; everything that crosses the public
/// engine surface is folded into this enum.
#[derive(Debug, Error)]
pub enum JacsError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Argument error: {0}")]
    Argument(#[from] ArgumentError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Computation error: {0}")]
    Computation(#[from] ComputationError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<config::ConfigError> for JacsError {
    fn from(err: config::ConfigError) -> Self {
        JacsError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, JacsError>;
