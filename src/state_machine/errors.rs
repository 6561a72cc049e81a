use super::states::JacsServiceState;
use crate::persistence::PersistenceError;
use thiserror::Error;

/// Error types for service state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event '{event}'")]
    InvalidTransition {
        from: JacsServiceState,
        event: &'static str,
    },

    #[error("Service {0} not found")]
    ServiceNotFound(String),

    #[error("Gave up after {attempts} concurrent modifications of service {service_id}")]
    TooManyConflicts { service_id: String, attempts: usize },

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl StateMachineError {
    /// The transition was rejected because the service already sits in a state that does not
    /// accept the event, typically a terminal one.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
