use crate::args::ArgumentError;
use crate::error::JacsError;
use crate::models::{JacsServiceData, ServiceId};
use crate::persistence::PersistenceError;
use crate::processor::runner::ExternalProcessError;
use crate::state_machine::StateMachineError;
use thiserror::Error;

/// What went wrong inside a service computation
#[derive(Debug, Error)]
pub enum ComputationErrorKind {
    #[error("argument error: {0}")]
    Argument(#[from] ArgumentError),

    #[error("external process error: {0}")]
    ExternalProcess(#[from] ExternalProcessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("state transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("child service {child_name}:{child_id} failed: {reason}")]
    ChildFailed {
        child_id: ServiceId,
        child_name: String,
        reason: String,
    },

    #[error("child service {child_name}:{child_id} was canceled")]
    ChildCanceled {
        child_id: ServiceId,
        child_name: String,
    },

    #[error("processing error: {0}")]
    Processing(String),

    #[error("engine error: {0}")]
    Engine(String),
}

/// Failure of a service computation, carrying the record of the service that raised it.
///
/// The service is attached once, by the innermost stage that knows it; wrapping an error that
/// already names a service keeps the original.
#[derive(Debug, Error)]
#[error("{}{kind}", service_prefix(.service))]
pub struct ComputationError {
    service: Option<Box<JacsServiceData>>,
    #[source]
    kind: ComputationErrorKind,
}

fn service_prefix(service: &Option<Box<JacsServiceData>>) -> String {
    match service {
        Some(sd) => format!("{}:{}: ", sd.name, sd.id),
        None => String::new(),
    }
}

impl ComputationError {
    pub fn new(kind: impl Into<ComputationErrorKind>) -> Self {
        Self {
            service: None,
            kind: kind.into(),
        }
    }

    pub fn for_service(service: &JacsServiceData, kind: impl Into<ComputationErrorKind>) -> Self {
        Self::new(kind).with_service(service)
    }

    pub fn canceled(reason: impl Into<String>) -> Self {
        Self::new(ComputationErrorKind::Canceled(reason.into()))
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ComputationErrorKind::Processing(message.into()))
    }

    /// Attach the originating service unless one is already recorded
    pub fn with_service(mut self, service: &JacsServiceData) -> Self {
        if self.service.is_none() {
            self.service = Some(Box::new(service.clone()));
        }
        self
    }

    pub fn kind(&self) -> &ComputationErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ComputationErrorKind {
        self.kind
    }

    pub fn service(&self) -> Option<&JacsServiceData> {
        self.service.as_deref()
    }

    /// A deliberate abort rather than a failure; the service ends CANCELED, not ERROR
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.kind,
            ComputationErrorKind::Canceled(_) | ComputationErrorKind::ChildCanceled { .. }
        )
    }

    pub fn is_argument_error(&self) -> bool {
        matches!(self.kind, ComputationErrorKind::Argument(_))
    }
}

macro_rules! impl_from_kind {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for ComputationError {
                fn from(err: $source) -> Self {
                    Self::new(err)
                }
            }
        )*
    };
}

impl_from_kind!(
    ComputationErrorKind,
    ArgumentError,
    ExternalProcessError,
    std::io::Error,
    PersistenceError,
    StateMachineError,
    serde_json::Error,
);

impl From<JacsError> for ComputationError {
    fn from(err: JacsError) -> Self {
        match err {
            JacsError::Computation(inner) => inner,
            JacsError::Argument(e) => Self::new(e),
            JacsError::Persistence(e) => Self::new(e),
            JacsError::StateTransition(e) => Self::new(e),
            other => Self::new(ComputationErrorKind::Engine(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceSubmission;

    #[test]
    fn test_service_attached_once() {
        let first = JacsServiceData::from_submission(ServiceSubmission::new("lsmFileMetadata"));
        let second = JacsServiceData::from_submission(ServiceSubmission::new("archivedLsmMetadata"));

        let err = ComputationError::processing("boom")
            .with_service(&first)
            .with_service(&second);
        assert_eq!(err.service().unwrap().id, first.id);
        assert!(err.to_string().starts_with("lsmFileMetadata:"));
        assert!(err.to_string().ends_with("processing error: boom"));
    }

    #[test]
    fn test_cancellation_kinds() {
        assert!(ComputationError::canceled("by request").is_cancellation());
        let child = ComputationError::new(ComputationErrorKind::ChildCanceled {
            child_id: uuid::Uuid::new_v4(),
            child_name: "fileCopy".to_string(),
        });
        assert!(child.is_cancellation());
        assert!(!ComputationError::processing("x").is_cancellation());
    }

    #[test]
    fn test_from_argument_error() {
        let err: ComputationError = ArgumentError::MissingRequired {
            flag: "-inputLSM".to_string(),
        }
        .into();
        assert!(err.is_argument_error());
        assert!(err.service().is_none());
    }

    #[test]
    fn test_engine_error_unwraps_nested_computation() {
        let nested = JacsError::Computation(ComputationError::canceled("stop"));
        assert!(ComputationError::from(nested).is_cancellation());

        let unknown: ComputationError = JacsError::UnknownService("nope".to_string()).into();
        assert!(matches!(unknown.kind(), ComputationErrorKind::Engine(_)));
    }
}
