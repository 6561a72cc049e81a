//! # Models
//!
//! Persisted records owned by the engine.

pub mod service_data;

pub use service_data::{
    JacsServiceData, JacsServiceEvent, JacsServiceEventType, ProcessingLocation, ServiceId,
    ServiceSubmission,
};
