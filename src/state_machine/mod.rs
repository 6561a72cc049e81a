// State machine for the service lifecycle
//
// created -> queued -> running -> success | error | canceled, with error and canceled also
// reachable from created and queued. Transitions are compare-and-set updates on the store.

pub mod errors;
pub mod events;
pub mod service_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::ServiceEvent;
pub use service_state_machine::{determine_target_state, ServiceStateMachine};
pub use states::JacsServiceState;
