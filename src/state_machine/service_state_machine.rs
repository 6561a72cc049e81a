use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ServiceEvent,
    states::JacsServiceState,
};
use crate::constants::system::MAX_TRANSITION_ATTEMPTS;
use crate::models::{JacsServiceData, ServiceId};
use crate::persistence::{JacsServiceDataPersistence, PersistenceError, StateUpdate};
use std::sync::Arc;
use tracing::{debug, warn};

/// Determine the target state for `event` fired while a service sits in `current_state`
pub fn determine_target_state(
    current_state: JacsServiceState,
    event: &ServiceEvent,
) -> StateMachineResult<JacsServiceState> {
    let target = match (current_state, event) {
        (JacsServiceState::Created, ServiceEvent::Enqueue) => JacsServiceState::Queued,

        // Running -> Running resumes a service interrupted by a restart
        (JacsServiceState::Queued, ServiceEvent::Start) => JacsServiceState::Running,
        (JacsServiceState::Running, ServiceEvent::Start) => JacsServiceState::Running,

        (JacsServiceState::Running, ServiceEvent::Complete(_)) => JacsServiceState::Success,

        (JacsServiceState::Created, ServiceEvent::Fail(_)) => JacsServiceState::Error,
        (JacsServiceState::Queued, ServiceEvent::Fail(_)) => JacsServiceState::Error,
        (JacsServiceState::Running, ServiceEvent::Fail(_)) => JacsServiceState::Error,

        (JacsServiceState::Created, ServiceEvent::Cancel(_)) => JacsServiceState::Canceled,
        (JacsServiceState::Queued, ServiceEvent::Cancel(_)) => JacsServiceState::Canceled,
        (JacsServiceState::Running, ServiceEvent::Cancel(_)) => JacsServiceState::Canceled,

        (from, _) => {
            return Err(StateMachineError::InvalidTransition {
                from,
                event: event.event_type(),
            })
        }
    };

    Ok(target)
}

/// Applies lifecycle events to persisted service records.
///
/// Every transition is a compare-and-set against the state the record was read in. A lost race
/// re-reads the record and re-evaluates the event against the new state, so a service that
/// became terminal in the meantime rejects the event with `InvalidTransition`.
#[derive(Clone)]
pub struct ServiceStateMachine {
    persistence: Arc<dyn JacsServiceDataPersistence>,
}

impl std::fmt::Debug for ServiceStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceStateMachine").finish_non_exhaustive()
    }
}

impl ServiceStateMachine {
    pub fn new(persistence: Arc<dyn JacsServiceDataPersistence>) -> Self {
        Self { persistence }
    }

    /// Current state of a service
    pub async fn current_state(&self, service_id: ServiceId) -> StateMachineResult<JacsServiceState> {
        self.persistence
            .find_by_id(service_id)
            .await?
            .map(|data| data.state)
            .ok_or_else(|| StateMachineError::ServiceNotFound(service_id.to_string()))
    }

    /// Fire `event` on a service and return the updated record
    pub async fn transition(
        &self,
        service_id: ServiceId,
        event: ServiceEvent,
    ) -> StateMachineResult<JacsServiceData> {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let current_state = self.current_state(service_id).await?;
            let target_state = determine_target_state(current_state, &event)?;

            let mut update = StateUpdate::new(target_state, event.description());
            if let Some(result) = event.result() {
                update = update.with_result(result);
            }

            match self
                .persistence
                .update_state(service_id, current_state, update)
                .await
            {
                Ok(updated) => {
                    debug!(
                        service_id = %service_id,
                        from_state = %current_state,
                        to_state = %target_state,
                        event = event.event_type(),
                        "Service state transition"
                    );
                    return Ok(updated);
                }
                Err(PersistenceError::ConcurrentModification { actual, .. }) => {
                    warn!(
                        service_id = %service_id,
                        expected = %current_state,
                        actual = %actual,
                        attempt,
                        "⚠️ STATE_MACHINE: Lost compare-and-set race, retrying"
                    );
                }
                Err(PersistenceError::NotFound(_)) => {
                    return Err(StateMachineError::ServiceNotFound(service_id.to_string()))
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(StateMachineError::TooManyConflicts {
            service_id: service_id.to_string(),
            attempts: MAX_TRANSITION_ATTEMPTS,
        })
    }

    /// Check if the service is in a terminal state
    pub async fn is_terminal(&self, service_id: ServiceId) -> StateMachineResult<bool> {
        Ok(self.current_state(service_id).await?.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceSubmission;
    use crate::persistence::InMemoryServiceDataPersistence;

    fn complete() -> ServiceEvent {
        ServiceEvent::Complete("\"/out\"".to_string())
    }

    #[test]
    fn test_happy_path_targets() {
        use JacsServiceState::*;
        assert_eq!(determine_target_state(Created, &ServiceEvent::Enqueue).unwrap(), Queued);
        assert_eq!(determine_target_state(Queued, &ServiceEvent::Start).unwrap(), Running);
        assert_eq!(determine_target_state(Running, &ServiceEvent::Start).unwrap(), Running);
        assert_eq!(determine_target_state(Running, &complete()).unwrap(), Success);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let events = [
            ServiceEvent::Enqueue,
            ServiceEvent::Start,
            complete(),
            ServiceEvent::fail_with_error("boom"),
            ServiceEvent::cancel_with_reason("stop"),
        ];
        for state in JacsServiceState::ALL.iter().filter(|s| s.is_terminal()) {
            for event in &events {
                let err = determine_target_state(*state, event).unwrap_err();
                assert!(err.is_invalid_transition(), "{state} accepted {event:?}");
            }
        }
    }

    #[test]
    fn test_complete_requires_running() {
        for state in [JacsServiceState::Created, JacsServiceState::Queued] {
            assert!(determine_target_state(state, &complete()).is_err());
        }
        assert!(determine_target_state(JacsServiceState::Created, &ServiceEvent::Start).is_err());
    }

    #[tokio::test]
    async fn test_transition_persists_result_and_events() {
        let store = Arc::new(InMemoryServiceDataPersistence::new());
        let data = JacsServiceData::from_submission(ServiceSubmission::new("fileCopy"));
        store.create(&data).await.unwrap();
        let machine = ServiceStateMachine::new(store.clone());

        machine.transition(data.id, ServiceEvent::Enqueue).await.unwrap();
        machine.transition(data.id, ServiceEvent::Start).await.unwrap();
        let done = machine.transition(data.id, complete()).await.unwrap();

        assert_eq!(done.state, JacsServiceState::Success);
        assert_eq!(done.stringified_result.as_deref(), Some("\"/out\""));
        assert_eq!(done.events.len(), 4);
        assert!(done.process_start_time.is_some());

        let late = machine
            .transition(data.id, ServiceEvent::cancel_with_reason("too late"))
            .await;
        assert!(matches!(late, Err(StateMachineError::InvalidTransition { .. })));
        assert!(machine.is_terminal(data.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let machine = ServiceStateMachine::new(Arc::new(InMemoryServiceDataPersistence::new()));
        let result = machine
            .transition(uuid::Uuid::new_v4(), ServiceEvent::Enqueue)
            .await;
        assert!(matches!(result, Err(StateMachineError::ServiceNotFound(_))));
    }
}
