//! # Service Data Persistence
//!
//! The store of [`JacsServiceData`] records is the single source of truth shared by the
//! dispatcher, the processors and every external reader. Two properties matter:
//!
//! - **Read-after-write**: once a write returns, every subsequent read observes it. Waiters are
//!   only notified after the write that made a service terminal has returned.
//! - **Compare-and-set transitions**: [`JacsServiceDataPersistence::update_state`] applies a
//!   state change only if the record is still in the expected state, so two writers can never
//!   both move a service out of the same state.
//!
//! Implementations:
//!
//! - [`InMemoryServiceDataPersistence`] - concurrent map, used by tests and the CLI
//! - [`PgServiceDataPersistence`] - PostgreSQL via sqlx (feature `postgres`)

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryServiceDataPersistence;
#[cfg(feature = "postgres")]
pub use postgres::PgServiceDataPersistence;

use crate::models::{JacsServiceData, JacsServiceEvent, JacsServiceEventType, ServiceId};
use crate::state_machine::JacsServiceState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Error type for persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Service {0} not found")]
    NotFound(ServiceId),

    #[error("Service {0} already exists")]
    AlreadyExists(ServiceId),

    #[error("Concurrent modification of service {service_id}: expected {expected}, found {actual}")]
    ConcurrentModification {
        service_id: ServiceId,
        expected: JacsServiceState,
        actual: JacsServiceState,
    },

    #[error("Result of service {0} is already set")]
    ResultAlreadySet(ServiceId),

    #[error("Invalid record data: {0}")]
    InvalidData(String),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// A state change to apply atomically to one record
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub to_state: JacsServiceState,
    pub event: JacsServiceEvent,
    /// Only accepted together with `success`, and only if no result is set yet
    pub result: Option<String>,
}

impl StateUpdate {
    pub fn new(to_state: JacsServiceState, description: impl Into<String>) -> Self {
        Self {
            to_state,
            event: JacsServiceEvent::new(JacsServiceEventType::for_state(to_state), description),
            result: None,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Apply this update to an in-memory copy of the record after the expected-state check.
    ///
    /// Shared by every implementation so they agree on result immutability and on when the
    /// process start time is stamped.
    pub fn apply_to(
        &self,
        data: &mut JacsServiceData,
        now: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        if let Some(result) = &self.result {
            if self.to_state != JacsServiceState::Success {
                return Err(PersistenceError::InvalidData(format!(
                    "a result can only be stored with the success state, not {}",
                    self.to_state
                )));
            }
            if data.stringified_result.is_some() {
                return Err(PersistenceError::ResultAlreadySet(data.id));
            }
            data.stringified_result = Some(result.clone());
        }
        if self.to_state == JacsServiceState::Running && data.process_start_time.is_none() {
            data.process_start_time = Some(now);
        }
        data.state = self.to_state;
        data.events.push(self.event.clone());
        data.updated_at = now;
        Ok(())
    }
}

/// CRUD storage for service records
#[async_trait]
pub trait JacsServiceDataPersistence: Send + Sync + 'static {
    /// Persist a new record
    async fn create(&self, data: &JacsServiceData) -> PersistenceResult<()>;

    async fn find_by_id(&self, id: ServiceId) -> PersistenceResult<Option<JacsServiceData>>;

    /// Children of a service, in submission order
    async fn find_child_services(&self, parent_id: ServiceId)
        -> PersistenceResult<Vec<JacsServiceData>>;

    /// Records currently in any of `states`, oldest first
    async fn find_by_states(
        &self,
        states: &[JacsServiceState],
    ) -> PersistenceResult<Vec<JacsServiceData>>;

    /// Append a child to the parent's ordered child list; a no-op if already linked
    async fn add_child_service(
        &self,
        parent_id: ServiceId,
        child_id: ServiceId,
    ) -> PersistenceResult<()>;

    /// Compare-and-set state update: applied only if the record is in `expected`
    async fn update_state(
        &self,
        id: ServiceId,
        expected: JacsServiceState,
        update: StateUpdate,
    ) -> PersistenceResult<JacsServiceData>;

    /// Number of records per state
    async fn count_by_state(&self) -> PersistenceResult<HashMap<JacsServiceState, u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceSubmission;

    #[test]
    fn test_apply_success_sets_result_once() {
        let mut data = JacsServiceData::from_submission(ServiceSubmission::new("x"));
        data.state = JacsServiceState::Running;

        let update = StateUpdate::new(JacsServiceState::Success, "done").with_result("\"/out\"");
        update.apply_to(&mut data, Utc::now()).unwrap();
        assert_eq!(data.stringified_result.as_deref(), Some("\"/out\""));
        assert_eq!(data.last_event().unwrap().name, JacsServiceEventType::Completed);

        let again = update.apply_to(&mut data, Utc::now());
        assert!(matches!(again, Err(PersistenceError::ResultAlreadySet(_))));
    }

    #[test]
    fn test_result_rejected_outside_success() {
        let mut data = JacsServiceData::from_submission(ServiceSubmission::new("x"));
        let update = StateUpdate::new(JacsServiceState::Error, "boom").with_result("\"/out\"");
        assert!(matches!(
            update.apply_to(&mut data, Utc::now()),
            Err(PersistenceError::InvalidData(_))
        ));
        assert!(data.stringified_result.is_none());
        assert_eq!(data.state, JacsServiceState::Created);
    }

    #[test]
    fn test_running_stamps_start_time_once() {
        let mut data = JacsServiceData::from_submission(ServiceSubmission::new("x"));
        let first = Utc::now();
        StateUpdate::new(JacsServiceState::Running, "start")
            .apply_to(&mut data, first)
            .unwrap();
        StateUpdate::new(JacsServiceState::Running, "resume")
            .apply_to(&mut data, first + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(data.process_start_time, Some(first));
    }
}
