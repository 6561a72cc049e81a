//! In-memory service store backed by a concurrent map.
//!
//! Every operation completes under the map's shard lock, so a write is visible to the next read
//! as soon as it returns. Records live for the lifetime of the process.

use super::{JacsServiceDataPersistence, PersistenceError, PersistenceResult, StateUpdate};
use crate::models::{JacsServiceData, ServiceId};
use crate::state_machine::JacsServiceState;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InMemoryServiceDataPersistence {
    records: Arc<DashMap<ServiceId, JacsServiceData>>,
}

impl InMemoryServiceDataPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl JacsServiceDataPersistence for InMemoryServiceDataPersistence {
    async fn create(&self, data: &JacsServiceData) -> PersistenceResult<()> {
        match self.records.entry(data.id) {
            Entry::Occupied(_) => Err(PersistenceError::AlreadyExists(data.id)),
            Entry::Vacant(slot) => {
                slot.insert(data.clone());
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: ServiceId) -> PersistenceResult<Option<JacsServiceData>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_child_services(
        &self,
        parent_id: ServiceId,
    ) -> PersistenceResult<Vec<JacsServiceData>> {
        let child_ids = match self.records.get(&parent_id) {
            Some(parent) => parent.child_service_ids.clone(),
            None => return Err(PersistenceError::NotFound(parent_id)),
        };
        Ok(child_ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn find_by_states(
        &self,
        states: &[JacsServiceState],
    ) -> PersistenceResult<Vec<JacsServiceData>> {
        let mut found: Vec<JacsServiceData> = self
            .records
            .iter()
            .filter(|r| states.contains(&r.state))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn add_child_service(
        &self,
        parent_id: ServiceId,
        child_id: ServiceId,
    ) -> PersistenceResult<()> {
        let mut parent = self
            .records
            .get_mut(&parent_id)
            .ok_or(PersistenceError::NotFound(parent_id))?;
        if parent.add_child(child_id) {
            parent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_state(
        &self,
        id: ServiceId,
        expected: JacsServiceState,
        update: StateUpdate,
    ) -> PersistenceResult<JacsServiceData> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;
        if record.state != expected {
            return Err(PersistenceError::ConcurrentModification {
                service_id: id,
                expected,
                actual: record.state,
            });
        }
        // Apply to a copy so a rejected update leaves the stored record untouched
        let mut updated = record.value().clone();
        update.apply_to(&mut updated, Utc::now())?;
        *record = updated.clone();
        Ok(updated)
    }

    async fn count_by_state(&self) -> PersistenceResult<HashMap<JacsServiceState, u64>> {
        let mut counts = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
