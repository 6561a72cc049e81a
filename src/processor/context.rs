use crate::computation::{ComputationError, ComputationErrorKind, ComputationResult};
use crate::config::EngineConfig;
use crate::engine::JacsServiceEngine;
use crate::models::{JacsServiceData, ServiceSubmission};
use crate::persistence::PersistenceError;
use crate::state_machine::JacsServiceState;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Execution slot held by a running service.
///
/// A composite service gives its slot back while it waits for its children and takes a new one
/// before resuming, so parents can never starve their own children of slots.
#[derive(Debug)]
pub struct ExecutionSlot {
    semaphore: Option<Arc<Semaphore>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl ExecutionSlot {
    pub fn held(semaphore: Arc<Semaphore>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            semaphore: Some(semaphore),
            permit: Mutex::new(Some(permit)),
        }
    }

    /// A slot outside any concurrency limit
    pub fn unbounded() -> Self {
        Self {
            semaphore: None,
            permit: Mutex::new(None),
        }
    }

    pub fn is_held(&self) -> bool {
        self.permit.lock().is_some()
    }

    /// Give the permit back; returns false if none was held
    pub fn release(&self) -> bool {
        self.permit.lock().take().is_some()
    }

    pub async fn reacquire(&self) -> ComputationResult<()> {
        let Some(semaphore) = &self.semaphore else {
            return Ok(());
        };
        if self.is_held() {
            return Ok(());
        }
        let permit = semaphore.clone().acquire_owned().await.map_err(|_| {
            ComputationError::new(ComputationErrorKind::Engine(
                "execution slots are closed".to_string(),
            ))
        })?;
        *self.permit.lock() = Some(permit);
        Ok(())
    }
}

/// Everything a processor may use while handling one service
#[derive(Clone)]
pub struct ServiceContext {
    engine: JacsServiceEngine,
    slot: Arc<ExecutionSlot>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub fn new(engine: JacsServiceEngine, slot: Arc<ExecutionSlot>) -> Self {
        Self { engine, slot }
    }

    pub fn engine(&self) -> &JacsServiceEngine {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub fn slot(&self) -> &ExecutionSlot {
        &self.slot
    }

    /// Working directory of `service`, e.g. `<workspace>/<name>_<id>`
    pub fn working_directory(&self, service: &JacsServiceData) -> PathBuf {
        service.working_directory(self.config().engine.default_working_dir.as_deref())
    }

    /// Abort with a cancellation error if the persisted record has been canceled
    pub async fn ensure_not_canceled(&self, service: &JacsServiceData) -> ComputationResult<()> {
        let current = self
            .engine
            .persistence()
            .find_by_id(service.id)
            .await?
            .ok_or(PersistenceError::NotFound(service.id))?;
        if current.state == JacsServiceState::Canceled {
            return Err(ComputationError::canceled("service was canceled"));
        }
        Ok(())
    }

    /// Submit a child of `parent`, inheriting owner, location and workspace unless overridden
    pub async fn submit_child(
        &self,
        parent: &JacsServiceData,
        mut submission: ServiceSubmission,
    ) -> ComputationResult<JacsServiceData> {
        submission.parent_service_id = Some(parent.id);
        if submission.owner.is_none() {
            submission.owner = Some(parent.owner.clone());
        }
        if submission.processing_location.is_none() {
            submission.processing_location = Some(parent.processing_location);
        }
        if submission.workspace.is_none() {
            submission.workspace = parent.workspace.clone();
        }
        Ok(self.engine.submit_single_service(submission).await?)
    }

    /// Wait until every child is terminal, releasing the execution slot meanwhile.
    ///
    /// Fails with `ChildFailed` if any child ended in error, otherwise with `ChildCanceled` if
    /// any was canceled. Returns the terminal child records in the given order.
    pub async fn wait_for_children(
        &self,
        parent: &JacsServiceData,
        children: &[JacsServiceData],
    ) -> ComputationResult<Vec<JacsServiceData>> {
        if children.is_empty() {
            return Ok(Vec::new());
        }

        let released = self.slot.release();
        debug!(
            service_id = %parent.id,
            children = children.len(),
            released,
            "⏳ PROCESSOR: Waiting for child services"
        );
        let outcomes = futures::future::join_all(
            children
                .iter()
                .map(|child| self.engine.wait_for_completion(child.id)),
        )
        .await;
        if released {
            self.slot.reacquire().await?;
        }

        let finished = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;

        if let Some(failed) = finished
            .iter()
            .find(|c| c.state == JacsServiceState::Error)
        {
            return Err(ComputationError::new(ComputationErrorKind::ChildFailed {
                child_id: failed.id,
                child_name: failed.name.clone(),
                reason: failed
                    .last_event()
                    .map(|e| e.value.clone())
                    .unwrap_or_else(|| "unknown error".to_string()),
            }));
        }
        if let Some(canceled) = finished
            .iter()
            .find(|c| c.state == JacsServiceState::Canceled)
        {
            return Err(ComputationError::new(ComputationErrorKind::ChildCanceled {
                child_id: canceled.id,
                child_name: canceled.name.clone(),
            }));
        }
        Ok(finished)
    }
}
