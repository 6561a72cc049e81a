use super::{ComputationError, ComputationErrorKind, ComputationResult, ServiceComputation};
use crate::error::JacsError;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinError;

/// Creates computations bound to a worker runtime
#[derive(Debug, Clone)]
pub struct ServiceComputationFactory {
    handle: Handle,
}

impl ServiceComputationFactory {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on
    pub fn current() -> Result<Self, JacsError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| JacsError::Engine(format!("no tokio runtime available: {e}")))
    }

    pub fn new_completed_computation<T: Send + 'static>(&self, value: T) -> ServiceComputation<T> {
        ServiceComputation::completed(value)
    }

    pub fn new_failed_computation<T: Send + 'static>(
        &self,
        error: impl Into<ComputationError>,
    ) -> ServiceComputation<T> {
        ServiceComputation::failed(error)
    }

    /// Spawn `future` onto the worker runtime; it runs whether or not the computation is awaited
    pub fn new_computation<T, F>(&self, future: F) -> ServiceComputation<T>
    where
        T: Send + 'static,
        F: Future<Output = ComputationResult<T>> + Send + 'static,
    {
        let handle = self.handle.spawn(future);
        ServiceComputation::from_future(async move { handle.await.unwrap_or_else(join_failure) })
    }

    /// Run a blocking function on the runtime's blocking pool
    pub fn supply<T, F>(&self, f: F) -> ServiceComputation<T>
    where
        T: Send + 'static,
        F: FnOnce() -> ComputationResult<T> + Send + 'static,
    {
        let handle = self.handle.spawn_blocking(f);
        ServiceComputation::from_future(async move { handle.await.unwrap_or_else(join_failure) })
    }
}

fn join_failure<T>(err: JoinError) -> ComputationResult<T> {
    if err.is_cancelled() {
        Err(ComputationError::canceled("worker task was aborted"))
    } else {
        Err(ComputationError::new(ComputationErrorKind::Processing(format!(
            "worker task panicked: {err}"
        ))))
    }
}
