//! # Service Computations
//!
//! A [`ServiceComputation`] is a deferred value that resolves to either a `T` or a
//! [`ComputationError`]. Stages of a service pipeline are chained with short-circuiting
//! combinators: once a computation has failed, `then_*` steps are skipped and the error travels
//! unchanged to the first `exceptionally` handler or to whoever awaits the result.
//!
//! Computations are lazy; work starts when one is awaited or when it is created through
//! [`ServiceComputationFactory::new_computation`], which spawns it onto the worker runtime.
//!
//! ```rust,no_run
//! use jacs_services::computation::ServiceComputationFactory;
//!
//! # async fn example() {
//! let factory = ServiceComputationFactory::current().unwrap();
//! let length = factory
//!     .new_completed_computation("/data/out.json".to_string())
//!     .then_apply(|path| path.len())
//!     .await
//!     .unwrap();
//! assert_eq!(length, 14);
//! # }
//! ```

pub mod errors;
pub mod factory;

pub use errors::{ComputationError, ComputationErrorKind};
pub use factory::ServiceComputationFactory;

use futures::future::{BoxFuture, FutureExt};
use std::future::{Future, IntoFuture};

pub type ComputationResult<T> = Result<T, ComputationError>;

/// Composable asynchronous result of a service stage
#[must_use = "computations do nothing unless awaited or spawned"]
pub struct ServiceComputation<T> {
    inner: BoxFuture<'static, ComputationResult<T>>,
}

impl<T> std::fmt::Debug for ServiceComputation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceComputation").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ServiceComputation<T> {
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = ComputationResult<T>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    pub fn completed(value: T) -> Self {
        Self::from_future(futures::future::ready(Ok(value)))
    }

    pub fn failed(error: impl Into<ComputationError>) -> Self {
        Self::from_future(futures::future::ready(Err(error.into())))
    }

    /// Map the successful value
    pub fn then_apply<U, F>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        ServiceComputation::from_future(self.inner.map(|result| result.map(f)))
    }

    /// Map the successful value with a step that may itself fail
    pub fn then_try_apply<U, F>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ComputationResult<U> + Send + 'static,
    {
        ServiceComputation::from_future(self.inner.map(|result| result.and_then(f)))
    }

    /// Chain a dependent computation
    pub fn then_compose<U, F>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ServiceComputation<U> + Send + 'static,
    {
        ServiceComputation::from_future(async move {
            let value = self.inner.await?;
            f(value).inner.await
        })
    }

    /// Recover from a failure with a replacement value
    pub fn exceptionally<F>(self, handler: F) -> Self
    where
        F: FnOnce(ComputationError) -> T + Send + 'static,
    {
        Self::from_future(self.inner.map(|result| Ok(result.unwrap_or_else(handler))))
    }

    /// Transform the error while leaving successes untouched
    pub fn map_err<F>(self, f: F) -> Self
    where
        F: FnOnce(ComputationError) -> ComputationError + Send + 'static,
    {
        Self::from_future(self.inner.map(|result| result.map_err(f)))
    }

    /// Observe the outcome without changing it
    pub fn when_complete<F>(self, f: F) -> Self
    where
        F: FnOnce(&ComputationResult<T>) + Send + 'static,
    {
        Self::from_future(self.inner.map(|result| {
            f(&result);
            result
        }))
    }

    /// Wait for the outcome
    pub async fn get(self) -> ComputationResult<T> {
        self.inner.await
    }
}

impl<T> IntoFuture for ServiceComputation<T> {
    type Output = ComputationResult<T>;
    type IntoFuture = BoxFuture<'static, ComputationResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_then_apply_skipped_after_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let result = ServiceComputation::<u32>::failed(ComputationError::processing("first"))
            .then_apply(move |v| {
                flag.store(true, Ordering::SeqCst);
                v + 1
            })
            .await;

        assert!(!ran.load(Ordering::SeqCst));
        assert!(result.unwrap_err().to_string().contains("first"));
    }

    #[tokio::test]
    async fn test_then_compose_and_try_apply() {
        let value = ServiceComputation::completed(2u32)
            .then_compose(|v| ServiceComputation::completed(v * 10))
            .then_try_apply(|v| {
                if v > 10 {
                    Ok(v.to_string())
                } else {
                    Err(ComputationError::processing("too small"))
                }
            })
            .get()
            .await
            .unwrap();
        assert_eq!(value, "20");
    }

    #[tokio::test]
    async fn test_exceptionally_recovers() {
        let value = ServiceComputation::<String>::failed(ComputationError::canceled("stop"))
            .exceptionally(|e| format!("recovered from {}", e.kind()))
            .await
            .unwrap();
        assert_eq!(value, "recovered from canceled: stop");
    }

    #[tokio::test]
    async fn test_when_complete_observes_without_altering() {
        let seen = Arc::new(AtomicBool::new(false));
        let observer = seen.clone();

        let value = ServiceComputation::completed(7)
            .when_complete(move |r| observer.store(r.is_ok(), Ordering::SeqCst))
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(seen.load(Ordering::SeqCst));
    }
}
