//! Dispatch of one queued service: dependencies, execution slot, pipeline, terminal state.

use super::JacsServiceEngine;
use crate::computation::ComputationError;
use crate::constants::system::{TERMINAL_WRITE_ATTEMPTS, TERMINAL_WRITE_BACKOFF_MS};
use crate::error::{JacsError, Result};
use crate::logging::log_service_operation;
use crate::models::{JacsServiceData, ServiceId};
use crate::processor::{ExecutionSlot, ServiceContext};
use crate::state_machine::{JacsServiceState, ServiceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Entry of the dispatch queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueuedService {
    pub id: ServiceId,
    /// Re-dispatch of a service found RUNNING after a restart
    pub resume: bool,
}

/// Scheduling loop: spawns one dispatch task per queued service until shutdown
pub(crate) async fn run_scheduling_loop(
    engine: JacsServiceEngine,
    mut queue: mpsc::UnboundedReceiver<QueuedService>,
    shutdown: Arc<Notify>,
) -> mpsc::UnboundedReceiver<QueuedService> {
    info!("🚀 ENGINE: Scheduling loop started");
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            next = queue.recv() => match next {
                Some(item) => {
                    let engine = engine.clone();
                    tokio::spawn(async move { dispatch(engine, item).await });
                }
                None => break,
            },
        }
    }
    info!("🛑 ENGINE: Scheduling loop stopped");
    queue
}

pub(crate) async fn dispatch(engine: JacsServiceEngine, item: QueuedService) {
    let _in_flight = engine.inner.counters.track_dispatch();
    if let Err(e) = dispatch_service(&engine, item).await {
        error!(service_id = %item.id, error = %e, "❌ ENGINE: Dispatch failed");
        fail_after_dispatch_error(&engine, item.id, &e).await;
    }
}

/// Move a service whose dispatch broke off to ERROR so that nobody waits on it forever.
///
/// Waiters are woken whatever the outcome; they re-read the store themselves.
async fn fail_after_dispatch_error(engine: &JacsServiceEngine, id: ServiceId, cause: &JacsError) {
    let reason = format!("dispatch failed: {cause}");
    for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
        match engine
            .finish(id, ServiceEvent::fail_with_error(reason.clone()))
            .await
        {
            Ok(()) => break,
            Err(e) => {
                warn!(service_id = %id, attempt, error = %e, "Could not persist dispatch failure");
                if attempt < TERMINAL_WRITE_ATTEMPTS {
                    let backoff = TERMINAL_WRITE_BACKOFF_MS * 2u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }
    engine.inner.notifier.notify(id);
}

async fn dispatch_service(engine: &JacsServiceEngine, item: QueuedService) -> Result<()> {
    let Some(sd) = engine.get_service_by_id(item.id).await? else {
        warn!(service_id = %item.id, "Queued service no longer exists");
        return Ok(());
    };
    let dispatchable = sd.state == JacsServiceState::Queued
        || (item.resume && sd.state == JacsServiceState::Running);
    if !dispatchable {
        debug!(service_id = %sd.id, state = %sd.state, "Skipping service that is not queued");
        return Ok(());
    }

    if let Some(reason) = failed_dependency(engine, &sd).await? {
        engine
            .finish(sd.id, ServiceEvent::cancel_with_reason(reason))
            .await?;
        return Ok(());
    }

    let descriptor = match engine.inner.registry.get(&sd.name) {
        Ok(descriptor) => descriptor.clone(),
        Err(e) => {
            engine
                .finish(sd.id, ServiceEvent::fail_with_error(e.to_string()))
                .await?;
            return Ok(());
        }
    };

    let semaphore = engine.slot_semaphore(sd.processing_location)?;
    let permit = {
        let _waiting = engine.inner.counters.track_waiting_for_slot();
        semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JacsError::Engine("execution slots are closed".to_string()))?
    };
    let slot = Arc::new(ExecutionSlot::held(semaphore, permit));

    let sd = match engine
        .inner
        .state_machine
        .transition(sd.id, ServiceEvent::Start)
        .await
    {
        Ok(running) => running,
        Err(e) if e.is_invalid_transition() => {
            debug!(service_id = %sd.id, "Service left the queue before it could start");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    log_service_operation(
        "start",
        Some(sd.id),
        Some(&sd.name),
        &sd.state.to_string(),
        Some(&sd.processing_location.to_string()),
    );

    let _running = engine.inner.counters.track_running();
    let processor = descriptor.create_processor(engine.config());
    let ctx = ServiceContext::new(engine.clone(), slot);
    let outcome = processor.process_stringified(ctx, sd.clone()).await;

    engine.finish(sd.id, outcome_event(&sd, outcome)).await?;
    Ok(())
}

/// Wait for declared dependencies; returns why the service must be canceled, if it must
async fn failed_dependency(
    engine: &JacsServiceEngine,
    sd: &JacsServiceData,
) -> Result<Option<String>> {
    for dependency_id in &sd.depends_on {
        let dependency = match engine.wait_for_completion(*dependency_id).await {
            Ok(dependency) => dependency,
            Err(JacsError::ServiceNotFound(_)) => {
                return Ok(Some(format!("dependency {dependency_id} does not exist")))
            }
            Err(e) => return Err(e),
        };
        if !dependency.has_completed_successfully() {
            return Ok(Some(format!(
                "dependency {}:{} finished {}",
                dependency.name, dependency.id, dependency.state
            )));
        }
    }
    Ok(None)
}

fn outcome_event(
    sd: &JacsServiceData,
    outcome: std::result::Result<String, ComputationError>,
) -> ServiceEvent {
    match outcome {
        Ok(result) => ServiceEvent::Complete(result),
        Err(e) if e.is_cancellation() => {
            info!(service_id = %sd.id, reason = %e, "🚫 ENGINE: Service canceled");
            ServiceEvent::cancel_with_reason(e.to_string())
        }
        Err(e) => {
            warn!(service_id = %sd.id, service_name = %sd.name, error = %e, "❌ ENGINE: Service failed");
            ServiceEvent::fail_with_error(e.to_string())
        }
    }
}
