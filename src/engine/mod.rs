//! # Service Engine
//!
//! The engine accepts submissions, persists them, and drives every queued service through its
//! processor pipeline on the tokio runtime.
//!
//! ```text
//! submit ─► persist CREATED ─► QUEUED ─► queue ─► scheduling loop ─► dispatch task
//!                                                                       │ wait for depends_on
//!                                                                       │ acquire location slot
//!                                                                       │ RUNNING
//!                                                                       │ processor pipeline
//!                                                                       ▼
//!                                                          SUCCESS | ERROR | CANCELED ─► notify waiters
//! ```
//!
//! Each processing location has its own bounded pool of execution slots. The persistence store
//! is the single source of truth: every terminal state is written before waiters are woken, and
//! waiters always re-read the store.

pub mod completion;
mod dispatcher;
pub mod stats;

pub use completion::CompletionNotifier;
pub use stats::EngineStats;

use crate::args::ServiceMetaData;
use crate::computation::ServiceComputationFactory;
use crate::config::EngineConfig;
use crate::error::{JacsError, Result};
use crate::logging::log_service_operation;
use crate::models::{JacsServiceData, ProcessingLocation, ServiceId, ServiceSubmission};
use crate::persistence::{InMemoryServiceDataPersistence, JacsServiceDataPersistence};
use crate::processor::{ExecutionSlot, ExternalProcessRunner, ProcessRunners, ServiceContext};
use crate::registry::ServiceRegistry;
use crate::state_machine::{JacsServiceState, ServiceEvent, ServiceStateMachine};
use dispatcher::QueuedService;
use parking_lot::Mutex;
use stats::{location_key, EngineCounters};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type QueueReceiver = mpsc::UnboundedReceiver<QueuedService>;

pub(crate) struct EngineInner {
    config: EngineConfig,
    persistence: Arc<dyn JacsServiceDataPersistence>,
    registry: Arc<ServiceRegistry>,
    state_machine: ServiceStateMachine,
    computation_factory: ServiceComputationFactory,
    runners: ProcessRunners,
    notifier: CompletionNotifier,
    slots: HashMap<ProcessingLocation, Arc<Semaphore>>,
    queue_tx: mpsc::UnboundedSender<QueuedService>,
    queue_rx: Mutex<Option<QueueReceiver>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    loop_handle: Mutex<Option<JoinHandle<QueueReceiver>>>,
    counters: EngineCounters,
}

/// Cloneable handle to a running service engine
#[derive(Clone)]
pub struct JacsServiceEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for JacsServiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JacsServiceEngine")
            .field("services", &self.inner.registry.service_names())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl JacsServiceEngine {
    pub fn builder() -> JacsServiceEngineBuilder {
        JacsServiceEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn persistence(&self) -> &Arc<dyn JacsServiceDataPersistence> {
        &self.inner.persistence
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    pub fn computation_factory(&self) -> &ServiceComputationFactory {
        &self.inner.computation_factory
    }

    pub fn process_runner(&self, location: ProcessingLocation) -> Option<Arc<dyn ExternalProcessRunner>> {
        self.inner.runners.get(location)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Context for invoking a processor outside the dispatcher, without a slot limit
    pub fn new_context(&self) -> ServiceContext {
        ServiceContext::new(self.clone(), Arc::new(ExecutionSlot::unbounded()))
    }

    /// Start the scheduling loop; a no-op if it is already running
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(queue) = self.inner.queue_rx.lock().take() else {
            self.inner.running.store(false, Ordering::Release);
            return Err(JacsError::InvalidState(
                "dispatch queue is owned by another loop".to_string(),
            ));
        };
        let handle = tokio::spawn(dispatcher::run_scheduling_loop(
            self.clone(),
            queue,
            self.inner.shutdown.clone(),
        ));
        *self.inner.loop_handle.lock() = Some(handle);
        info!(
            local_slots = self.config().engine.local_slots,
            cluster_slots = self.config().engine.cluster_slots,
            "✅ ENGINE: Started"
        );
        Ok(())
    }

    /// Start the scheduling loop and re-enqueue everything the store holds unfinished; returns
    /// how many services were resumed
    pub async fn start_and_recover(&self) -> Result<usize> {
        self.start()?;
        self.recover_pending_services().await
    }

    /// Stop scheduling and wait up to `timeout` for in-flight dispatches to finish.
    ///
    /// Services still queued stay QUEUED and are picked up by the next `start`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutdown.notify_one();
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            let queue = handle
                .await
                .map_err(|e| JacsError::Engine(format!("scheduling loop panicked: {e}")))?;
            *self.inner.queue_rx.lock() = Some(queue);
        }

        match tokio::time::timeout(timeout, self.inner.counters.wait_idle()).await {
            Ok(()) => {
                info!("🛑 ENGINE: Shut down");
                Ok(())
            }
            Err(_) => Err(JacsError::Timeout(format!(
                "{} dispatches still in flight after {timeout:?}",
                self.inner.counters.in_flight()
            ))),
        }
    }

    /// Persist and enqueue one service; returns the record as created
    pub async fn submit_single_service(&self, submission: ServiceSubmission) -> Result<JacsServiceData> {
        let created = self.create_service(submission).await?;
        self.enqueue(created.id).await?;
        Ok(created)
    }

    /// Persist every service before enqueueing any of them
    pub async fn submit_multiple_services(
        &self,
        submissions: Vec<ServiceSubmission>,
    ) -> Result<Vec<JacsServiceData>> {
        let mut created = Vec::with_capacity(submissions.len());
        for submission in submissions {
            created.push(self.create_service(submission).await?);
        }
        for service in &created {
            self.enqueue(service.id).await?;
        }
        Ok(created)
    }

    async fn create_service(&self, submission: ServiceSubmission) -> Result<JacsServiceData> {
        self.inner.registry.get(&submission.name)?;
        if let Some(workspace) = submission.workspace.as_deref() {
            if !workspace.trim().is_empty() && !std::path::Path::new(workspace).is_absolute() {
                return Err(JacsError::InvalidSubmission(format!(
                    "workspace must be an absolute path, got '{workspace}'"
                )));
            }
        }
        if let Some(parent_id) = submission.parent_service_id {
            self.require_service(parent_id).await?;
        }
        for dependency_id in &submission.depends_on {
            self.require_service(*dependency_id).await?;
        }

        let data = JacsServiceData::from_submission(submission);
        self.inner.persistence.create(&data).await?;
        if let Some(parent_id) = data.parent_service_id {
            self.inner
                .persistence
                .add_child_service(parent_id, data.id)
                .await?;
        }
        log_service_operation(
            "submit",
            Some(data.id),
            Some(&data.name),
            &data.state.to_string(),
            data.parent_service_id.map(|p| format!("parent {p}")).as_deref(),
        );
        Ok(data)
    }

    async fn enqueue(&self, service_id: ServiceId) -> Result<()> {
        self.inner
            .state_machine
            .transition(service_id, ServiceEvent::Enqueue)
            .await?;
        self.push_queue(QueuedService {
            id: service_id,
            resume: false,
        })
    }

    fn push_queue(&self, item: QueuedService) -> Result<()> {
        self.inner
            .queue_tx
            .send(item)
            .map_err(|_| JacsError::Engine("dispatch queue is closed".to_string()))
    }

    async fn require_service(&self, service_id: ServiceId) -> Result<JacsServiceData> {
        self.get_service_by_id(service_id)
            .await?
            .ok_or_else(|| JacsError::ServiceNotFound(service_id.to_string()))
    }

    /// Apply a terminal event and wake waiters; a service that is already terminal is left alone
    pub(crate) async fn finish(&self, service_id: ServiceId, event: ServiceEvent) -> Result<()> {
        let event_type = event.event_type();
        let result = self
            .inner
            .state_machine
            .transition(service_id, event)
            .await;
        match result {
            Ok(updated) => {
                log_service_operation(
                    event_type,
                    Some(updated.id),
                    Some(&updated.name),
                    &updated.state.to_string(),
                    updated.last_event().map(|e| e.value.as_str()),
                );
                self.inner.notifier.notify(service_id);
                Ok(())
            }
            Err(e) if e.is_invalid_transition() => {
                debug!(
                    service_id = %service_id,
                    event = event_type,
                    "Service already terminal, discarding outcome"
                );
                self.inner.notifier.notify(service_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve once the persisted state of `service_id` is terminal
    pub async fn wait_for_completion(&self, service_id: ServiceId) -> Result<JacsServiceData> {
        let recheck = self.config().engine.completion_recheck_interval();
        loop {
            let notify = self.inner.notifier.subscribe(service_id);
            let finished = {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match self.require_service(service_id).await {
                    Ok(current) if current.has_completed() => Some(Ok(current)),
                    Ok(_) => {
                        let _ = tokio::time::timeout(recheck, notified).await;
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            };
            if let Some(finished) = finished {
                self.inner.notifier.release(service_id, notify);
                return finished;
            }
        }
    }

    /// Completion subscriptions not yet released or notified
    pub fn pending_waiters(&self) -> usize {
        self.inner.notifier.pending()
    }

    /// Cancel a service and every non-terminal descendant.
    ///
    /// Already-terminal services are returned unchanged. Running external processes are not
    /// killed; their outcome is discarded because the record is already terminal.
    pub async fn cancel_service(&self, service_id: ServiceId) -> Result<JacsServiceData> {
        let current = self.require_service(service_id).await?;
        if current.has_completed() {
            debug!(service_id = %service_id, state = %current.state, "Cancel of terminal service ignored");
            return Ok(current);
        }
        self.finish(service_id, ServiceEvent::cancel_with_reason("canceled by request"))
            .await?;

        let mut pending: VecDeque<ServiceId> = VecDeque::from([service_id]);
        while let Some(parent_id) = pending.pop_front() {
            for child in self.inner.persistence.find_child_services(parent_id).await? {
                pending.push_back(child.id);
                if !child.has_completed() {
                    self.finish(
                        child.id,
                        ServiceEvent::cancel_with_reason(format!("parent {parent_id} was canceled")),
                    )
                    .await?;
                }
            }
        }

        self.require_service(service_id).await
    }

    pub async fn get_service_by_id(&self, service_id: ServiceId) -> Result<Option<JacsServiceData>> {
        Ok(self.inner.persistence.find_by_id(service_id).await?)
    }

    pub async fn get_child_services(&self, service_id: ServiceId) -> Result<Vec<JacsServiceData>> {
        Ok(self.inner.persistence.find_child_services(service_id).await?)
    }

    pub async fn get_server_stats(&self) -> Result<EngineStats> {
        let counts = self.inner.persistence.count_by_state().await?;
        let available_slots = self
            .inner
            .slots
            .iter()
            .map(|(location, semaphore)| (location_key(*location), semaphore.available_permits()))
            .collect();
        Ok(EngineStats {
            queued: counts.get(&JacsServiceState::Queued).copied().unwrap_or(0),
            running: self.inner.counters.running(),
            waiting_for_slot: self.inner.counters.waiting_for_slot(),
            total: counts.values().sum(),
            dispatched: self.inner.counters.dispatched(),
            available_slots,
            per_state: counts.into_iter().collect(),
        })
    }

    pub fn get_service_metadata(&self, service_name: &str) -> Result<ServiceMetaData> {
        self.inner.registry.metadata(service_name)
    }

    pub fn list_service_metadata(&self) -> Vec<ServiceMetaData> {
        self.inner.registry.list_metadata()
    }

    /// Re-enqueue services a previous process left unfinished; returns how many were queued
    pub async fn recover_pending_services(&self) -> Result<usize> {
        let pending = self
            .inner
            .persistence
            .find_by_states(&[
                JacsServiceState::Created,
                JacsServiceState::Queued,
                JacsServiceState::Running,
            ])
            .await?;

        let mut recovered = 0;
        for service in pending {
            match service.state {
                JacsServiceState::Created => self.enqueue(service.id).await?,
                JacsServiceState::Queued => self.push_queue(QueuedService {
                    id: service.id,
                    resume: false,
                })?,
                _ => self.push_queue(QueuedService {
                    id: service.id,
                    resume: true,
                })?,
            }
            recovered += 1;
        }
        if recovered > 0 {
            warn!(recovered, "♻️ ENGINE: Re-enqueued unfinished services");
        }
        Ok(recovered)
    }

    pub(crate) fn slot_semaphore(&self, location: ProcessingLocation) -> Result<Arc<Semaphore>> {
        self.inner
            .slots
            .get(&location)
            .cloned()
            .ok_or_else(|| JacsError::Configuration(format!("no execution slots for {location}")))
    }
}

/// Assembles a [`JacsServiceEngine`]; anything not supplied gets its default
#[derive(Default)]
pub struct JacsServiceEngineBuilder {
    config: Option<EngineConfig>,
    persistence: Option<Arc<dyn JacsServiceDataPersistence>>,
    registry: Option<ServiceRegistry>,
    runners: Option<ProcessRunners>,
    runtime: Option<Handle>,
}

impl JacsServiceEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn JacsServiceDataPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn process_runners(mut self, runners: ProcessRunners) -> Self {
        self.runners = Some(runners);
        self
    }

    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<JacsServiceEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => crate::services::default_registry()?,
        };
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(InMemoryServiceDataPersistence::new()));
        let runners = self
            .runners
            .unwrap_or_else(|| ProcessRunners::from_config(&config));
        let computation_factory = match self.runtime {
            Some(handle) => ServiceComputationFactory::new(handle),
            None => ServiceComputationFactory::current()?,
        };

        let slots = HashMap::from([
            (
                ProcessingLocation::Local,
                Arc::new(Semaphore::new(config.engine.local_slots)),
            ),
            (
                ProcessingLocation::Cluster,
                Arc::new(Semaphore::new(config.engine.cluster_slots)),
            ),
        ]);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        debug!(services = ?registry.service_names(), "Building service engine");
        Ok(JacsServiceEngine {
            inner: Arc::new(EngineInner {
                state_machine: ServiceStateMachine::new(persistence.clone()),
                config,
                persistence,
                registry: Arc::new(registry),
                computation_factory,
                runners,
                notifier: CompletionNotifier::new(),
                slots,
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                running: AtomicBool::new(false),
                shutdown: Arc::new(Notify::new()),
                loop_handle: Mutex::new(None),
                counters: EngineCounters::default(),
            }),
        })
    }
}
