//! # Service Processors
//!
//! Every service runs through the same pipeline, driven by [`process`]:
//!
//! ```text
//! pre_process_data ─► is_result_available ─┬─ yes ─► retrieve_result ───────────────┐
//!                                          └─ no ──► submit_child_services            │
//!                                                    ─► wait for children             │
//!                                                    ─► local_process_data ───────────┤
//!                                                                                     ▼
//!                                                                      post_process_data
//! ```
//!
//! The persisted state is re-read at each stage boundary, and a canceled service stops at the
//! next boundary with a cancellation error. Any failure before post-processing fails the whole
//! computation and carries the service record; post-processing failures are logged and ignored.
//!
//! Processors producing their output with an external tool implement
//! [`exe_based::ExeBasedProcessor`] instead and are wrapped in
//! [`exe_based::ExeBasedServiceProcessor`].

pub mod context;
pub mod exe_based;
pub mod runner;
pub mod script;

pub use context::{ExecutionSlot, ServiceContext};
pub use exe_based::{ExeBasedProcessor, ExeBasedServiceProcessor};
pub use runner::{
    ExternalProcessError, ExternalProcessRequest, ExternalProcessRunner, OutputErrorChecker,
    ProcessRunners, ShellProcessRunner,
};
pub use script::{ExternalCodeBlock, ScriptWriter};

use crate::args::ServiceMetaData;
use crate::computation::{ComputationError, ComputationResult, ServiceComputation};
use crate::models::JacsServiceData;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The four-stage service pipeline
#[async_trait]
pub trait ServiceProcessor: Send + Sync + 'static {
    /// Validated arguments and resolved paths shared by the later stages
    type Input: Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn metadata(&self) -> ServiceMetaData;

    /// Parse and validate the service arguments
    async fn pre_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<Self::Input>;

    /// True only if a complete result already exists
    async fn is_result_available(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
    ) -> ComputationResult<bool>;

    async fn retrieve_result(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
    ) -> ComputationResult<Self::Output>;

    /// Fan-out hook; the returned children are awaited before `local_process_data`
    async fn submit_child_services(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &Self::Input,
    ) -> ComputationResult<Vec<JacsServiceData>> {
        Ok(Vec::new())
    }

    /// Do the actual work; `children` are the terminal child records in submission order
    async fn local_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
        children: &[JacsServiceData],
    ) -> ComputationResult<Self::Output>;

    /// Cleanup of intermediate artifacts
    async fn post_process_data(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &Self::Input,
        _output: &Self::Output,
    ) -> ComputationResult<()> {
        Ok(())
    }
}

/// Run the pipeline of `processor` for `sd` on the engine's worker runtime
pub fn process<P: ServiceProcessor>(
    processor: Arc<P>,
    ctx: ServiceContext,
    sd: JacsServiceData,
) -> ServiceComputation<P::Output> {
    let factory = ctx.engine().computation_factory().clone();
    let origin = sd.clone();
    factory
        .new_computation(async move { run_pipeline(processor.as_ref(), &ctx, &sd).await })
        .map_err(move |e| e.with_service(&origin))
}

async fn run_pipeline<P: ServiceProcessor>(
    processor: &P,
    ctx: &ServiceContext,
    sd: &JacsServiceData,
) -> ComputationResult<P::Output> {
    ctx.ensure_not_canceled(sd).await?;
    let input = processor.pre_process_data(ctx, sd).await?;

    ctx.ensure_not_canceled(sd).await?;
    let output = if processor.is_result_available(ctx, sd, &input).await? {
        info!(
            service_id = %sd.id,
            service_name = %sd.name,
            "♻️ PROCESSOR: Result already available, skipping processing"
        );
        processor.retrieve_result(ctx, sd, &input).await?
    } else {
        let submitted = processor.submit_child_services(ctx, sd, &input).await?;
        let children = ctx.wait_for_children(sd, &submitted).await?;
        ctx.ensure_not_canceled(sd).await?;
        debug!(
            service_id = %sd.id,
            service_name = %sd.name,
            children = children.len(),
            "PROCESSOR: Running local processing"
        );
        processor
            .local_process_data(ctx, sd, &input, &children)
            .await?
    };

    if let Err(e) = processor.post_process_data(ctx, sd, &input, &output).await {
        warn!(
            service_id = %sd.id,
            service_name = %sd.name,
            error = %e,
            "⚠️ PROCESSOR: Post-processing failed, keeping result"
        );
    }
    Ok(output)
}

/// Result of the last child, the default outcome of a composite service
pub fn last_child_result<T: DeserializeOwned>(
    children: &[JacsServiceData],
) -> ComputationResult<T> {
    let last = children
        .last()
        .ok_or_else(|| ComputationError::processing("composite service has no children"))?;
    last.result::<T>()?.ok_or_else(|| {
        ComputationError::processing(format!("child service {last} finished without a result"))
    })
}

/// Object-safe view of a processor, exchanging results as JSON strings
pub trait DynServiceProcessor: Send + Sync {
    fn service_metadata(&self) -> ServiceMetaData;

    fn process_stringified(
        self: Arc<Self>,
        ctx: ServiceContext,
        sd: JacsServiceData,
    ) -> ServiceComputation<String>;
}

impl<P: ServiceProcessor> DynServiceProcessor for P {
    fn service_metadata(&self) -> ServiceMetaData {
        self.metadata()
    }

    fn process_stringified(
        self: Arc<Self>,
        ctx: ServiceContext,
        sd: JacsServiceData,
    ) -> ServiceComputation<String> {
        process(self, ctx, sd)
            .then_try_apply(|output| serde_json::to_string(&output).map_err(ComputationError::from))
    }
}
