use super::context::ServiceContext;
use super::runner::ExternalProcessRequest;
use super::script::ExternalCodeBlock;
use super::ServiceProcessor;
use crate::args::ServiceMetaData;
use crate::computation::{ComputationError, ComputationErrorKind, ComputationResult};
use crate::models::JacsServiceData;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// A service whose work is done by an external executable
#[async_trait]
pub trait ExeBasedProcessor: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn metadata(&self) -> ServiceMetaData;

    async fn pre_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<Self::Input>;

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

    /// Build the command script for one invocation
    fn prepare_external_script(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
    ) -> ComputationResult<ExternalCodeBlock>;

    /// Environment overrides; path-like values are prepended to the inherited ones
    fn prepare_environment(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &Self::Input,
    ) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Output lines matching any of these patterns fail the invocation
    fn failure_patterns(&self) -> &[Regex] {
        &[]
    }

    fn has_errors(&self, line: &str) -> bool {
        self.failure_patterns().iter().any(|p| p.is_match(line))
    }

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

/// Adapts an [`ExeBasedProcessor`] to the generic pipeline
#[derive(Debug)]
pub struct ExeBasedServiceProcessor<P> {
    inner: P,
}

impl<P: ExeBasedProcessor> ExeBasedServiceProcessor<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    async fn run_external(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &P::Input,
    ) -> ComputationResult<()> {
        let script = self.inner.prepare_external_script(ctx, sd, input)?;
        let environment = self.inner.prepare_environment(ctx, sd, input);
        let runner = ctx
            .engine()
            .process_runner(sd.processing_location)
            .ok_or_else(|| {
                ComputationError::new(ComputationErrorKind::Engine(format!(
                    "no process runner configured for {}",
                    sd.processing_location
                )))
            })?;

        let request = ExternalProcessRequest {
            service_id: sd.id,
            service_name: sd.name.clone(),
            script,
            environment,
            working_directory: ctx.working_directory(sd),
        };
        let inner = &self.inner;
        let checker = |line: &str| inner.has_errors(line);
        let outcome = runner.run(request, &checker).await?;
        debug!(
            service_id = %sd.id,
            script = %outcome.script_path.display(),
            output_lines = outcome.output_lines,
            "External invocation completed"
        );
        Ok(())
    }
}

#[async_trait]
impl<P: ExeBasedProcessor> ServiceProcessor for ExeBasedServiceProcessor<P> {
    type Input = P::Input;
    type Output = P::Output;

    fn metadata(&self) -> ServiceMetaData {
        self.inner.metadata()
    }

    async fn pre_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<Self::Input> {
        self.inner.pre_process_data(ctx, sd).await
    }

    async fn is_result_available(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
    ) -> ComputationResult<bool> {
        self.inner.is_result_available(ctx, sd, input).await
    }

    async fn retrieve_result(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
    ) -> ComputationResult<Self::Output> {
        self.inner.retrieve_result(ctx, sd, input).await
    }

    /// Run the tool, then wait for its output to become complete
    async fn local_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
        _children: &[JacsServiceData],
    ) -> ComputationResult<Self::Output> {
        self.run_external(ctx, sd, input).await?;

        // Shared filesystems may expose the output a little after the tool exits
        let settings = &ctx.config().engine;
        for attempt in 0..=settings.result_retries {
            if self.inner.is_result_available(ctx, sd, input).await? {
                return self.inner.retrieve_result(ctx, sd, input).await;
            }
            if attempt < settings.result_retries {
                info!(
                    service_id = %sd.id,
                    attempt = attempt + 1,
                    "⏳ PROCESSOR: Result not available yet, re-checking"
                );
                tokio::time::sleep(settings.result_retry_interval()).await;
            }
        }
        Err(ComputationError::processing(format!(
            "{} finished but its result is not available",
            sd.name
        )))
    }

    async fn post_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &Self::Input,
        output: &Self::Output,
    ) -> ComputationResult<()> {
        self.inner.post_process_data(ctx, sd, input, output).await
    }
}
