//! In-process services used to exercise the engine without external tools

use async_trait::async_trait;
use jacs_services::args::{ArgSpec, ArgumentError, ParsedArgs, ServiceArgs, ServiceMetaData};
use jacs_services::processor::last_child_result;
use jacs_services::services::default_registry;
use jacs_services::{
    ComputationError, ComputationResult, JacsServiceData, ServiceContext, ServiceDescriptor,
    ServiceProcessor, ServiceRegistry, ServiceSubmission,
};
use std::sync::Arc;
use std::time::Duration;

pub const ECHO: &str = "echo";
pub const FAN_OUT: &str = "fanOut";

#[derive(Debug, Clone)]
pub struct EchoArgs {
    pub value: String,
    pub sleep_ms: u64,
    pub fail: bool,
}

impl ServiceArgs for EchoArgs {
    fn arg_specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(&["-value"], "Value to return"),
            ArgSpec::optional(&["-sleepMs"], "Delay before returning").with_default("0"),
            ArgSpec::flag(&["-fail"], "Fail instead of returning"),
        ]
    }

    fn from_parsed(parsed: &ParsedArgs) -> Result<Self, ArgumentError> {
        Ok(Self {
            value: parsed.required_value("-value")?.to_string(),
            sleep_ms: parsed.parse_value("-sleepMs")?.unwrap_or(0),
            fail: parsed.flag("-fail"),
        })
    }
}

/// Returns its `-value` argument after an optional delay
#[derive(Debug, Default)]
pub struct EchoProcessor;

#[async_trait]
impl ServiceProcessor for EchoProcessor {
    type Input = EchoArgs;
    type Output = String;

    fn metadata(&self) -> ServiceMetaData {
        EchoArgs::metadata(ECHO, "Echo a value")
    }

    async fn pre_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<EchoArgs> {
        Ok(EchoArgs::parse(&sd.args)?)
    }

    async fn is_result_available(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &EchoArgs,
    ) -> ComputationResult<bool> {
        Ok(false)
    }

    async fn retrieve_result(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        input: &EchoArgs,
    ) -> ComputationResult<String> {
        Ok(input.value.clone())
    }

    async fn local_process_data(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        input: &EchoArgs,
        _children: &[JacsServiceData],
    ) -> ComputationResult<String> {
        if input.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(input.sleep_ms)).await;
        }
        if input.fail {
            return Err(ComputationError::processing(format!(
                "echo of {} failed on request",
                input.value
            )));
        }
        Ok(input.value.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FanOutArgs {
    pub children: usize,
    pub child_sleep_ms: u64,
    pub failing_child: Option<usize>,
}

impl ServiceArgs for FanOutArgs {
    fn arg_specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(&["-children"], "Number of echo children"),
            ArgSpec::optional(&["-childSleepMs"], "Delay of every child").with_default("0"),
            ArgSpec::optional(&["-failChild"], "Index of a child that fails"),
        ]
    }

    fn from_parsed(parsed: &ParsedArgs) -> Result<Self, ArgumentError> {
        Ok(Self {
            children: parsed.parse_value("-children")?.unwrap_or(0),
            child_sleep_ms: parsed.parse_value("-childSleepMs")?.unwrap_or(0),
            failing_child: parsed.parse_value("-failChild")?,
        })
    }
}

/// Submits `-children` echo children and returns their results in submission order
#[derive(Debug, Default)]
pub struct FanOutProcessor;

#[async_trait]
impl ServiceProcessor for FanOutProcessor {
    type Input = FanOutArgs;
    type Output = Vec<String>;

    fn metadata(&self) -> ServiceMetaData {
        FanOutArgs::metadata(FAN_OUT, "Fan out to echo children")
    }

    async fn pre_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<FanOutArgs> {
        Ok(FanOutArgs::parse(&sd.args)?)
    }

    async fn is_result_available(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &FanOutArgs,
    ) -> ComputationResult<bool> {
        Ok(false)
    }

    async fn retrieve_result(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &FanOutArgs,
    ) -> ComputationResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn submit_child_services(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &FanOutArgs,
    ) -> ComputationResult<Vec<JacsServiceData>> {
        let mut children = Vec::with_capacity(input.children);
        for index in 0..input.children {
            let submission = ServiceSubmission::new(ECHO)
                .arg("-value", format!("child-{index}"))
                .arg("-sleepMs", input.child_sleep_ms.to_string())
                .flag("-fail", input.failing_child == Some(index));
            children.push(ctx.submit_child(sd, submission).await?);
        }
        Ok(children)
    }

    async fn local_process_data(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &FanOutArgs,
        children: &[JacsServiceData],
    ) -> ComputationResult<Vec<String>> {
        children
            .iter()
            .map(|child| last_child_result::<String>(std::slice::from_ref(child)))
            .collect()
    }
}

/// Built-in services plus the in-process test services
pub fn test_registry() -> ServiceRegistry {
    default_registry()
        .and_then(|registry| {
            registry.with_service(ServiceDescriptor::from_processor(Arc::new(EchoProcessor)))
        })
        .and_then(|registry| {
            registry.with_service(ServiceDescriptor::from_processor(Arc::new(FanOutProcessor)))
        })
        .expect("test registry")
}

pub fn echo(value: &str) -> ServiceSubmission {
    ServiceSubmission::new(ECHO).arg("-value", value)
}

pub fn fan_out(children: usize) -> ServiceSubmission {
    ServiceSubmission::new(FAN_OUT).arg("-children", children.to_string())
}
