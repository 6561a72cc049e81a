use super::{is_complete_json_file, parse_service_args, partial_path};
use crate::args::{ArgSpec, ArgumentError, ParsedArgs, ServiceArgs, ServiceMetaData};
use crate::computation::ComputationResult;
use crate::constants::env_vars::PERL5LIB;
use crate::constants::services::LSM_FILE_METADATA;
use crate::models::JacsServiceData;
use crate::processor::{ExeBasedProcessor, ExternalCodeBlock, ScriptWriter, ServiceContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsmFileMetadataArgs {
    pub input_lsm: PathBuf,
    pub output_metadata: PathBuf,
}

impl ServiceArgs for LsmFileMetadataArgs {
    fn arg_specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(&["-inputLSM"], "LSM input file"),
            ArgSpec::required(&["-outputLSMMetadata"], "Destination of the JSON metadata"),
        ]
    }

    fn from_parsed(parsed: &ParsedArgs) -> Result<Self, ArgumentError> {
        Ok(Self {
            input_lsm: parsed.required_path("-inputLSM")?,
            output_metadata: parsed.required_path("-outputLSMMetadata")?,
        })
    }
}

/// Dumps the metadata of an LSM stack as JSON with the configured perl script
#[derive(Debug, Default)]
pub struct LsmFileMetadataProcessor;

impl LsmFileMetadataProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExeBasedProcessor for LsmFileMetadataProcessor {
    type Input = LsmFileMetadataArgs;
    type Output = PathBuf;

    fn metadata(&self) -> ServiceMetaData {
        LsmFileMetadataArgs::metadata(LSM_FILE_METADATA, "Extract LSM metadata as JSON")
    }

    async fn pre_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<LsmFileMetadataArgs> {
        parse_service_args(sd)
    }

    async fn is_result_available(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &LsmFileMetadataArgs,
    ) -> ComputationResult<bool> {
        Ok(is_complete_json_file(&args.output_metadata).await?)
    }

    async fn retrieve_result(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &LsmFileMetadataArgs,
    ) -> ComputationResult<PathBuf> {
        Ok(args.output_metadata.clone())
    }

    fn prepare_external_script(
        &self,
        ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &LsmFileMetadataArgs,
    ) -> ComputationResult<ExternalCodeBlock> {
        let config = ctx.config();
        let partial = partial_path(&args.output_metadata);
        let mut script = ScriptWriter::new();
        if let Some(parent) = args.output_metadata.parent() {
            script.create_directories(&[parent]);
        }
        script
            .add_with_args(&config.lsm_metadata.perl_executable)
            .add_arg(config.full_executable_name(&config.lsm_metadata.script_path))
            .add_arg(args.input_lsm.to_string_lossy())
            .redirect_stdout(&partial)
            .end_args();
        script
            .add_with_args("mv")
            .add_arg("-f")
            .add_arg(partial.to_string_lossy())
            .add_arg(args.output_metadata.to_string_lossy())
            .end_args();
        Ok(script.close())
    }

    fn prepare_environment(
        &self,
        ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _args: &LsmFileMetadataArgs,
    ) -> HashMap<String, String> {
        let module_base = &ctx.config().lsm_metadata.perl_module_base;
        if module_base.trim().is_empty() {
            HashMap::new()
        } else {
            HashMap::from([(PERL5LIB.to_string(), module_base.clone())])
        }
    }
}
