use super::{is_v3draw_file, parse_service_args};
use crate::args::{ArgSpec, ArgumentError, ParsedArgs, ServiceArgs, ServiceMetaData};
use crate::computation::ComputationResult;
use crate::constants::env_vars::DY_LIBRARY_PATH;
use crate::constants::files::MERGED_V3DRAW;
use crate::constants::services::MERGE_LSM_PAIR;
use crate::error::{JacsError, Result};
use crate::models::{JacsServiceData, ServiceId};
use crate::processor::{ExeBasedProcessor, ExternalCodeBlock, ScriptWriter, ServiceContext};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Vaa3D reports plugin failures on stdout and still exits 0
const PLUGIN_FAILURE_PATTERN: &str = r"(?i)fail to call the plugin";
const BLEND_PLUGIN: &str = "blend_multiscan";
const BLEND_FUNCTION: &str = "multiscanblend";
/// First display number handed out when none is configured
const DISPLAY_PORT_BASE: u16 = 100;
const DISPLAY_PORT_RANGE: u128 = 900;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLsmPairArgs {
    pub lsm1: PathBuf,
    pub lsm2: PathBuf,
    pub result_dir: PathBuf,
    pub merged_name: String,
    pub multiscan_version: Option<String>,
}

impl MergeLsmPairArgs {
    pub fn merged_file(&self) -> PathBuf {
        self.result_dir.join(&self.merged_name)
    }
}

impl ServiceArgs for MergeLsmPairArgs {
    fn arg_specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(&["-lsm1"], "First LSM stack"),
            ArgSpec::required(&["-lsm2"], "Second LSM stack"),
            ArgSpec::required(&["-resultDir"], "Directory receiving the merged stack"),
            ArgSpec::optional(&["-mergedName"], "File name of the merged stack")
                .with_default(MERGED_V3DRAW),
            ArgSpec::optional(&["-multiscanVersion"], "Multiscan blend version"),
        ]
    }

    fn from_parsed(parsed: &ParsedArgs) -> std::result::Result<Self, ArgumentError> {
        let merged_name = parsed.value("-mergedName").unwrap_or(MERGED_V3DRAW);
        if merged_name.contains('/') {
            return Err(ArgumentError::InvalidValue {
                flag: "-mergedName".to_string(),
                value: merged_name.to_string(),
                reason: "must be a file name".to_string(),
            });
        }
        Ok(Self {
            lsm1: parsed.required_path("-lsm1")?,
            lsm2: parsed.required_path("-lsm2")?,
            result_dir: parsed.required_path("-resultDir")?,
            merged_name: merged_name.to_string(),
            multiscan_version: parsed.value("-multiscanVersion").map(str::to_string),
        })
    }
}

/// Blends the two scans of an LSM pair into a single `.v3draw` stack with Vaa3D
#[derive(Debug)]
pub struct MergeLsmPairProcessor {
    failure_patterns: Vec<Regex>,
}

impl MergeLsmPairProcessor {
    pub fn new() -> Result<Self> {
        let plugin_failure = Regex::new(PLUGIN_FAILURE_PATTERN)
            .map_err(|e| JacsError::Configuration(format!("invalid failure pattern: {e}")))?;
        Ok(Self {
            failure_patterns: vec![plugin_failure],
        })
    }
}

fn display_port(configured: Option<u16>, service_id: ServiceId) -> u16 {
    configured.unwrap_or_else(|| {
        // bounded by DISPLAY_PORT_RANGE, so the cast cannot truncate
        DISPLAY_PORT_BASE + (service_id.as_u128() % DISPLAY_PORT_RANGE) as u16
    })
}

#[async_trait]
impl ExeBasedProcessor for MergeLsmPairProcessor {
    type Input = MergeLsmPairArgs;
    type Output = PathBuf;

    fn metadata(&self) -> ServiceMetaData {
        MergeLsmPairArgs::metadata(MERGE_LSM_PAIR, "Merge an LSM pair into one v3draw stack")
    }

    async fn pre_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<MergeLsmPairArgs> {
        parse_service_args(sd)
    }

    async fn is_result_available(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &MergeLsmPairArgs,
    ) -> ComputationResult<bool> {
        Ok(is_v3draw_file(&args.merged_file()).await?)
    }

    async fn retrieve_result(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &MergeLsmPairArgs,
    ) -> ComputationResult<PathBuf> {
        Ok(args.merged_file())
    }

    fn prepare_external_script(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        args: &MergeLsmPairArgs,
    ) -> ComputationResult<ExternalCodeBlock> {
        let vaa3d = &ctx.config().vaa3d;
        let executable = ctx.config().full_executable_name(&vaa3d.executable);
        let mut script = ScriptWriter::new();
        script
            .set_display_port(display_port(vaa3d.display_port, sd.id), vaa3d.use_xvfb)
            .create_directories(&[&args.result_dir]);
        script
            .add_with_args(&executable)
            .add_args(["-x", BLEND_PLUGIN, "-f", BLEND_FUNCTION])
            .add_arg_flag("-p", args.multiscan_version.as_deref())
            .add_arg("-i")
            .add_arg(args.lsm1.to_string_lossy())
            .add_arg(args.lsm2.to_string_lossy())
            .add_arg("-o")
            .add_arg(args.merged_file().to_string_lossy())
            .end_args();
        Ok(script.close())
    }

    fn prepare_environment(
        &self,
        ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _args: &MergeLsmPairArgs,
    ) -> HashMap<String, String> {
        let library_path = &ctx.config().vaa3d.library_path;
        if library_path.trim().is_empty() {
            HashMap::new()
        } else {
            HashMap::from([(DY_LIBRARY_PATH.to_string(), library_path.clone())])
        }
    }

    fn failure_patterns(&self) -> &[Regex] {
        &self.failure_patterns
    }
}
