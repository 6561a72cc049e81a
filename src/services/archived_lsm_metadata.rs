use super::{is_complete_json_file, parse_service_args, remove_file_if_exists};
use crate::args::{ArgSpec, ArgumentError, ParsedArgs, ServiceArgs, ServiceMetaData};
use crate::computation::{ComputationError, ComputationResult};
use crate::constants::services::{ARCHIVED_LSM_METADATA, FILE_COPY, LSM_FILE_METADATA};
use crate::models::{JacsServiceData, ServiceSubmission};
use crate::processor::{last_child_result, ServiceContext, ServiceProcessor};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLsmMetadataArgs {
    pub archived_lsm: PathBuf,
    pub output_metadata: PathBuf,
    pub keep_intermediate_lsm: bool,
}

impl ServiceArgs for ArchivedLsmMetadataArgs {
    fn arg_specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(&["-archivedLSM"], "Archived LSM file"),
            ArgSpec::required(&["-outputLSMMetadata"], "Destination of the JSON metadata"),
            ArgSpec::flag(
                &["-keepIntermediateLSM"],
                "Keep the working copy of the LSM file",
            ),
        ]
    }

    fn from_parsed(parsed: &ParsedArgs) -> Result<Self, ArgumentError> {
        Ok(Self {
            archived_lsm: parsed.required_path("-archivedLSM")?,
            output_metadata: parsed.required_path("-outputLSMMetadata")?,
            keep_intermediate_lsm: parsed.flag("-keepIntermediateLSM"),
        })
    }
}

/// Validated input plus the working copy location
#[derive(Debug, Clone)]
pub struct ArchivedLsmMetadataInput {
    pub args: ArchivedLsmMetadataArgs,
    pub working_lsm: PathBuf,
}

/// Metadata of an archived LSM file: a `fileCopy` into the service's working directory
/// followed by `lsmFileMetadata` on the copy.
#[derive(Debug, Default)]
pub struct ArchivedLsmMetadataProcessor;

impl ArchivedLsmMetadataProcessor {
    pub fn new() -> Self {
        Self
    }
}

fn working_copy(working_dir: &Path, archived: &Path) -> ComputationResult<PathBuf> {
    let file_name = archived.file_name().ok_or_else(|| {
        ComputationError::from(ArgumentError::InvalidValue {
            flag: "-archivedLSM".to_string(),
            value: archived.display().to_string(),
            reason: "does not name a file".to_string(),
        })
    })?;
    Ok(working_dir.join(file_name))
}

#[async_trait]
impl ServiceProcessor for ArchivedLsmMetadataProcessor {
    type Input = ArchivedLsmMetadataInput;
    type Output = PathBuf;

    fn metadata(&self) -> ServiceMetaData {
        ArchivedLsmMetadataArgs::metadata(
            ARCHIVED_LSM_METADATA,
            "Extract the metadata of an archived LSM file",
        )
    }

    async fn pre_process_data(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<ArchivedLsmMetadataInput> {
        let args: ArchivedLsmMetadataArgs = parse_service_args(sd)?;
        let working_lsm = working_copy(&ctx.working_directory(sd), &args.archived_lsm)?;
        Ok(ArchivedLsmMetadataInput { args, working_lsm })
    }

    async fn is_result_available(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        input: &ArchivedLsmMetadataInput,
    ) -> ComputationResult<bool> {
        Ok(is_complete_json_file(&input.args.output_metadata).await?)
    }

    async fn retrieve_result(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        input: &ArchivedLsmMetadataInput,
    ) -> ComputationResult<PathBuf> {
        Ok(input.args.output_metadata.clone())
    }

    async fn submit_child_services(
        &self,
        ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &ArchivedLsmMetadataInput,
    ) -> ComputationResult<Vec<JacsServiceData>> {
        let copy = ctx
            .submit_child(
                sd,
                ServiceSubmission::new(FILE_COPY)
                    .arg("-src", input.args.archived_lsm.to_string_lossy())
                    .arg("-dst", input.working_lsm.to_string_lossy()),
            )
            .await?;
        let metadata = ctx
            .submit_child(
                sd,
                ServiceSubmission::new(LSM_FILE_METADATA)
                    .arg("-inputLSM", input.working_lsm.to_string_lossy())
                    .arg(
                        "-outputLSMMetadata",
                        input.args.output_metadata.to_string_lossy(),
                    )
                    .depends_on(copy.id),
            )
            .await?;
        Ok(vec![copy, metadata])
    }

    async fn local_process_data(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        _input: &ArchivedLsmMetadataInput,
        children: &[JacsServiceData],
    ) -> ComputationResult<PathBuf> {
        last_child_result(children)
    }

    async fn post_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
        input: &ArchivedLsmMetadataInput,
        _output: &PathBuf,
    ) -> ComputationResult<()> {
        if !input.args.keep_intermediate_lsm && remove_file_if_exists(&input.working_lsm).await? {
            debug!(
                service_id = %sd.id,
                path = %input.working_lsm.display(),
                "Removed intermediate LSM copy"
            );
        }
        Ok(())
    }
}
