use super::{parse_service_args, partial_path, remove_file_if_exists};
use crate::args::{ArgSpec, ArgumentError, ParsedArgs, ServiceArgs, ServiceMetaData};
use crate::computation::ComputationResult;
use crate::constants::services::FILE_COPY;
use crate::models::JacsServiceData;
use crate::processor::{ServiceContext, ServiceProcessor};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopyArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    pub delete_source: bool,
}

impl ServiceArgs for FileCopyArgs {
    fn arg_specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(&["-src"], "Source file"),
            ArgSpec::required(&["-dst"], "Destination file"),
            ArgSpec::flag(&["-mv"], "Remove the source once the copy is complete"),
        ]
    }

    fn from_parsed(parsed: &ParsedArgs) -> Result<Self, ArgumentError> {
        Ok(Self {
            source: parsed.required_path("-src")?,
            target: parsed.required_path("-dst")?,
            delete_source: parsed.flag("-mv"),
        })
    }
}

/// Copies (or moves) a single file.
///
/// The copy is written to `<dst>.partial` and renamed into place, so a destination with the
/// source's size is always a finished copy.
#[derive(Debug, Default)]
pub struct FileCopyProcessor;

impl FileCopyProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceProcessor for FileCopyProcessor {
    type Input = FileCopyArgs;
    type Output = PathBuf;

    fn metadata(&self) -> ServiceMetaData {
        FileCopyArgs::metadata(FILE_COPY, "Copy or move a file")
    }

    async fn pre_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
    ) -> ComputationResult<FileCopyArgs> {
        parse_service_args(sd)
    }

    async fn is_result_available(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &FileCopyArgs,
    ) -> ComputationResult<bool> {
        let target = match tokio::fs::metadata(&args.target).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match tokio::fs::metadata(&args.source).await {
            Ok(source) => Ok(source.len() == target.len()),
            // a completed move leaves only the target behind
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(args.delete_source),
            Err(e) => Err(e.into()),
        }
    }

    async fn retrieve_result(
        &self,
        _ctx: &ServiceContext,
        _sd: &JacsServiceData,
        args: &FileCopyArgs,
    ) -> ComputationResult<PathBuf> {
        Ok(args.target.clone())
    }

    async fn local_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
        args: &FileCopyArgs,
        _children: &[JacsServiceData],
    ) -> ComputationResult<PathBuf> {
        if let Some(parent) = args.target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&args.target);
        let bytes = tokio::fs::copy(&args.source, &partial).await?;
        tokio::fs::rename(&partial, &args.target).await?;
        info!(
            service_id = %sd.id,
            source = %args.source.display(),
            target = %args.target.display(),
            bytes,
            "📄 FILE_COPY: Copied file"
        );
        Ok(args.target.clone())
    }

    async fn post_process_data(
        &self,
        _ctx: &ServiceContext,
        sd: &JacsServiceData,
        args: &FileCopyArgs,
        _output: &PathBuf,
    ) -> ComputationResult<()> {
        if args.delete_source && remove_file_if_exists(&args.source).await? {
            debug!(service_id = %sd.id, source = %args.source.display(), "Removed moved source");
        }
        Ok(())
    }
}
