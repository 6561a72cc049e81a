//! # Built-in Services
//!
//! | name                  | kind        | output                          |
//! |-----------------------|-------------|---------------------------------|
//! | `fileCopy`            | in-process  | the destination path            |
//! | `lsmFileMetadata`     | external    | the JSON metadata path          |
//! | `archivedLsmMetadata` | composite   | the JSON metadata path          |
//! | `mergeLsmPair`        | external    | the merged `.v3draw` stack path |
//!
//! Every service checks that its output artifact is complete before doing any work, so
//! resubmitting a finished service returns the existing artifact.

pub mod archived_lsm_metadata;
pub mod file_copy;
pub mod lsm_file_metadata;
pub mod merge_lsm_pair;

pub use archived_lsm_metadata::{ArchivedLsmMetadataArgs, ArchivedLsmMetadataProcessor};
pub use file_copy::{FileCopyArgs, FileCopyProcessor};
pub use lsm_file_metadata::{LsmFileMetadataArgs, LsmFileMetadataProcessor};
pub use merge_lsm_pair::{MergeLsmPairArgs, MergeLsmPairProcessor};

use crate::args::ServiceArgs;
use crate::computation::ComputationResult;
use crate::constants::files::{
    PARTIAL_SUFFIX, V3DRAW_HEADER_LEN, V3DRAW_LEGACY_HEADER_LEN, V3DRAW_MAGIC,
};
use crate::error::Result;
use crate::models::JacsServiceData;
use crate::processor::ExeBasedServiceProcessor;
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Registry with every built-in service
pub fn default_registry() -> Result<ServiceRegistry> {
    ServiceRegistry::new()
        .with_service(ServiceDescriptor::from_processor(Arc::new(
            FileCopyProcessor::new(),
        )))?
        .with_service(ServiceDescriptor::from_processor(Arc::new(
            ExeBasedServiceProcessor::new(LsmFileMetadataProcessor::new()),
        )))?
        .with_service(ServiceDescriptor::from_processor(Arc::new(
            ArchivedLsmMetadataProcessor::new(),
        )))?
        .with_service(ServiceDescriptor::from_processor(Arc::new(
            ExeBasedServiceProcessor::new(MergeLsmPairProcessor::new()?),
        )))
}

/// Parse the record's arguments into `A`
pub(crate) fn parse_service_args<A: ServiceArgs>(sd: &JacsServiceData) -> ComputationResult<A> {
    Ok(A::parse(&sd.args)?)
}

/// `<path>.partial`, the in-flight name of an output artifact
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// True if `path` holds a complete, parsable JSON document
pub async fn is_complete_json_file(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(serde_json::from_slice::<serde_json::Value>(&content).is_ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// True if `path` is a complete Vaa3D raw stack: a valid header followed by exactly the
/// number of voxel bytes its dimensions and datatype declare
pub async fn is_v3draw_file(path: &Path) -> std::io::Result<bool> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata().await?.len();
    let mut header = Vec::with_capacity(V3DRAW_HEADER_LEN);
    file.take(V3DRAW_HEADER_LEN as u64)
        .read_to_end(&mut header)
        .await?;

    // a stack whose i32 reading does not add up may still be a legacy i16 stack
    Ok([V3DRAW_HEADER_LEN, V3DRAW_LEGACY_HEADER_LEN]
        .into_iter()
        .any(|header_len| v3draw_stack_len(&header, header_len) == Some(file_len)))
}

/// Total file length the header declares when read with `header_len` bytes of header
fn v3draw_stack_len(header: &[u8], header_len: usize) -> Option<u64> {
    if header.len() < header_len || !header.starts_with(V3DRAW_MAGIC) {
        return None;
    }
    let fields = &header[V3DRAW_MAGIC.len()..header_len];
    let little_endian = match fields[0] {
        b'L' => true,
        b'B' => false,
        _ => return None,
    };
    let read_i16 = |bytes: &[u8]| {
        let bytes = [bytes[0], bytes[1]];
        if little_endian {
            i16::from_le_bytes(bytes)
        } else {
            i16::from_be_bytes(bytes)
        }
    };
    let read_i32 = |bytes: &[u8]| {
        let bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if little_endian {
            i32::from_le_bytes(bytes)
        } else {
            i32::from_be_bytes(bytes)
        }
    };

    let voxel_bytes: u64 = match read_i16(&fields[1..3]) {
        1 => 1,
        2 => 2,
        4 => 4,
        _ => return None,
    };
    let dims = &fields[3..];
    let width = dims.len() / 4;
    let mut voxels: u64 = 1;
    for dim in dims.chunks_exact(width) {
        let size = if width == 4 {
            i64::from(read_i32(dim))
        } else {
            i64::from(read_i16(dim))
        };
        if size <= 0 {
            return None;
        }
        voxels = voxels.checked_mul(size as u64)?;
    }
    voxels
        .checked_mul(voxel_bytes)?
        .checked_add(header_len as u64)
}

/// Remove a file, treating an already missing file as success
pub(crate) async fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::services;

    #[test]
    fn test_default_registry_has_all_services() {
        let registry = default_registry().unwrap();
        assert_eq!(
            registry.service_names(),
            vec![
                services::ARCHIVED_LSM_METADATA,
                services::FILE_COPY,
                services::LSM_FILE_METADATA,
                services::MERGE_LSM_PAIR,
            ]
        );
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/data/out.json")),
            PathBuf::from("/data/out.json.partial")
        );
    }

    #[tokio::test]
    async fn test_json_completeness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        assert!(!is_complete_json_file(&path).await.unwrap());

        tokio::fs::write(&path, b"{\"channels\": [").await.unwrap();
        assert!(!is_complete_json_file(&path).await.unwrap());

        tokio::fs::write(&path, b"{\"channels\": []}").await.unwrap();
        assert!(is_complete_json_file(&path).await.unwrap());
    }

    /// Header plus voxel data for an `x`×`y`×`z`×`c` u16 stack
    fn v3draw_stack(dims: [i32; 4], legacy: bool, data_bytes: usize) -> Vec<u8> {
        let mut content = V3DRAW_MAGIC.to_vec();
        content.push(b'L');
        content.extend_from_slice(&2i16.to_le_bytes());
        for dim in dims {
            if legacy {
                content.extend_from_slice(&(dim as i16).to_le_bytes());
            } else {
                content.extend_from_slice(&dim.to_le_bytes());
            }
        }
        content.extend(std::iter::repeat(7u8).take(data_bytes));
        content
    }

    #[tokio::test]
    async fn test_v3draw_complete_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.v3draw");
        assert!(!is_v3draw_file(&path).await.unwrap());

        // 4 x 3 x 2 x 1 voxels of 2 bytes
        tokio::fs::write(&path, v3draw_stack([4, 3, 2, 1], false, 48))
            .await
            .unwrap();
        assert!(is_v3draw_file(&path).await.unwrap());

        tokio::fs::write(&path, v3draw_stack([4, 3, 2, 1], true, 48))
            .await
            .unwrap();
        assert!(is_v3draw_file(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_v3draw_rejects_incomplete_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.v3draw");

        tokio::fs::write(&path, V3DRAW_MAGIC).await.unwrap();
        assert!(!is_v3draw_file(&path).await.unwrap());

        // writer died after 10 of 200000 data bytes
        tokio::fs::write(&path, v3draw_stack([100, 100, 10, 1], false, 10))
            .await
            .unwrap();
        assert!(!is_v3draw_file(&path).await.unwrap());

        tokio::fs::write(&path, v3draw_stack([4, 3, 2, 1], false, 49))
            .await
            .unwrap();
        assert!(!is_v3draw_file(&path).await.unwrap());

        tokio::fs::write(&path, v3draw_stack([4, 0, 2, 1], false, 0))
            .await
            .unwrap();
        assert!(!is_v3draw_file(&path).await.unwrap());

        let mut unknown_type = v3draw_stack([1, 1, 1, 1], false, 3);
        unknown_type[V3DRAW_MAGIC.len() + 1] = 3;
        tokio::fs::write(&path, unknown_type).await.unwrap();
        assert!(!is_v3draw_file(&path).await.unwrap());

        tokio::fs::write(&path, b"not a raw image stack at all").await.unwrap();
        assert!(!is_v3draw_file(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_file_if_exists(&dir.path().join("gone")).await.unwrap());
    }
}
