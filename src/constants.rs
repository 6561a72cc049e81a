//! # System Constants
//!
//! Names, defaults and file-format markers shared by the engine and the built-in services.

// Re-export state types for convenience
pub use crate::state_machine::JacsServiceState as ServiceStatus;

/// Registered service names
pub mod services {
    pub const FILE_COPY: &str = "fileCopy";
    pub const LSM_FILE_METADATA: &str = "lsmFileMetadata";
    pub const ARCHIVED_LSM_METADATA: &str = "archivedLsmMetadata";
    pub const MERGE_LSM_PAIR: &str = "mergeLsmPair";
}

/// Process-level settings and environment variable names
pub mod system {
    /// Default location of the layered configuration file
    pub const DEFAULT_CONFIG_PATH: &str = "config/jacs-services.toml";
    /// Prefix for environment overrides, e.g. `JACS__ENGINE__LOCAL_SLOTS=4`
    pub const ENV_PREFIX: &str = "JACS";
    pub const ENV_SEPARATOR: &str = "__";
    /// Selects the logging profile (test, development, production)
    pub const ENVIRONMENT_VAR: &str = "JACS_ENV";
    /// Selects the console formatter (`json` or anything else for text)
    pub const LOG_FORMAT_VAR: &str = "JACS_LOG_FORMAT";
    /// Owner recorded when a submission does not name one
    pub const DEFAULT_OWNER: &str = "system";
    /// Attempts made when a compare-and-set state update loses a race
    pub const MAX_TRANSITION_ATTEMPTS: usize = 5;
    /// Attempts at persisting ERROR after a dispatch failed with a store error
    pub const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
    pub const TERMINAL_WRITE_BACKOFF_MS: u64 = 100;
}

/// Environment variables injected into external tool invocations
pub mod env_vars {
    #[cfg(target_os = "macos")]
    pub const DY_LIBRARY_PATH: &str = "DYLD_LIBRARY_PATH";
    #[cfg(not(target_os = "macos"))]
    pub const DY_LIBRARY_PATH: &str = "LD_LIBRARY_PATH";
    pub const PERL5LIB: &str = "PERL5LIB";
    pub const DISPLAY: &str = "DISPLAY";
}

/// Output artifact names and format markers
pub mod files {
    /// Leading bytes of a Vaa3D raw image stack
    pub const V3DRAW_MAGIC: &[u8] = b"raw_image_stack_by_hpeng";
    /// Magic, endianness byte (`L`/`B`), datatype code (2 bytes), four i32 dimensions
    pub const V3DRAW_HEADER_LEN: usize = 43;
    /// Older stacks store the four dimensions as i16
    pub const V3DRAW_LEGACY_HEADER_LEN: usize = 35;
    /// Default name of the merged stack produced by `mergeLsmPair`
    pub const MERGED_V3DRAW: &str = "merged.v3draw";
    /// Suffix used for in-flight copies; renamed away once complete
    pub const PARTIAL_SUFFIX: &str = ".partial";
}
