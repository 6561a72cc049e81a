//! # Engine Configuration
//!
//! Settings are layered with the `config` crate:
//!
//! 1. built-in defaults ([`EngineConfig::default`])
//! 2. an optional TOML file (`config/jacs-services.toml` unless a path is given)
//! 3. environment variables prefixed `JACS__`, sections separated by `__`, e.g.
//!    `JACS__ENGINE__LOCAL_SLOTS=4` or `JACS__CLUSTER__SUBMIT_COMMAND="bsub -K -q short"`
//!
//! The merged result is validated before use.

use crate::constants::system::{DEFAULT_CONFIG_PATH, ENV_PREFIX, ENV_SEPARATOR};
use crate::error::{JacsError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub executables: ExecutablesConfig,
    pub lsm_metadata: LsmMetadataConfig,
    pub vaa3d: Vaa3dConfig,
    pub cluster: ClusterConfig,
    pub database: DatabaseConfig,
}

/// Dispatcher and pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Concurrent services processed on this host
    pub local_slots: usize,
    /// Concurrent services submitted to the cluster
    pub cluster_slots: usize,
    /// Upper bound between persisted-state re-checks while waiting for completion
    pub completion_recheck_interval_ms: u64,
    /// Base of per-service working directories when the service has no workspace
    pub default_working_dir: Option<String>,
    /// Re-checks of the output artifact after an external tool exits
    pub result_retries: u32,
    pub result_retry_interval_ms: u64,
    pub shell: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            local_slots: 8,
            cluster_slots: 64,
            completion_recheck_interval_ms: 5000,
            default_working_dir: None,
            result_retries: 3,
            result_retry_interval_ms: 1000,
            shell: "bash".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn completion_recheck_interval(&self) -> Duration {
        Duration::from_millis(self.completion_recheck_interval_ms)
    }

    pub fn result_retry_interval(&self) -> Duration {
        Duration::from_millis(self.result_retry_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutablesConfig {
    /// Directory that relative executable names are resolved against
    pub module_base: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmMetadataConfig {
    pub perl_executable: String,
    /// Perl script dumping LSM metadata as JSON
    pub script_path: String,
    /// Prepended to PERL5LIB
    pub perl_module_base: String,
}

impl Default for LsmMetadataConfig {
    fn default() -> Self {
        Self {
            perl_executable: "perl".to_string(),
            script_path: "scripts/single_neuron/lsm_json_dump.pl".to_string(),
            perl_module_base: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vaa3dConfig {
    pub executable: String,
    /// Prepended to the dynamic library path
    pub library_path: String,
    /// Start a virtual framebuffer before invoking Vaa3D
    pub use_xvfb: bool,
    /// Display number; derived from the service id when unset
    pub display_port: Option<u16>,
}

impl Default for Vaa3dConfig {
    fn default() -> Self {
        Self {
            executable: "vaa3d".to_string(),
            library_path: String::new(),
            use_xvfb: false,
            display_port: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Blocking submit command the cluster runner prefixes to the script invocation
    pub submit_command: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            submit_command: vec!["bsub".to_string(), "-K".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string; the in-memory store is used when unset
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then the TOML file, then `JACS__` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        debug!(path = %path.display(), "Loading engine configuration");

        let settings = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("cluster.submit_command"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.local_slots == 0 {
            return Err(JacsError::Configuration(
                "engine.local_slots must be greater than zero".to_string(),
            ));
        }
        if self.engine.cluster_slots == 0 {
            return Err(JacsError::Configuration(
                "engine.cluster_slots must be greater than zero".to_string(),
            ));
        }
        if self.engine.completion_recheck_interval_ms == 0 {
            return Err(JacsError::Configuration(
                "engine.completion_recheck_interval_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(dir) = self.engine.default_working_dir.as_deref() {
            if !dir.trim().is_empty() && !Path::new(dir).is_absolute() {
                return Err(JacsError::Configuration(format!(
                    "engine.default_working_dir must be an absolute path, got '{dir}'"
                )));
            }
        }
        for (key, value) in [
            ("engine.shell", &self.engine.shell),
            ("lsm_metadata.perl_executable", &self.lsm_metadata.perl_executable),
            ("vaa3d.executable", &self.vaa3d.executable),
        ] {
            if value.trim().is_empty() {
                return Err(JacsError::Configuration(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }

    /// Resolve a relative executable or script against `executables.module_base`
    pub fn full_executable_name(&self, name: &str) -> String {
        let base = self.executables.module_base.trim();
        if base.is_empty() || Path::new(name).is_absolute() {
            name.to_string()
        } else {
            Path::new(base).join(name).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine.local_slots, 8);
        assert_eq!(config.cluster.submit_command, vec!["bsub", "-K"]);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\nlocal_slots = 2\n\n[vaa3d]\nexecutable = \"/opt/vaa3d/vaa3d\"\nuse_xvfb = true\n"
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.local_slots, 2);
        assert_eq!(config.engine.cluster_slots, 64);
        assert_eq!(config.vaa3d.executable, "/opt/vaa3d/vaa3d");
        assert!(config.vaa3d.use_xvfb);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = EngineConfig::load(Some(Path::new("/nonexistent/jacs.toml"))).unwrap();
        assert_eq!(config.engine.shell, "bash");
    }

    #[test]
    fn test_validation_rejects_relative_working_dir() {
        let mut config = EngineConfig::default();
        config.engine.default_working_dir = Some("work/jacs".to_string());
        assert!(matches!(config.validate(), Err(JacsError::Configuration(_))));

        config.engine.default_working_dir = Some("/var/tmp/jacs".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_zero_slots() {
        let mut config = EngineConfig::default();
        config.engine.cluster_slots = 0;
        assert!(matches!(config.validate(), Err(JacsError::Configuration(_))));
    }

    #[test]
    fn test_full_executable_name() {
        let mut config = EngineConfig::default();
        assert_eq!(config.full_executable_name("tools/merge.sh"), "tools/merge.sh");

        config.executables.module_base = "/groups/jacs/bin".to_string();
        assert_eq!(
            config.full_executable_name("tools/merge.sh"),
            "/groups/jacs/bin/tools/merge.sh"
        );
        assert_eq!(config.full_executable_name("/usr/bin/perl"), "/usr/bin/perl");
    }
}
