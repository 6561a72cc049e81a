use super::processors::test_registry;
use jacs_services::config::EngineConfig;
use jacs_services::{
    InMemoryServiceDataPersistence, JacsServiceData, JacsServiceDataPersistence,
    JacsServiceEngine, JacsServiceState, ServiceId,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Fake Vaa3D: writes a raw stack header to the `-o` target and logs each invocation
const FAKE_VAA3D: &str = r#"#!/bin/bash
echo "$@" >> "$(dirname "$0")/vaa3d.calls"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo "Plugin blend_multiscan started"
# 2 x 2 x 1 x 1 u8 stack
printf 'raw_image_stack_by_hpengL\x01\x00\x02\x00\x00\x00\x02\x00\x00\x00\x01\x00\x00\x00\x01\x00\x00\x00abcd' > "$out"
"#;

/// Fake Vaa3D that reports a plugin failure but still exits 0
const FAILING_PLUGIN_VAA3D: &str = r#"#!/bin/bash
echo "$@" >> "$(dirname "$0")/vaa3d.calls"
echo "ERROR: Fail to call the plugin blend_multiscan"
sleep 2
exit 0
"#;

const CRASHING_VAA3D: &str = r#"#!/bin/bash
echo "$@" >> "$(dirname "$0")/vaa3d.calls"
echo "segmentation fault" >&2
exit 3
"#;

/// Fake perl: ignores the script argument and prints JSON describing the input
const FAKE_PERL: &str = r#"#!/bin/bash
echo "$2" >> "$(dirname "$0")/perl.calls"
printf '{"input": "%s", "channels": 2}\n' "$2"
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vaa3dBehavior {
    Succeed,
    PluginFailure,
    NonZeroExit,
}

/// Temporary directory with fake tools and a matching engine configuration
pub struct TestEnv {
    pub dir: TempDir,
    pub config: EngineConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_vaa3d(Vaa3dBehavior::Succeed)
    }

    pub fn with_vaa3d(behavior: Vaa3dBehavior) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let tools = dir.path().join("tools");
        std::fs::create_dir_all(&tools).expect("tools dir");

        let vaa3d = match behavior {
            Vaa3dBehavior::Succeed => FAKE_VAA3D,
            Vaa3dBehavior::PluginFailure => FAILING_PLUGIN_VAA3D,
            Vaa3dBehavior::NonZeroExit => CRASHING_VAA3D,
        };
        write_executable(&tools.join("vaa3d"), vaa3d);
        write_executable(&tools.join("perl"), FAKE_PERL);

        let mut config = EngineConfig::default();
        config.engine.default_working_dir = Some(dir.path().join("work").display().to_string());
        config.engine.completion_recheck_interval_ms = 200;
        config.engine.result_retries = 1;
        config.engine.result_retry_interval_ms = 10;
        config.vaa3d.executable = tools.join("vaa3d").display().to_string();
        config.lsm_metadata.perl_executable = tools.join("perl").display().to_string();

        Self { dir, config }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn path_str(&self, relative: &str) -> String {
        self.path(relative).display().to_string()
    }

    /// Write `content` to `relative`, creating parent directories
    pub fn file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        std::fs::write(&path, content).expect("write file");
        path
    }

    /// Recorded invocations of a fake tool
    pub fn calls(&self, tool: &str) -> Vec<String> {
        std::fs::read_to_string(self.path(&format!("tools/{tool}.calls")))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn engine(&self) -> JacsServiceEngine {
        self.engine_with_store(Arc::new(InMemoryServiceDataPersistence::new()))
    }

    pub fn engine_with_store(&self, store: Arc<dyn JacsServiceDataPersistence>) -> JacsServiceEngine {
        JacsServiceEngine::builder()
            .config(self.config.clone())
            .persistence(store)
            .registry(test_registry())
            .build()
            .expect("engine")
    }

    /// Engine with its scheduling loop already running
    pub fn started_engine(&self) -> JacsServiceEngine {
        let engine = self.engine();
        engine.start().expect("start engine");
        engine
    }
}

fn write_executable(path: &Path, content: &str) {
    std::fs::write(path, content).expect("write tool");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod tool");
}

/// Wait for a terminal state, failing the test instead of hanging
pub async fn wait_done(engine: &JacsServiceEngine, id: ServiceId) -> JacsServiceData {
    tokio::time::timeout(Duration::from_secs(20), engine.wait_for_completion(id))
        .await
        .expect("service did not finish in time")
        .expect("wait for completion")
}

/// Poll until the service reaches `state`
pub async fn wait_for_state(engine: &JacsServiceEngine, id: ServiceId, state: JacsServiceState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = engine
                .get_service_by_id(id)
                .await
                .expect("lookup")
                .expect("service exists");
            if current.state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("state not reached in time");
}

/// Poll until `id` has `count` children
pub async fn wait_for_children(
    engine: &JacsServiceEngine,
    id: ServiceId,
    count: usize,
) -> Vec<JacsServiceData> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let children = engine.get_child_services(id).await.expect("children");
            if children.len() == count {
                return children;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("children not submitted in time")
}

/// Last event value, usually the failure or cancellation reason
pub fn last_event_value(sd: &JacsServiceData) -> String {
    sd.last_event().map(|e| e.value.clone()).unwrap_or_default()
}
