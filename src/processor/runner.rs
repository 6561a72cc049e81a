//! # External Process Runners
//!
//! A runner executes a rendered [`ExternalCodeBlock`] for one processing location. The script is
//! written to the service working directory as `<name>.sh` and launched through bash, directly
//! for local processing or behind the configured submit prefix (e.g. `bsub -K`) for cluster
//! processing.
//!
//! stdout and stderr are forwarded line by line to an [`OutputErrorChecker`]. The first line it
//! flags kills the process and fails the run; otherwise a nonzero exit code fails it.

use super::script::ExternalCodeBlock;
use crate::config::EngineConfig;
use crate::models::{ProcessingLocation, ServiceId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Output lines kept for error reporting
const TAIL_LINES: usize = 20;

/// Environment variables whose override is prepended to the inherited value
const PATH_LIKE_VARS: &[&str] = &["PATH", "LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH", "PERL5LIB"];

#[derive(Debug, Error)]
pub enum ExternalProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with code {code}{}", format_tail(.tail))]
    NonZeroExit { code: i32, tail: Vec<String> },

    #[error("failure detected in process output: {line}")]
    FailurePattern { line: String },

    #[error("process was terminated by a signal")]
    Killed,

    #[error("io error while running process: {0}")]
    Io(#[from] std::io::Error),
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("; last output:\n{}", tail.join("\n"))
    }
}

/// Decides whether a line of process output signals a failure
pub trait OutputErrorChecker: Send + Sync {
    fn has_errors(&self, line: &str) -> bool;
}

impl<F> OutputErrorChecker for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn has_errors(&self, line: &str) -> bool {
        self(line)
    }
}

/// Everything a runner needs to launch one external invocation
#[derive(Debug, Clone)]
pub struct ExternalProcessRequest {
    pub service_id: ServiceId,
    pub service_name: String,
    pub script: ExternalCodeBlock,
    pub environment: HashMap<String, String>,
    pub working_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProcessOutcome {
    pub exit_code: i32,
    pub script_path: PathBuf,
    pub output_lines: usize,
}

/// Executes scripts for one processing location
#[async_trait]
pub trait ExternalProcessRunner: Send + Sync + fmt::Debug {
    fn location(&self) -> ProcessingLocation;

    async fn run(
        &self,
        request: ExternalProcessRequest,
        checker: &dyn OutputErrorChecker,
    ) -> Result<ExternalProcessOutcome, ExternalProcessError>;
}

/// Combine overrides with the inherited environment, prepending to path-like variables
pub fn merge_environment(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    overrides
        .iter()
        .map(|(key, value)| {
            let merged = match std::env::var(key) {
                Ok(inherited) if PATH_LIKE_VARS.contains(&key.as_str()) && !inherited.is_empty() => {
                    format!("{value}:{inherited}")
                }
                _ => value.clone(),
            };
            (key.clone(), merged)
        })
        .collect()
}

/// Runs scripts through bash, optionally behind a launcher prefix
#[derive(Debug, Clone)]
pub struct ShellProcessRunner {
    location: ProcessingLocation,
    shell: String,
    launcher: Vec<String>,
}

impl ShellProcessRunner {
    pub fn local(shell: impl Into<String>) -> Self {
        Self {
            location: ProcessingLocation::Local,
            shell: shell.into(),
            launcher: Vec::new(),
        }
    }

    /// Submit through a blocking grid command such as `bsub -K`
    pub fn cluster(shell: impl Into<String>, submit_command: Vec<String>) -> Self {
        Self {
            location: ProcessingLocation::Cluster,
            shell: shell.into(),
            launcher: submit_command,
        }
    }

    fn command_line(&self, script_path: &std::path::Path) -> Vec<String> {
        let mut argv = self.launcher.clone();
        argv.push(self.shell.clone());
        argv.push(script_path.to_string_lossy().into_owned());
        argv
    }
}

#[async_trait]
impl ExternalProcessRunner for ShellProcessRunner {
    fn location(&self) -> ProcessingLocation {
        self.location
    }

    async fn run(
        &self,
        request: ExternalProcessRequest,
        checker: &dyn OutputErrorChecker,
    ) -> Result<ExternalProcessOutcome, ExternalProcessError> {
        tokio::fs::create_dir_all(&request.working_directory).await?;
        let script_path = request
            .working_directory
            .join(format!("{}.sh", request.service_name));
        tokio::fs::write(&script_path, request.script.render()).await?;

        let argv = self.command_line(&script_path);
        let (program, args) = argv.split_first().ok_or_else(|| ExternalProcessError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(merge_environment(&request.environment))
            .current_dir(&request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            service_id = %request.service_id,
            service_name = %request.service_name,
            location = %self.location,
            script = %script_path.display(),
            "🚀 RUNNER: Launching external process"
        );

        let mut child = cmd.spawn().map_err(|source| ExternalProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut output_lines = 0usize;
        while let Some(line) = rx.recv().await {
            output_lines += 1;
            trace!(service_id = %request.service_id, line = %line, "process output");
            if checker.has_errors(&line) {
                warn!(
                    service_id = %request.service_id,
                    line = %line,
                    "❌ RUNNER: Failure pattern matched, killing process"
                );
                // kill_on_drop covers the case where start_kill fails
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExternalProcessError::FailurePattern { line });
            }
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let status = child.wait().await?;
        match status.code() {
            Some(0) => {
                debug!(
                    service_id = %request.service_id,
                    output_lines,
                    "✅ RUNNER: External process finished"
                );
                Ok(ExternalProcessOutcome {
                    exit_code: 0,
                    script_path,
                    output_lines,
                })
            }
            Some(code) => Err(ExternalProcessError::NonZeroExit {
                code,
                tail: tail.into_iter().collect(),
            }),
            None => Err(ExternalProcessError::Killed),
        }
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Runners keyed by processing location
#[derive(Debug, Clone, Default)]
pub struct ProcessRunners {
    runners: HashMap<ProcessingLocation, Arc<dyn ExternalProcessRunner>>,
}

impl ProcessRunners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local bash runner plus the cluster submit runner from configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new()
            .with_runner(Arc::new(ShellProcessRunner::local(&config.engine.shell)))
            .with_runner(Arc::new(ShellProcessRunner::cluster(
                &config.engine.shell,
                config.cluster.submit_command.clone(),
            )))
    }

    /// Register a runner, replacing any existing one for the same location
    pub fn with_runner(mut self, runner: Arc<dyn ExternalProcessRunner>) -> Self {
        self.runners.insert(runner.location(), runner);
        self
    }

    pub fn get(&self, location: ProcessingLocation) -> Option<Arc<dyn ExternalProcessRunner>> {
        self.runners.get(&location).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::script::ScriptWriter;

    fn request(dir: &std::path::Path, statements: &[&str]) -> ExternalProcessRequest {
        let mut writer = ScriptWriter::new();
        for s in statements {
            writer.add(*s);
        }
        ExternalProcessRequest {
            service_id: uuid::Uuid::new_v4(),
            service_name: "sample".to_string(),
            script: writer.close(),
            environment: HashMap::from([("SAMPLE_VALUE".to_string(), "42".to_string())]),
            working_directory: dir.join("sample_work"),
        }
    }

    fn never(_: &str) -> bool {
        false
    }

    #[tokio::test]
    async fn test_successful_run_writes_script() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellProcessRunner::local("bash");
        let outcome = runner
            .run(request(dir.path(), &["echo value=$SAMPLE_VALUE"]), &never)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output_lines, 1);
        assert!(outcome.script_path.ends_with("sample_work/sample.sh"));
        assert!(outcome.script_path.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellProcessRunner::local("bash");
        let err = runner
            .run(request(dir.path(), &["echo about to fail >&2", "exit 3"]), &never)
            .await
            .unwrap_err();

        match err {
            ExternalProcessError::NonZeroExit { code, tail } => {
                assert_eq!(code, 3);
                assert_eq!(tail, vec!["about to fail".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_pattern_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("should_not_exist");
        let script = format!("sleep 5 && touch {}", marker.display());
        let runner = ShellProcessRunner::local("bash");

        let checker = |line: &str| line.contains("FATAL");
        let started = std::time::Instant::now();
        let err = runner
            .run(request(dir.path(), &["echo FATAL: plugin crashed", script.as_str()]), &checker)
            .await
            .unwrap_err();

        assert!(matches!(err, ExternalProcessError::FailurePattern { .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellProcessRunner::local("/definitely/not/a/shell");
        let err = runner
            .run(request(dir.path(), &["true"]), &never)
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalProcessError::Spawn { .. }));
    }

    #[test]
    fn test_merge_environment_prepends_paths() {
        std::env::set_var("PERL5LIB", "/usr/share/perl5");
        let merged = merge_environment(&HashMap::from([
            ("PERL5LIB".to_string(), "/opt/jacs/perl".to_string()),
            ("VAA3D_MODE".to_string(), "batch".to_string()),
        ]));
        assert_eq!(merged["PERL5LIB"], "/opt/jacs/perl:/usr/share/perl5");
        assert_eq!(merged["VAA3D_MODE"], "batch");
    }

    #[test]
    fn test_runners_by_location() {
        let runners = ProcessRunners::from_config(&EngineConfig::default());
        assert_eq!(
            runners.get(ProcessingLocation::Cluster).unwrap().location(),
            ProcessingLocation::Cluster
        );
        assert!(ProcessRunners::new().get(ProcessingLocation::Local).is_none());
    }
}
