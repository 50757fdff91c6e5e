//! Process-backed [`BuildPipeline`]: writes the source into a fresh scratch
//! directory and runs the toolchain's build and run commands there.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use runbox_core::ToolchainId;
use runbox_settings::{PipelineSettings, ToolchainSettings};
use thiserror::Error;
use tracing::{debug, warn};

use crate::outcome::{BuildOutcome, BuildPipeline};

/// Captured result of one child process.
#[derive(Debug)]
struct StepOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl StepOutput {
    fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn combined(self) -> String {
        let mut text = self.stdout;
        text.push_str(&self.stderr);
        text
    }
}

#[derive(Debug, Error)]
enum StepError {
    #[error("failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Builds and runs source with locally installed toolchains.
#[derive(Clone, Debug)]
pub struct ProcessPipeline {
    toolchains: BTreeMap<String, ToolchainSettings>,
    timeout: Duration,
}

impl ProcessPipeline {
    /// Create a pipeline from settings.
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            toolchains: settings.toolchains.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    /// Names of the configured toolchains.
    pub fn toolchain_names(&self) -> impl Iterator<Item = &str> {
        self.toolchains.keys().map(String::as_str)
    }

    async fn build_then_run(
        &self,
        source: &str,
        toolchain: &ToolchainSettings,
    ) -> Result<BuildOutcome, StepError> {
        // Fresh directory per invocation; removed on drop.
        let scratch = tempfile::Builder::new()
            .prefix("runbox-")
            .tempdir()
            .map_err(StepError::Scratch)?;
        tokio::fs::write(scratch.path().join(&toolchain.source_file), source)
            .await
            .map_err(StepError::Scratch)?;

        let build = run_step(&toolchain.build, scratch.path(), self.timeout).await?;
        if !build.succeeded() {
            debug!(exit_code = ?build.exit_code, "build failed");
            return Ok(BuildOutcome::BuildFailure(build.combined()));
        }

        let run = run_step(&toolchain.run, scratch.path(), self.timeout).await?;
        if run.succeeded() {
            return Ok(BuildOutcome::Success(run.stdout));
        }
        let status = run
            .exit_code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        Ok(BuildOutcome::OtherError(format!(
            "program exited with status {status}: {}",
            run.stderr.trim_end()
        )))
    }
}

#[async_trait]
impl BuildPipeline for ProcessPipeline {
    async fn build_and_run(&self, source: &str, toolchain: &ToolchainId) -> BuildOutcome {
        let Some(settings) = self.toolchains.get(toolchain.as_str()) else {
            return BuildOutcome::OtherError(format!("unknown toolchain '{toolchain}'"));
        };
        match self.build_then_run(source, settings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%toolchain, error = %e, "build pipeline step failed");
                BuildOutcome::OtherError(e.to_string())
            }
        }
    }
}

/// Run one argv in `dir`, killing the child if it outlives `timeout`.
async fn run_step(argv: &[String], dir: &Path, timeout: Duration) -> Result<StepOutput, StepError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(StepOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        });
    };

    let mut cmd = tokio::process::Command::new(program);
    let _ = cmd
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, dir = %dir.display(), "spawning process");
    let child = cmd.spawn().map_err(|source| StepError::Spawn {
        program: program.clone(),
        source,
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| StepError::TimedOut {
            program: program.clone(),
            timeout,
        })?
        .map_err(|source| StepError::Wait {
            program: program.clone(),
            source,
        })?;

    Ok(StepOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn pipeline(build: &str, run: &str, timeout_ms: u64) -> ProcessPipeline {
        let mut toolchains = BTreeMap::new();
        let _ = toolchains.insert(
            "stable".to_string(),
            ToolchainSettings {
                source_file: "main.txt".into(),
                build: sh(build),
                run: sh(run),
            },
        );
        ProcessPipeline::from_settings(&PipelineSettings {
            timeout_ms,
            toolchains,
        })
    }

    #[tokio::test]
    async fn success_returns_stdout() {
        let p = pipeline("test -f main.txt", "cat main.txt", 5_000);
        let outcome = p.build_and_run("hello\n", &"stable".into()).await;
        assert_eq!(outcome, BuildOutcome::Success("hello\n".into()));
    }

    #[tokio::test]
    async fn build_failure_returns_combined_output() {
        let p = pipeline(
            "echo 'main.txt:1:1: error: nope' >&2; exit 1",
            "echo unreachable",
            5_000,
        );
        let outcome = p.build_and_run("x", &"stable".into()).await;
        assert_eq!(
            outcome,
            BuildOutcome::BuildFailure("main.txt:1:1: error: nope\n".into())
        );
    }

    #[tokio::test]
    async fn run_failure_is_other_error() {
        let p = pipeline("true", "echo crashed >&2; exit 3", 5_000);
        let outcome = p.build_and_run("x", &"stable".into()).await;
        assert_eq!(
            outcome,
            BuildOutcome::OtherError("program exited with status 3: crashed".into())
        );
    }

    #[tokio::test]
    async fn unknown_toolchain_is_other_error() {
        let p = pipeline("true", "true", 5_000);
        let outcome = p.build_and_run("x", &"beta".into()).await;
        assert_eq!(outcome, BuildOutcome::OtherError("unknown toolchain 'beta'".into()));
    }

    #[tokio::test]
    async fn timeout_is_other_error() {
        let p = pipeline("sleep 5", "true", 100);
        let outcome = p.build_and_run("x", &"stable".into()).await;
        assert_matches!(outcome, BuildOutcome::OtherError(msg) => {
            assert!(msg.contains("timed out"));
        });
    }

    #[tokio::test]
    async fn missing_program_is_other_error() {
        let mut toolchains = BTreeMap::new();
        let _ = toolchains.insert(
            "stable".to_string(),
            ToolchainSettings {
                source_file: "main.txt".into(),
                build: vec!["/definitely/not/a/compiler".into()],
                run: sh("true"),
            },
        );
        let p = ProcessPipeline::from_settings(&PipelineSettings {
            timeout_ms: 5_000,
            toolchains,
        });
        let outcome = p.build_and_run("x", &"stable".into()).await;
        assert_matches!(outcome, BuildOutcome::OtherError(msg) => {
            assert!(msg.contains("failed to spawn"));
        });
    }

    #[tokio::test]
    async fn invocations_do_not_share_scratch_directories() {
        let p = pipeline("test ! -f marker && touch marker", "pwd", 5_000);
        let first = p.build_and_run("a", &"stable".into()).await;
        let second = p.build_and_run("b", &"stable".into()).await;
        assert_matches!((first, second), (BuildOutcome::Success(a), BuildOutcome::Success(b)) => {
            assert_ne!(a, b);
        });
    }

    #[test]
    fn toolchain_names_listed() {
        let p = ProcessPipeline::from_settings(&PipelineSettings::default());
        assert_eq!(p.toolchain_names().collect::<Vec<_>>(), vec!["stable"]);
    }
}
