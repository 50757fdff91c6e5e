//! `run` command execution: pipeline invocation plus diagnostic correlation.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use runbox_core::{Command, RunRequest};
use tracing::{debug, error, info, instrument};

use crate::diagnostics::DiagnosticParser;
use crate::outcome::{BuildOutcome, BuildPipeline};

/// Executes `run` commands against a [`BuildPipeline`] and shapes the
/// `output` response.
///
/// Constructed once at startup and shared by every session.
#[derive(Clone)]
pub struct RunService {
    pipeline: Arc<dyn BuildPipeline>,
    parser: Arc<dyn DiagnosticParser>,
}

impl RunService {
    /// Create a service from its collaborators.
    pub fn new(pipeline: Arc<dyn BuildPipeline>, parser: Arc<dyn DiagnosticParser>) -> Self {
        Self { pipeline, parser }
    }

    /// Build and run `request`, returning the `output` command for the client.
    ///
    /// Never fails: pipeline and parser problems become response content.
    #[instrument(skip_all, fields(toolchain = %request.toolchain, source_len = request.source_code.len()))]
    pub async fn execute(&self, request: RunRequest) -> Command {
        let start = Instant::now();
        let outcome = self.invoke(request).await;
        let kind = outcome.kind();
        let response = self.respond(outcome);

        let elapsed = start.elapsed();
        let annotations = match &response {
            Command::Output(_, annotations) => annotations.len(),
            Command::Run(..) => 0,
        };
        info!(
            outcome = kind,
            annotations,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "run command finished"
        );
        counter!("run_commands_total", "outcome" => kind).increment(1);
        histogram!("run_duration_seconds").record(elapsed.as_secs_f64());
        response
    }

    /// Map a pipeline outcome to the client response.
    pub fn respond(&self, outcome: BuildOutcome) -> Command {
        match outcome {
            BuildOutcome::Success(stdout) => Command::output(stdout, Vec::new()),
            BuildOutcome::BuildFailure(raw) => {
                let annotations = match self.parser.parse(&raw) {
                    Ok(annotations) => annotations,
                    Err(e) => {
                        debug!(error = %e, "no diagnostics extracted from build output");
                        Vec::new()
                    }
                };
                Command::output(raw, annotations)
            }
            BuildOutcome::OtherError(message) => Command::output(message, Vec::new()),
        }
    }

    /// Run the pipeline on its own task so a panicking collaborator becomes
    /// an `OtherError` instead of taking the session down with it.
    async fn invoke(&self, request: RunRequest) -> BuildOutcome {
        let pipeline = Arc::clone(&self.pipeline);
        let task = tokio::spawn(async move {
            pipeline
                .build_and_run(&request.source_code, &request.toolchain)
                .await
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "build pipeline task failed");
                BuildOutcome::OtherError(format!("build pipeline failed unexpectedly: {e}"))
            }
        }
    }
}

impl std::fmt::Debug for RunService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunService").finish_non_exhaustive()
    }
}
