//! Runs the build tool: restore once per executor, then build.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use docs_build_domain::{
    BuildInput, BuildResult, DocfxExecutionResult, DocsError, DocsEvent, DocsResult, EventStream,
};
use tokio::process::Child;
use tracing::{info, instrument};

use super::command::{build_command, restore_command, serve_command, ToolOptions};
use super::process::{run_phase, BuildPhase, ProcessTracker};
use crate::config::EnvironmentController;

/// Executes builds for the build controller.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Never fails: every outcome is folded into the returned result.
    async fn run_build(
        &self,
        correlation_id: &str,
        input: &BuildInput,
        user_token: Option<&str>,
    ) -> BuildResult;

    /// Kill the running build, if any.
    async fn cancel_build(&self) -> DocsResult<()>;
}

pub struct BuildExecutor {
    events: EventStream,
    environment: Arc<EnvironmentController>,
    restore_done: AtomicBool,
    tracker: ProcessTracker,
}

impl BuildExecutor {
    pub fn new(events: EventStream, environment: Arc<EnvironmentController>) -> Self {
        Self {
            events,
            environment,
            restore_done: AtomicBool::new(false),
            tracker: ProcessTracker::new(),
        }
    }

    /// Whether a restore already succeeded in this executor's lifetime.
    pub fn is_restore_done(&self) -> bool {
        self.restore_done.load(Ordering::SeqCst)
    }

    /// Pid of the build process currently running.
    pub fn running_pid(&self) -> Option<u32> {
        self.tracker.current_pid()
    }

    /// Start the real-time validation server with stdio piped.
    pub fn spawn_language_server(
        &self,
        correlation_id: &str,
        repository_path: &Path,
        repository_url: &str,
        user_token: Option<&str>,
    ) -> DocsResult<Child> {
        let options = ToolOptions::from_config(&self.environment.config());
        let mut command = serve_command(
            &options,
            correlation_id,
            repository_path,
            repository_url,
            user_token,
        )
        .to_command();
        command.stdin(std::process::Stdio::piped());
        command.spawn().map_err(|e| DocsError::LanguageServer {
            message: format!("failed to start {}: {e}", options.binary.display()),
        })
    }

    async fn restore(
        &self,
        options: &ToolOptions,
        correlation_id: &str,
        input: &BuildInput,
        user_token: Option<&str>,
    ) -> DocfxExecutionResult {
        self.events.post(DocsEvent::DocfxRestoreStarted);
        let command = restore_command(options, correlation_id, input, user_token);
        let outcome = run_phase(&command, BuildPhase::Restore, &self.events, &self.tracker).await;
        if outcome.result.is_succeeded() {
            self.restore_done.store(true, Ordering::SeqCst);
        }
        self.events.post(DocsEvent::DocfxRestoreCompleted {
            correlation_id: correlation_id.to_string(),
            result: outcome.result,
            exit_code: outcome.exit_code,
        });
        outcome.result
    }

    async fn build(
        &self,
        options: &ToolOptions,
        correlation_id: &str,
        input: &BuildInput,
        user_token: Option<&str>,
    ) -> DocfxExecutionResult {
        self.events.post(DocsEvent::DocfxBuildStarted);
        let command = build_command(options, correlation_id, input, user_token);
        let outcome = run_phase(&command, BuildPhase::Build, &self.events, &self.tracker).await;
        self.events.post(DocsEvent::DocfxBuildCompleted {
            correlation_id: correlation_id.to_string(),
            result: outcome.result,
            exit_code: outcome.exit_code,
        });
        outcome.result
    }
}

#[async_trait]
impl BuildRunner for BuildExecutor {
    #[instrument(skip(self, input, user_token), fields(workspace = %input.workspace_name))]
    async fn run_build(
        &self,
        correlation_id: &str,
        input: &BuildInput,
        user_token: Option<&str>,
    ) -> BuildResult {
        self.tracker.begin();
        let result = self.run_phases(correlation_id, input, user_token).await;
        self.tracker.finish();
        result
    }

    async fn cancel_build(&self) -> DocsResult<()> {
        if self.tracker.cancel().await? {
            info!("build canceled");
        }
        Ok(())
    }
}

impl BuildExecutor {
    /// Restore when needed, then build. A cancel stops before the next phase.
    async fn run_phases(
        &self,
        correlation_id: &str,
        input: &BuildInput,
        user_token: Option<&str>,
    ) -> BuildResult {
        let options = ToolOptions::from_config(&self.environment.config());
        let is_restore_skipped = self.is_restore_done();
        let mut build_result = BuildResult::new(DocfxExecutionResult::Succeeded, is_restore_skipped);

        if !is_restore_skipped {
            let started = Instant::now();
            let restored = self
                .restore(&options, correlation_id, input, user_token)
                .await;
            build_result.restore_time_in_seconds = Some(started.elapsed().as_secs_f64());
            if !restored.is_succeeded() {
                build_result.result = restored;
                return build_result;
            }
        } else {
            info!("restore already done; skipping");
        }

        let started = Instant::now();
        build_result.result = self.build(&options, correlation_id, input, user_token).await;
        build_result.build_time_in_seconds = Some(started.elapsed().as_secs_f64());
        build_result
    }
}
