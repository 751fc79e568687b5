//! Build orchestration.
//!
//! One build at a time. A build walks through:
//!
//! 1. `BuildTriggered`
//! 2. target validation: one workspace folder, sign-in if required,
//!    token accepted by the build service
//! 3. `BuildInput` resolution (cached per workspace folder)
//! 4. slot allocation, the only place a concurrent build is refused
//! 5. `BuildStarted`, the executor run, then the report on success
//!
//! Every error ends in `BuildFailed`. The slot is released and the build
//! artifacts removed on every path once the slot was taken.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use docs_build_domain::{
    BuildInput, BuildResult, BuildType, Credential, DocfxExecutionResult, DocsError, DocsEvent,
    DocsResult, EventStream, UserType,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::executor::BuildRunner;
use crate::api::BuildApi;
use crate::config::EnvironmentController;
use crate::host::{DiagnosticSink, WorkspaceFolder, WorkspaceProvider};
use crate::report::visualize_build_report;
use crate::repository::{locale_from_repository_url, PublishConfig, RepositoryInspector};

/// At most one build holds the slot.
#[derive(Debug, Default)]
struct BuildSlot {
    in_use: AtomicBool,
    correlation_id: Mutex<Option<String>>,
}

impl BuildSlot {
    fn try_allocate(&self, correlation_id: &str) -> DocsResult<()> {
        self.in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DocsError::InstanceNotAvailable)?;
        *self.correlation_id.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(correlation_id.to_string());
        Ok(())
    }

    fn release(&self) {
        *self.correlation_id.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.in_use.store(false, Ordering::SeqCst);
    }

    fn is_allocated(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<String> {
        self.correlation_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Collaborators of a [`BuildController`].
pub struct BuildControllerDeps {
    pub runner: Arc<dyn BuildRunner>,
    pub api: Arc<dyn BuildApi>,
    pub inspector: Arc<dyn RepositoryInspector>,
    pub workspace: Arc<dyn WorkspaceProvider>,
    pub sink: Arc<dyn DiagnosticSink>,
}

pub struct BuildController {
    events: EventStream,
    environment: Arc<EnvironmentController>,
    runner: Arc<dyn BuildRunner>,
    api: Arc<dyn BuildApi>,
    inspector: Arc<dyn RepositoryInspector>,
    workspace: Arc<dyn WorkspaceProvider>,
    sink: Arc<dyn DiagnosticSink>,
    slot: BuildSlot,
    build_input: Mutex<Option<(PathBuf, BuildInput)>>,
}

impl BuildController {
    pub fn new(
        events: EventStream,
        environment: Arc<EnvironmentController>,
        deps: BuildControllerDeps,
    ) -> Self {
        Self {
            events,
            environment,
            runner: deps.runner,
            api: deps.api,
            inspector: deps.inspector,
            workspace: deps.workspace,
            sink: deps.sink,
            slot: BuildSlot::default(),
            build_input: Mutex::new(None),
        }
    }

    /// Whether a build currently holds the slot.
    pub fn is_building(&self) -> bool {
        self.slot.is_allocated()
    }

    /// Correlation id of the build holding the slot.
    pub fn current_build(&self) -> Option<String> {
        self.slot.current()
    }

    /// Forget the cached build input; the next build resolves it again.
    pub fn invalidate_build_input(&self) {
        *self.build_input.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Build the workspace folder containing `target` (or the single open
    /// folder). The terminal event is always posted before returning.
    #[instrument(skip(self, credential))]
    pub async fn build(
        &self,
        correlation_id: &str,
        target: Option<&Path>,
        credential: &Credential,
    ) -> DocsResult<BuildResult> {
        let started = Instant::now();
        self.events.post(DocsEvent::BuildTriggered {
            correlation_id: correlation_id.to_string(),
            signed_in: credential.is_signed_in(),
        });

        let mut build_input = None;
        let mut allocated = false;
        let outcome = self
            .run(
                correlation_id,
                target,
                credential,
                started,
                &mut build_input,
                &mut allocated,
            )
            .await;

        if let Err(error) = &outcome {
            if error.is_credential_rejection() {
                self.events.post(DocsEvent::CredentialExpired {
                    during_real_time_validation: false,
                });
            }
            self.events.post(DocsEvent::BuildFailed {
                correlation_id: correlation_id.to_string(),
                build_input: build_input.clone(),
                total_time_in_seconds: started.elapsed().as_secs_f64(),
                error: error.clone(),
            });
        }

        if allocated {
            if let Some(input) = &build_input {
                if !self.environment.debug_mode() {
                    clear_artifacts(input).await;
                }
            }
            self.slot.release();
            self.events.post(DocsEvent::BuildInstantReleased {
                correlation_id: correlation_id.to_string(),
            });
        }

        outcome
    }

    /// Kill the running build. No-op when idle.
    #[instrument(skip(self))]
    pub async fn cancel_build(&self, correlation_id: &str) -> DocsResult<()> {
        if !self.slot.is_allocated() {
            debug!("no build in progress; nothing to cancel");
            return Ok(());
        }

        self.events.post(DocsEvent::CancelBuildTriggered {
            correlation_id: correlation_id.to_string(),
        });
        match self.runner.cancel_build().await {
            Ok(()) => {
                self.events.post(DocsEvent::CancelBuildSucceeded {
                    correlation_id: correlation_id.to_string(),
                });
                Ok(())
            }
            Err(error) => {
                let error = match error {
                    DocsError::CancelBuildFailed { .. } => error,
                    other => DocsError::CancelBuildFailed {
                        message: other.to_string(),
                    },
                };
                self.events.post(DocsEvent::CancelBuildFailed {
                    correlation_id: correlation_id.to_string(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Drop the cached build input whenever the environment changes.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(DocsEvent::EnvironmentChanged { .. }) => {
                        controller.invalidate_build_input();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // A missed environment change would leave a stale input.
                        warn!(skipped, "build controller lagged behind the event stream");
                        controller.invalidate_build_input();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn run(
        &self,
        correlation_id: &str,
        target: Option<&Path>,
        credential: &Credential,
        started: Instant,
        build_input: &mut Option<BuildInput>,
        allocated: &mut bool,
    ) -> DocsResult<BuildResult> {
        let folder = self.validate_target(target, credential).await?;

        let input = self
            .resolve_build_input(&folder, credential)
            .await
            .map_err(wrap_resolution_error)?;
        *build_input = Some(input.clone());

        self.slot.try_allocate(correlation_id)?;
        *allocated = true;
        self.events.post(DocsEvent::BuildInstantAllocated {
            correlation_id: correlation_id.to_string(),
        });
        clear_artifacts(&input).await;

        self.events.post(DocsEvent::BuildStarted {
            correlation_id: correlation_id.to_string(),
            workspace_name: input.workspace_name.clone(),
        });
        let result = self
            .runner
            .run_build(correlation_id, &input, credential.user_token())
            .await;

        match result.result {
            DocfxExecutionResult::Succeeded => {
                self.sink.clear();
                if let Err(error) = visualize_build_report(
                    &input.local_repository_path,
                    &input.log_path,
                    self.sink.as_ref(),
                    &self.events,
                )
                .await
                {
                    self.events.post(DocsEvent::ReportGenerationFailed {
                        correlation_id: correlation_id.to_string(),
                        error,
                    });
                }
                info!(workspace = %input.workspace_name, "build succeeded");
                self.events.post(DocsEvent::BuildSucceeded {
                    correlation_id: correlation_id.to_string(),
                    build_input: input,
                    total_time_in_seconds: started.elapsed().as_secs_f64(),
                    result: result.clone(),
                });
                Ok(result)
            }
            DocfxExecutionResult::Canceled => {
                self.events.post(DocsEvent::BuildCanceled {
                    correlation_id: correlation_id.to_string(),
                    build_input: input,
                    total_time_in_seconds: started.elapsed().as_secs_f64(),
                });
                Ok(result)
            }
            DocfxExecutionResult::Failed => Err(DocsError::BuildToolRunFailed),
        }
    }

    async fn validate_target(
        &self,
        target: Option<&Path>,
        credential: &Credential,
    ) -> DocsResult<WorkspaceFolder> {
        if self.environment.user_type() == UserType::Unknown {
            return Err(DocsError::UnknownUserType);
        }

        let folder = select_workspace_folder(self.workspace.workspace_folders(), target)?;

        if self.environment.requires_authentication() {
            let token = match credential.user_token() {
                Some(token) if credential.is_signed_in() => token,
                _ => return Err(DocsError::NotSignedIn),
            };
            self.api.validate_credential(token).await?;
        }
        Ok(folder)
    }

    async fn resolve_build_input(
        &self,
        folder: &WorkspaceFolder,
        credential: &Credential,
    ) -> DocsResult<BuildInput> {
        if let Some(input) = self.cached_build_input(&folder.path) {
            debug!(workspace = %folder.name, "reusing cached build input");
            return Ok(input);
        }

        let root = self.inspector.repository_root(&folder.path).await?;
        let publish_config = PublishConfig::load(&root).await?;
        publish_config.ensure_supported_engine()?;

        let local_url = self.inspector.remote_url(&root).await?;
        let token = credential.user_token();
        let mut upstream = self
            .api
            .provisioned_repository_url_by_repository_url(&local_url, token)
            .await?;
        if upstream.is_none() {
            let locale = locale_from_repository_url(&local_url);
            for docset in publish_config.docset_names() {
                upstream = self
                    .api
                    .provisioned_repository_url_by_docset_name_and_locale(docset, &locale, token)
                    .await?;
                if upstream.is_some() {
                    break;
                }
            }
        }

        let provisioned = upstream.is_some();
        let original_url = upstream.unwrap_or_else(|| local_url.clone());
        self.events.post(DocsEvent::RepositoryInfoRetrieved {
            local_repository_url: local_url.clone(),
            original_repository_url: original_url.clone(),
        });

        let config = self.environment.config();
        let input = BuildInput {
            workspace_name: folder.name.clone(),
            build_type: BuildType::FullBuild,
            local_repository_path: root,
            local_repository_url: local_url,
            original_repository_url: original_url,
            output_folder: config.resolved_output_folder(),
            log_path: config.resolved_log_path(),
            dry_run: config.user_type == UserType::PublicContributor || !provisioned,
        };

        *self.build_input.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((folder.path.clone(), input.clone()));
        Ok(input)
    }

    fn cached_build_input(&self, folder: &Path) -> Option<BuildInput> {
        self.build_input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|(cached_for, _)| cached_for == folder)
            .map(|(_, input)| input.clone())
    }
}

/// The folder to build: the innermost one containing `target`, or the only
/// open folder.
pub fn select_workspace_folder(
    folders: Vec<WorkspaceFolder>,
    target: Option<&Path>,
) -> DocsResult<WorkspaceFolder> {
    match target {
        Some(target) => folders
            .into_iter()
            .filter(|f| f.contains(target))
            .max_by_key(|f| f.path.components().count())
            .ok_or(DocsError::NonWorkspace),
        None => match folders.len() {
            0 => Err(DocsError::NonWorkspace),
            1 => folders.into_iter().next().ok_or(DocsError::NonWorkspace),
            count => Err(DocsError::AmbiguousWorkspace { count }),
        },
    }
}

fn wrap_resolution_error(error: DocsError) -> DocsError {
    match error {
        DocsError::InvalidCredential
        | DocsError::NonDocsRepo { .. }
        | DocsError::LegacyDocsRepo { .. }
        | DocsError::InvalidDocsRepo { .. } => error,
        other => DocsError::InvalidDocsRepo {
            message: other.to_string(),
        },
    }
}

async fn clear_artifacts(input: &BuildInput) {
    if let Err(e) = tokio::fs::remove_dir_all(&input.output_folder).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %input.output_folder.display(), error = %e, "failed to clear output folder");
        }
    }
    if let Err(e) = tokio::fs::remove_file(&input.log_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %input.log_path.display(), error = %e, "failed to clear build log");
        }
    }
}
