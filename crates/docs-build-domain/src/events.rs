//! Domain events and the process-wide event stream.
//!
//! Components never hold references to each other's observers: they post
//! [`DocsEvent`]s to the shared [`EventStream`] and whoever cares subscribes.
//! Every subscriber sees events in the order they were posted.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::build::{BuildInput, BuildResult, DocfxExecutionResult};
use crate::credential::{Credential, SignInReason};
use crate::environment::Environment;
use crate::error::DocsError;

/// Buffered events per subscriber before a slow subscriber starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DocsEvent {
    // --- Environment & credential -------------------------------------------
    EnvironmentChanged {
        environment: Environment,
    },
    RefreshCredential {
        correlation_id: String,
    },
    CredentialReset,
    CredentialExpired {
        during_real_time_validation: bool,
    },
    /// Sign-in is not applicable for public contributors.
    PublicContributorSignIn {
        correlation_id: String,
    },
    UserSignInTriggered {
        correlation_id: String,
    },
    UserSignInProgress {
        message: String,
    },
    UserSignInSucceeded {
        correlation_id: String,
        credential: Credential,
        retrieved_from_cache: bool,
        sign_in_reason: Option<SignInReason>,
    },
    UserSignInFailed {
        correlation_id: String,
        error: DocsError,
        sign_in_reason: Option<SignInReason>,
    },
    UserSignOutTriggered {
        correlation_id: String,
    },
    UserSignOutSucceeded {
        correlation_id: String,
    },
    UserSignOutFailed {
        correlation_id: String,
        error: DocsError,
    },

    // --- Build ----------------------------------------------------------------
    BuildTriggered {
        correlation_id: String,
        signed_in: bool,
    },
    BuildProgress {
        message: String,
    },
    RepositoryInfoRetrieved {
        local_repository_url: String,
        original_repository_url: String,
    },
    BuildInstantAllocated {
        correlation_id: String,
    },
    BuildInstantReleased {
        correlation_id: String,
    },
    BuildStarted {
        correlation_id: String,
        workspace_name: String,
    },
    BuildSucceeded {
        correlation_id: String,
        build_input: BuildInput,
        total_time_in_seconds: f64,
        result: BuildResult,
    },
    BuildFailed {
        correlation_id: String,
        build_input: Option<BuildInput>,
        total_time_in_seconds: f64,
        error: DocsError,
    },
    BuildCanceled {
        correlation_id: String,
        build_input: BuildInput,
        total_time_in_seconds: f64,
    },
    ReportGenerationFailed {
        correlation_id: String,
        error: DocsError,
    },
    CancelBuildTriggered {
        correlation_id: String,
    },
    CancelBuildSucceeded {
        correlation_id: String,
    },
    CancelBuildFailed {
        correlation_id: String,
        error: DocsError,
    },

    // --- Build tool phases ----------------------------------------------------
    DocfxRestoreStarted,
    DocfxRestoreCompleted {
        correlation_id: String,
        result: DocfxExecutionResult,
        exit_code: Option<i32>,
    },
    DocfxBuildStarted,
    DocfxBuildCompleted {
        correlation_id: String,
        result: DocfxExecutionResult,
        exit_code: Option<i32>,
    },

    // --- Real-time validation ---------------------------------------------------
    StartLanguageServerCompleted {
        succeeded: bool,
        error: Option<DocsError>,
    },
    LanguageServerStopped,
}

impl DocsEvent {
    /// Stable event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            DocsEvent::EnvironmentChanged { .. } => "environment.changed",
            DocsEvent::RefreshCredential { .. } => "credential.refresh",
            DocsEvent::CredentialReset => "credential.reset",
            DocsEvent::CredentialExpired { .. } => "credential.expired",
            DocsEvent::PublicContributorSignIn { .. } => "sign_in.not_applicable",
            DocsEvent::UserSignInTriggered { .. } => "sign_in.triggered",
            DocsEvent::UserSignInProgress { .. } => "sign_in.progress",
            DocsEvent::UserSignInSucceeded { .. } => "sign_in.succeeded",
            DocsEvent::UserSignInFailed { .. } => "sign_in.failed",
            DocsEvent::UserSignOutTriggered { .. } => "sign_out.triggered",
            DocsEvent::UserSignOutSucceeded { .. } => "sign_out.succeeded",
            DocsEvent::UserSignOutFailed { .. } => "sign_out.failed",
            DocsEvent::BuildTriggered { .. } => "build.triggered",
            DocsEvent::BuildProgress { .. } => "build.progress",
            DocsEvent::RepositoryInfoRetrieved { .. } => "build.repository_info",
            DocsEvent::BuildInstantAllocated { .. } => "build.instance_allocated",
            DocsEvent::BuildInstantReleased { .. } => "build.instance_released",
            DocsEvent::BuildStarted { .. } => "build.started",
            DocsEvent::BuildSucceeded { .. } => "build.succeeded",
            DocsEvent::BuildFailed { .. } => "build.failed",
            DocsEvent::BuildCanceled { .. } => "build.canceled",
            DocsEvent::ReportGenerationFailed { .. } => "build.report_failed",
            DocsEvent::CancelBuildTriggered { .. } => "cancel_build.triggered",
            DocsEvent::CancelBuildSucceeded { .. } => "cancel_build.succeeded",
            DocsEvent::CancelBuildFailed { .. } => "cancel_build.failed",
            DocsEvent::DocfxRestoreStarted => "docfx.restore_started",
            DocsEvent::DocfxRestoreCompleted { .. } => "docfx.restore_completed",
            DocsEvent::DocfxBuildStarted => "docfx.build_started",
            DocsEvent::DocfxBuildCompleted { .. } => "docfx.build_completed",
            DocsEvent::StartLanguageServerCompleted { .. } => "language_server.started",
            DocsEvent::LanguageServerStopped => "language_server.stopped",
        }
    }

    /// Correlation id of the operation this event belongs to, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            DocsEvent::RefreshCredential { correlation_id }
            | DocsEvent::PublicContributorSignIn { correlation_id }
            | DocsEvent::UserSignInTriggered { correlation_id }
            | DocsEvent::UserSignInSucceeded { correlation_id, .. }
            | DocsEvent::UserSignInFailed { correlation_id, .. }
            | DocsEvent::UserSignOutTriggered { correlation_id }
            | DocsEvent::UserSignOutSucceeded { correlation_id }
            | DocsEvent::UserSignOutFailed { correlation_id, .. }
            | DocsEvent::BuildTriggered { correlation_id, .. }
            | DocsEvent::BuildInstantAllocated { correlation_id }
            | DocsEvent::BuildInstantReleased { correlation_id }
            | DocsEvent::BuildStarted { correlation_id, .. }
            | DocsEvent::BuildSucceeded { correlation_id, .. }
            | DocsEvent::BuildFailed { correlation_id, .. }
            | DocsEvent::BuildCanceled { correlation_id, .. }
            | DocsEvent::ReportGenerationFailed { correlation_id, .. }
            | DocsEvent::CancelBuildTriggered { correlation_id }
            | DocsEvent::CancelBuildSucceeded { correlation_id }
            | DocsEvent::CancelBuildFailed { correlation_id, .. }
            | DocsEvent::DocfxRestoreCompleted { correlation_id, .. }
            | DocsEvent::DocfxBuildCompleted { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DocsEvent::UserSignInFailed { .. }
                | DocsEvent::UserSignOutFailed { .. }
                | DocsEvent::BuildFailed { .. }
                | DocsEvent::ReportGenerationFailed { .. }
                | DocsEvent::CancelBuildFailed { .. }
                | DocsEvent::StartLanguageServerCompleted {
                    succeeded: false,
                    ..
                }
        )
    }
}

// ============================================================================
// EVENT STREAM
// ============================================================================

/// Multi-subscriber publish/subscribe channel for [`DocsEvent`]s.
///
/// Posting never blocks and never fails; events posted while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventStream {
    sender: broadcast::Sender<DocsEvent>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn post(&self, event: DocsEvent) {
        tracing::trace!(event = event.name(), "post");
        // Err only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    /// Receive every event posted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DocsEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Take every event already buffered for `receiver`, without waiting.
pub fn drain_events(receiver: &mut broadcast::Receiver<DocsEvent>) -> Vec<DocsEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event subscriber lagged");
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_see_events_in_post_order() {
        let stream = EventStream::new();
        let mut first = stream.subscribe();
        let mut second = stream.subscribe();

        stream.post(DocsEvent::CredentialReset);
        stream.post(DocsEvent::BuildProgress {
            message: "hello".to_string(),
        });

        for receiver in [&mut first, &mut second] {
            let names: Vec<_> = drain_events(receiver).iter().map(|e| e.name()).collect();
            assert_eq!(names, vec!["credential.reset", "build.progress"]);
        }
    }

    #[test]
    fn test_post_without_subscribers_is_silent() {
        let stream = EventStream::new();
        stream.post(DocsEvent::CredentialReset);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let stream = EventStream::new();
        stream.post(DocsEvent::CredentialReset);
        let mut late = stream.subscribe();
        assert!(drain_events(&mut late).is_empty());
    }

    #[test]
    fn test_correlation_id_and_failure_flags() {
        let event = DocsEvent::BuildFailed {
            correlation_id: "c-1".to_string(),
            build_input: None,
            total_time_in_seconds: 0.5,
            error: DocsError::NonWorkspace,
        };
        assert_eq!(event.correlation_id(), Some("c-1"));
        assert!(event.is_failure());
        assert_eq!(DocsEvent::CredentialReset.correlation_id(), None);
        assert!(!DocsEvent::CredentialReset.is_failure());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = DocsEvent::BuildTriggered {
            correlation_id: "c-2".to_string(),
            signed_in: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "BuildTriggered");
        assert_eq!(value["data"]["signed_in"], true);
    }
}
