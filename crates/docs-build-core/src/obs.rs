//! Structured logging of docs-build operations.
//!
//! - [`CorrelationSpan`]: RAII guard tagging everything logged during one
//!   user-triggered operation with its correlation id
//! - [`spawn_event_logger`]: one tracing record per posted [`DocsEvent`]
//!
//! Tokens never reach the log: credentials are summarised by status and
//! user name only.

use docs_build_domain::{DocsEvent, EventStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Enters a span tagged with the operation's correlation id.
pub struct CorrelationSpan {
    _span: tracing::span::EnteredSpan,
}

impl CorrelationSpan {
    pub fn enter(correlation_id: &str) -> Self {
        let span = tracing::info_span!("docs.operation", correlation_id = %correlation_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Log a single event.
pub fn log_event(event: &DocsEvent) {
    let name = event.name();
    let correlation_id = event.correlation_id().unwrap_or("-");
    match event {
        DocsEvent::BuildProgress { message } | DocsEvent::UserSignInProgress { message } => {
            debug!(event = name, "{}", message.trim_end());
        }
        DocsEvent::UserSignInSucceeded {
            credential,
            retrieved_from_cache,
            ..
        } => {
            let user = credential
                .user_info()
                .map(|u| u.user_name.as_str())
                .unwrap_or("-");
            info!(
                event = name,
                correlation_id = %correlation_id,
                user = %user,
                retrieved_from_cache = *retrieved_from_cache,
            );
        }
        DocsEvent::UserSignInFailed { error, .. }
        | DocsEvent::UserSignOutFailed { error, .. }
        | DocsEvent::BuildFailed { error, .. }
        | DocsEvent::ReportGenerationFailed { error, .. }
        | DocsEvent::CancelBuildFailed { error, .. } => {
            warn!(
                event = name,
                correlation_id = %correlation_id,
                code = %error.code(),
                error = %error,
            );
        }
        DocsEvent::StartLanguageServerCompleted {
            succeeded: false,
            error,
        } => {
            let error = error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            warn!(event = name, error = %error);
        }
        DocsEvent::BuildSucceeded {
            total_time_in_seconds,
            result,
            ..
        } => {
            info!(
                event = name,
                correlation_id = %correlation_id,
                total_time_in_seconds = *total_time_in_seconds,
                is_restore_skipped = result.is_restore_skipped,
            );
        }
        DocsEvent::DocfxRestoreCompleted {
            result, exit_code, ..
        }
        | DocsEvent::DocfxBuildCompleted {
            result, exit_code, ..
        } => {
            info!(
                event = name,
                correlation_id = %correlation_id,
                result = %result,
                exit_code = ?exit_code,
            );
        }
        _ => {
            info!(event = name, correlation_id = %correlation_id);
        }
    }
}

/// Subscribe to `events` and log everything posted until the stream closes.
pub fn spawn_event_logger(events: &EventStream) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
