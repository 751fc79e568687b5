//! Observability tests for docs-build operation logging.
//!
//! These tests verify that posted events turn into structured tracing
//! records and that user tokens stay out of the log.

use docs_build_core::{log_event, spawn_event_logger, CorrelationSpan};
use docs_build_domain::{
    Credential, DocsError, DocsEvent, DocsRepoType, EventStream, UserInfo,
};
use tracing_test::traced_test;

/// Test: a failed build logs its error code and correlation id
#[traced_test]
#[test]
fn test_log_event_build_failed_includes_code() {
    log_event(&DocsEvent::BuildFailed {
        correlation_id: "c-9".to_string(),
        build_input: None,
        total_time_in_seconds: 0.5,
        error: DocsError::NonWorkspace,
    });

    assert!(logs_contain("build.failed"));
    assert!(logs_contain("TriggerBuildNonWorkspace"));
    assert!(logs_contain("c-9"));
}

/// Test: a successful sign-in logs the user name, never the token
#[traced_test]
#[test]
fn test_log_event_sign_in_hides_token() {
    let credential = Credential::signed_in(UserInfo {
        user_id: "7".to_string(),
        user_name: "Octo".to_string(),
        user_email: "o@example.com".to_string(),
        user_token: "secret-token-value".to_string(),
        sign_type: DocsRepoType::GitHub,
    });
    log_event(&DocsEvent::UserSignInSucceeded {
        correlation_id: "c-1".to_string(),
        credential,
        retrieved_from_cache: true,
        sign_in_reason: None,
    });

    assert!(logs_contain("Octo"));
    assert!(!logs_contain("secret-token-value"));
}

/// Test: CorrelationSpan::enter tags records logged inside it
#[traced_test]
#[test]
fn test_correlation_span_tags_records() {
    {
        let _span = CorrelationSpan::enter("op-42");
        log_event(&DocsEvent::CredentialReset);
    }

    assert!(logs_contain("op-42"));
    assert!(logs_contain("credential.reset"));
}

/// Test: the event logger stops once every sender is gone
#[traced_test]
#[tokio::test]
async fn test_event_logger_ends_with_stream() {
    let events = EventStream::new();
    let handle = spawn_event_logger(&events);
    events.post(DocsEvent::BuildProgress {
        message: "hello".to_string(),
    });
    drop(events);

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("logger should stop")
        .expect("logger should not panic");
}
