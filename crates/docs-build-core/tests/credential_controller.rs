//! Sign-in state machine tests: browser flow, timeout race, persistence
//! and reactions to other components' events.

use std::sync::Arc;
use std::time::Duration;

use docs_build_core::credential::{credential_key, CredentialStore};
use docs_build_core::fakes::ScriptedUriOpener;
use docs_build_core::{
    CallbackHub, CredentialController, DocsConfig, EnvironmentController, MemoryCredentialStore,
    UnavailableCredentialStore,
};
use docs_build_domain::{
    drain_events, DocsError, DocsEvent, Environment, ErrorCode, EventStream, SignInReason,
    SignInStatus, UserType,
};
use url::Url;

const CALLBACK: &str = "docs-build://docs-build/github-authenticate?id=7&name=Octo&email=o%40example.com&X-OP-BuildUserToken=tok";

fn callback() -> Url {
    Url::parse(CALLBACK).unwrap()
}

fn environment(user_type: UserType) -> (EventStream, Arc<EnvironmentController>) {
    let events = EventStream::new();
    let config = DocsConfig {
        user_type,
        sign_in_timeout_secs: 300,
        ..DocsConfig::default()
    };
    let environment = Arc::new(EnvironmentController::new(config, events.clone()));
    (events, environment)
}

fn controller(
    events: &EventStream,
    environment: &Arc<EnvironmentController>,
    store: Arc<dyn CredentialStore>,
    opener: Arc<ScriptedUriOpener>,
    hub: CallbackHub,
) -> CredentialController {
    CredentialController::new(events.clone(), Arc::clone(environment), store, opener, hub)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn names(events: &[DocsEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

#[tokio::test]
async fn test_sign_in_persists_and_initialize_restores() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let mut rx = events.subscribe();
    let store = Arc::new(MemoryCredentialStore::new());
    let hub = CallbackHub::new();
    let opener = Arc::new(ScriptedUriOpener::delivering(hub.clone(), callback()));
    let controller = controller(&events, &environment, store.clone(), opener.clone(), hub);

    controller.sign_in("c-1").await.unwrap();

    let credential = controller.credential();
    assert_eq!(credential.sign_in_status(), SignInStatus::SignedIn);
    assert_eq!(credential.user_token(), Some("tok"));
    assert!(opener.opened()[0].as_str().starts_with(
        "https://op-build-prod.azurewebsites.net/v1/Authenticate/github?redirect_uri="
    ));
    assert_eq!(
        names(&drain_events(&mut rx)),
        vec![
            "credential.reset",
            "sign_in.triggered",
            "sign_in.progress",
            "sign_in.succeeded"
        ]
    );

    // A fresh controller (next start) finds the stored credential.
    let restored = CredentialController::new(
        events.clone(),
        Arc::clone(&environment),
        store,
        Arc::new(ScriptedUriOpener::accepting()),
        CallbackHub::new(),
    );
    restored.initialize("c-2").await;
    let user = restored.credential().user_info().cloned().unwrap();
    assert_eq!(user.user_name, "Octo");
    assert_eq!(user.user_email, "o@example.com");
    match drain_events(&mut rx).as_slice() {
        [DocsEvent::UserSignInSucceeded {
            correlation_id,
            retrieved_from_cache: true,
            sign_in_reason: None,
            ..
        }] => assert_eq!(correlation_id, "c-2"),
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn test_initialize_without_stored_credential_resets() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let mut rx = events.subscribe();
    let controller = controller(
        &events,
        &environment,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ScriptedUriOpener::accepting()),
        CallbackHub::new(),
    );
    assert_eq!(controller.credential().sign_in_status(), SignInStatus::Initializing);

    controller.initialize("c").await;

    assert_eq!(controller.credential().sign_in_status(), SignInStatus::SignedOut);
    assert_eq!(drain_events(&mut rx), vec![DocsEvent::CredentialReset]);
}

#[tokio::test]
async fn test_initialize_drops_unreadable_credential() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let store = Arc::new(MemoryCredentialStore::new());
    store
        .set(&credential_key(Environment::Prod), "not json")
        .await
        .unwrap();
    let controller = controller(
        &events,
        &environment,
        store.clone(),
        Arc::new(ScriptedUriOpener::accepting()),
        CallbackHub::new(),
    );

    controller.initialize("c").await;

    assert_eq!(controller.credential().sign_in_status(), SignInStatus::SignedOut);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_declined_sign_in_page_fails() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let mut rx = events.subscribe();
    let controller = controller(
        &events,
        &environment,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ScriptedUriOpener::declining()),
        CallbackHub::new(),
    );

    let err = controller.sign_in("c").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::GitHubSignInExternalUrlDeclined);
    assert_eq!(controller.credential().sign_in_status(), SignInStatus::SignedOut);
    let posted = drain_events(&mut rx);
    assert!(matches!(
        posted.last(),
        Some(DocsEvent::UserSignInFailed { error, .. }) if error == &err
    ));
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_times_out_and_ignores_late_callback() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let mut rx = events.subscribe();
    let hub = CallbackHub::new();
    let controller = controller(
        &events,
        &environment,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ScriptedUriOpener::accepting()),
        hub.clone(),
    );

    let err = controller.sign_in("c").await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.code(), ErrorCode::GitHubSignInTimeOut);
    assert!(!hub.has_listener());

    // The redirect arriving after the timeout changes nothing.
    assert!(!hub.deliver(callback()));
    assert_eq!(controller.credential().sign_in_status(), SignInStatus::SignedOut);

    let failures: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter(|e| e.is_failure())
        .collect();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn test_callback_without_token_fails() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let hub = CallbackHub::new();
    let bad = Url::parse("docs-build://docs-build/github-authenticate?id=7").unwrap();
    let controller = controller(
        &events,
        &environment,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ScriptedUriOpener::delivering(hub.clone(), bad)),
        hub,
    );

    let err = controller.sign_in("c").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::GitHubSignInFailed);
    assert!(!controller.credential().is_signed_in());
}

#[tokio::test]
async fn test_public_contributor_never_signs_in() {
    let (events, environment) = environment(UserType::PublicContributor);
    let mut rx = events.subscribe();
    let opener = Arc::new(ScriptedUriOpener::accepting());
    let controller = controller(
        &events,
        &environment,
        Arc::new(UnavailableCredentialStore),
        opener.clone(),
        CallbackHub::new(),
    );

    controller.initialize("c-1").await;
    controller.sign_in("c-2").await.unwrap();

    assert_eq!(controller.credential().sign_in_status(), SignInStatus::SignedOut);
    assert!(opener.opened().is_empty());
    assert_eq!(
        drain_events(&mut rx),
        vec![DocsEvent::PublicContributorSignIn {
            correlation_id: "c-2".to_string()
        }]
    );
}

#[tokio::test]
async fn test_sign_out_clears_store() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let store = Arc::new(MemoryCredentialStore::new());
    let hub = CallbackHub::new();
    let controller = controller(
        &events,
        &environment,
        store.clone(),
        Arc::new(ScriptedUriOpener::delivering(hub.clone(), callback())),
        hub,
    );
    controller.sign_in("c-1").await.unwrap();
    assert_eq!(store.len(), 1);
    let mut rx = events.subscribe();

    controller.sign_out("c-2").await.unwrap();

    assert!(store.is_empty());
    assert!(!controller.credential().is_signed_in());
    assert_eq!(
        names(&drain_events(&mut rx)),
        vec!["sign_out.triggered", "credential.reset", "sign_out.succeeded"]
    );
}

#[tokio::test]
async fn test_sign_out_reports_store_failure() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let mut rx = events.subscribe();
    let controller = controller(
        &events,
        &environment,
        Arc::new(UnavailableCredentialStore),
        Arc::new(ScriptedUriOpener::accepting()),
        CallbackHub::new(),
    );

    let err = controller.sign_out("c").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::CredentialStoreFailed);
    assert_eq!(controller.credential().sign_in_status(), SignInStatus::SignedOut);
    assert_eq!(
        names(&drain_events(&mut rx)),
        vec!["sign_out.triggered", "credential.reset", "sign_out.failed"]
    );
}

#[tokio::test]
async fn test_sign_in_survives_store_write_failure() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let hub = CallbackHub::new();
    let controller = controller(
        &events,
        &environment,
        Arc::new(UnavailableCredentialStore),
        Arc::new(ScriptedUriOpener::delivering(hub.clone(), callback())),
        hub,
    );

    controller.sign_in("c").await.unwrap();

    assert!(controller.credential().is_signed_in());
}

#[tokio::test]
async fn test_expiry_during_validation_is_remembered_as_reason() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let hub = CallbackHub::new();
    let controller = Arc::new(controller(
        &events,
        &environment,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ScriptedUriOpener::delivering(hub.clone(), callback())),
        hub,
    ));
    let handle = controller.spawn_event_loop();
    controller.sign_in("c-1").await.unwrap();

    events.post(DocsEvent::CredentialExpired {
        during_real_time_validation: true,
    });
    eventually(|| controller.sign_in_reason().is_some()).await;
    assert!(!controller.credential().is_signed_in());
    assert_eq!(
        controller.sign_in_reason(),
        Some(SignInReason::CredentialExpiredDuringRealTimeValidation)
    );

    let mut rx = events.subscribe();
    controller.sign_in("c-2").await.unwrap();
    let reason = drain_events(&mut rx).into_iter().find_map(|e| match e {
        DocsEvent::UserSignInSucceeded { sign_in_reason, .. } => Some(sign_in_reason),
        _ => None,
    });
    assert_eq!(
        reason,
        Some(Some(SignInReason::CredentialExpiredDuringRealTimeValidation))
    );
    assert_eq!(controller.sign_in_reason(), None);
    handle.abort();
}

#[tokio::test]
async fn test_build_refused_before_sign_in_sets_reason() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let controller = Arc::new(controller(
        &events,
        &environment,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ScriptedUriOpener::accepting()),
        CallbackHub::new(),
    ));
    let handle = controller.spawn_event_loop();

    events.post(DocsEvent::BuildFailed {
        correlation_id: "b".to_string(),
        build_input: None,
        total_time_in_seconds: 0.0,
        error: DocsError::NotSignedIn,
    });

    eventually(|| controller.sign_in_reason() == Some(SignInReason::BuildTriggeredBeforeSignIn))
        .await;
    handle.abort();
}

#[tokio::test]
async fn test_environment_change_reloads_credential_for_new_environment() {
    let (events, environment) = environment(UserType::MicrosoftEmployee);
    let store = Arc::new(MemoryCredentialStore::new());
    let ppe_user = serde_json::json!({
        "user_id": "9",
        "user_name": "Sandbox",
        "user_email": "s@example.com",
        "user_token": "ppe-token",
        "sign_type": "GitHub"
    });
    store
        .set(&credential_key(Environment::Ppe), &ppe_user.to_string())
        .await
        .unwrap();
    let controller = Arc::new(controller(
        &events,
        &environment,
        store,
        Arc::new(ScriptedUriOpener::accepting()),
        CallbackHub::new(),
    ));
    let handle = controller.spawn_event_loop();
    controller.initialize("c").await;
    assert!(!controller.credential().is_signed_in());

    environment.set_environment(Environment::Ppe);

    eventually(|| controller.credential().is_signed_in()).await;
    assert_eq!(controller.credential().user_token(), Some("ppe-token"));
    handle.abort();
}
