//! Sign-in / sign-out state machine.
//!
//! ```text
//! Initializing ──initialize──▶ SignedIn (cached) | SignedOut
//! SignedOut ──sign_in──▶ SigningIn ──callback──▶ SignedIn
//!                                  └─declined / timeout / bad callback─▶ SignedOut
//! any ──sign_out / expiry──▶ SignedOut
//! ```
//!
//! The controller also reacts to events posted by other components: an
//! environment switch or refresh request re-runs `initialize`, an expired
//! credential resets it, and a build refused for lack of sign-in records
//! why the next sign-in happens.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use docs_build_domain::{
    Credential, DocsError, DocsEvent, DocsRepoType, DocsResult, EventStream, SignInReason,
    UserInfo,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::callback::CallbackHub;
use super::sign_in::{callback_uri, parse_callback, sign_in_url};
use super::store::{credential_key, CredentialStore};
use crate::config::EnvironmentController;
use crate::host::ExternalUriOpener;

pub struct CredentialController {
    events: EventStream,
    environment: Arc<EnvironmentController>,
    store: Arc<dyn CredentialStore>,
    opener: Arc<dyn ExternalUriOpener>,
    callbacks: CallbackHub,
    credential: RwLock<Credential>,
    sign_in_reason: Mutex<Option<SignInReason>>,
}

impl CredentialController {
    pub fn new(
        events: EventStream,
        environment: Arc<EnvironmentController>,
        store: Arc<dyn CredentialStore>,
        opener: Arc<dyn ExternalUriOpener>,
        callbacks: CallbackHub,
    ) -> Self {
        Self {
            events,
            environment,
            store,
            opener,
            callbacks,
            credential: RwLock::new(Credential::initializing()),
            sign_in_reason: Mutex::new(None),
        }
    }

    /// Current credential.
    pub fn credential(&self) -> Credential {
        self.credential
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Why the next sign-in is expected, if known.
    pub fn sign_in_reason(&self) -> Option<SignInReason> {
        *self.sign_in_reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the cached credential for the current environment.
    #[instrument(skip(self))]
    pub async fn initialize(&self, correlation_id: &str) {
        if !self.environment.requires_authentication() {
            debug!("authentication not required; staying signed out");
            self.set_credential(Credential::signed_out());
            return;
        }

        match self.load_cached_user().await {
            Some(user_info) => {
                let credential = Credential::signed_in(user_info);
                self.set_credential(credential.clone());
                self.events.post(DocsEvent::UserSignInSucceeded {
                    correlation_id: correlation_id.to_string(),
                    credential,
                    retrieved_from_cache: true,
                    sign_in_reason: None,
                });
            }
            None => {
                if let Err(e) = self.reset_credential().await {
                    warn!(error = %e, "failed to clear the stored credential");
                }
            }
        }
    }

    /// Sign in through the configured provider's browser flow.
    #[instrument(skip(self))]
    pub async fn sign_in(&self, correlation_id: &str) -> DocsResult<()> {
        if !self.environment.requires_authentication() {
            self.events.post(DocsEvent::PublicContributorSignIn {
                correlation_id: correlation_id.to_string(),
            });
            return Ok(());
        }

        if let Err(e) = self.reset_credential().await {
            warn!(error = %e, "failed to clear the stored credential before signing in");
        }
        self.set_credential(Credential::signing_in());
        self.events.post(DocsEvent::UserSignInTriggered {
            correlation_id: correlation_id.to_string(),
        });

        let provider = self.environment.docs_repo_type();
        match self.run_sign_in_flow(provider).await {
            Ok(user_info) => {
                self.persist(&user_info).await;
                let credential = Credential::signed_in(user_info);
                self.set_credential(credential.clone());
                info!(provider = %provider, "signed in");
                self.events.post(DocsEvent::UserSignInSucceeded {
                    correlation_id: correlation_id.to_string(),
                    credential,
                    retrieved_from_cache: false,
                    sign_in_reason: self.take_sign_in_reason(),
                });
                Ok(())
            }
            Err(error) => {
                if let Err(e) = self.reset_credential().await {
                    warn!(error = %e, "failed to clear the stored credential after sign-in failure");
                }
                self.events.post(DocsEvent::UserSignInFailed {
                    correlation_id: correlation_id.to_string(),
                    error: error.clone(),
                    sign_in_reason: self.take_sign_in_reason(),
                });
                Err(error)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn sign_out(&self, correlation_id: &str) -> DocsResult<()> {
        self.events.post(DocsEvent::UserSignOutTriggered {
            correlation_id: correlation_id.to_string(),
        });
        match self.reset_credential().await {
            Ok(()) => {
                self.events.post(DocsEvent::UserSignOutSucceeded {
                    correlation_id: correlation_id.to_string(),
                });
                Ok(())
            }
            Err(error) => {
                self.events.post(DocsEvent::UserSignOutFailed {
                    correlation_id: correlation_id.to_string(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// React to other components' events until the stream closes.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => controller.handle_event(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "credential controller lagged behind the event stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_event(&self, event: &DocsEvent) {
        match event {
            DocsEvent::EnvironmentChanged { .. } => {
                let correlation_id = uuid::Uuid::new_v4().to_string();
                self.initialize(&correlation_id).await;
            }
            DocsEvent::RefreshCredential { correlation_id } => {
                self.initialize(correlation_id).await;
            }
            DocsEvent::CredentialExpired {
                during_real_time_validation,
            } => {
                if let Err(e) = self.reset_credential().await {
                    warn!(error = %e, "failed to clear the expired credential");
                }
                if *during_real_time_validation {
                    self.set_sign_in_reason(SignInReason::CredentialExpiredDuringRealTimeValidation);
                }
            }
            DocsEvent::BuildFailed {
                error: DocsError::NotSignedIn,
                ..
            } => {
                self.set_sign_in_reason(SignInReason::BuildTriggeredBeforeSignIn);
            }
            _ => {}
        }
    }

    async fn run_sign_in_flow(&self, provider: DocsRepoType) -> DocsResult<UserInfo> {
        let config = self.environment.config();
        let callback = callback_uri(&config.callback_scheme, provider)?;
        let url = sign_in_url(&config.api_base_url(), provider, &callback)?;

        // Listen before opening the browser so a fast callback is not lost.
        // `pending` is dropped on every return path, which disposes it.
        let mut pending = self.callbacks.listen();
        self.events.post(DocsEvent::UserSignInProgress {
            message: format!("Signing in with {provider}..."),
        });

        if !self.opener.open_external(&url).await {
            return Err(DocsError::SignInExternalUrlDeclined { provider });
        }

        let timeout_secs = config.sign_in_timeout_secs;
        let uri = tokio::select! {
            received = pending.recv() => received.ok_or_else(|| DocsError::SignInFailed {
                provider,
                message: "the sign-in was superseded by another sign-in".to_string(),
            })?,
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                return Err(DocsError::SignInTimedOut { provider, timeout_secs });
            }
        };
        drop(pending);

        parse_callback(&uri, provider)
    }

    async fn load_cached_user(&self) -> Option<UserInfo> {
        let key = credential_key(self.environment.environment());
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<UserInfo>(&raw) {
                Ok(user_info) => Some(user_info),
                Err(e) => {
                    warn!(error = %e, "stored credential is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read the stored credential");
                None
            }
        }
    }

    async fn persist(&self, user_info: &UserInfo) {
        let key = credential_key(self.environment.environment());
        let stored = match serde_json::to_string(user_info) {
            Ok(raw) => self.store.set(&key, &raw).await,
            Err(e) => Err(DocsError::CredentialStore {
                message: e.to_string(),
            }),
        };
        // The session stays signed in; only the next start has to sign in again.
        if let Err(e) = stored {
            warn!(error = %e, "failed to persist the credential");
        }
    }

    /// Clear the stored and in-memory credential. The in-memory credential is
    /// cleared even when the store fails.
    async fn reset_credential(&self) -> DocsResult<()> {
        let key = credential_key(self.environment.environment());
        let result = self.store.delete(&key).await;
        self.set_credential(Credential::signed_out());
        self.events.post(DocsEvent::CredentialReset);
        result
    }

    fn set_credential(&self, credential: Credential) {
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = credential;
    }

    fn set_sign_in_reason(&self, reason: SignInReason) {
        *self.sign_in_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
    }

    fn take_sign_in_reason(&self) -> Option<SignInReason> {
        self.sign_in_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
