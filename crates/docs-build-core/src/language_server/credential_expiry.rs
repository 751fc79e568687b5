//! Answers the validation server's `docfx/getCredential` requests.
//!
//! The first request of a session asks for the current token. Any later
//! request means the server's token was rejected: the handler announces the
//! expiry, waits for the user to sign in again and answers with whatever
//! that sign-in produced.

use std::sync::Arc;

use docs_build_domain::{Credential, DocsEvent, EventStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::build::HttpSecrets;
use crate::config::EnvironmentController;
use crate::credential::CredentialController;

pub const GET_CREDENTIAL_METHOD: &str = "docfx/getCredential";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCredentialParams {
    pub url: String,
    #[serde(default)]
    pub is_initial_request: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCredentialResponse {
    pub http: HttpSecrets,
}

/// Where the handler reads the current credential from.
pub trait CredentialSource: Send + Sync {
    fn current_credential(&self) -> Credential;
}

impl CredentialSource for CredentialController {
    fn current_credential(&self) -> Credential {
        self.credential()
    }
}

pub struct CredentialExpiryHandler {
    events: EventStream,
    environment: Arc<EnvironmentController>,
    credentials: Arc<dyn CredentialSource>,
}

impl CredentialExpiryHandler {
    pub fn new(
        events: EventStream,
        environment: Arc<EnvironmentController>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            events,
            environment,
            credentials,
        }
    }

    pub async fn get_credential(&self, params: &GetCredentialParams) -> GetCredentialResponse {
        if params.is_initial_request {
            return self.response_for(&self.credentials.current_credential());
        }

        // Subscribe first so the sign-in outcome cannot slip past.
        let mut receiver = self.events.subscribe();
        info!(url = %params.url, "validation server reported an expired credential");
        self.events.post(DocsEvent::CredentialExpired {
            during_real_time_validation: true,
        });

        loop {
            match receiver.recv().await {
                Ok(DocsEvent::UserSignInSucceeded { credential, .. }) => {
                    return self.response_for(&credential);
                }
                Ok(DocsEvent::UserSignInFailed { .. }) => return GetCredentialResponse::default(),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "credential expiry handler lagged behind the event stream");
                }
                Err(RecvError::Closed) => return GetCredentialResponse::default(),
            }
        }
    }

    fn response_for(&self, credential: &Credential) -> GetCredentialResponse {
        let token = credential.is_signed_in().then(|| credential.user_token()).flatten();
        GetCredentialResponse {
            http: HttpSecrets::for_token(&self.environment.api_base_url(), token),
        }
    }
}
