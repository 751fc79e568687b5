//! Credential value objects.

use serde::{Deserialize, Serialize};

use crate::environment::DocsRepoType;

/// Header carrying the build-service user token, both on API requests and
/// in the OAuth callback query.
pub const BUILD_USER_TOKEN_HEADER: &str = "X-OP-BuildUserToken";

/// Sign-in state of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignInStatus {
    Initializing,
    SigningIn,
    SignedIn,
    SignedOut,
}

/// Identity returned by the sign-in callback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub user_token: String,
    pub sign_type: DocsRepoType,
}

impl std::fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserInfo")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("user_email", &self.user_email)
            .field("user_token", &"<redacted>")
            .field("sign_type", &self.sign_type)
            .finish()
    }
}

/// Sign-in status plus the identity, when signed in.
///
/// `user_info` is present exactly when the status is [`SignInStatus::SignedIn`];
/// the constructors are the only way to build a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    sign_in_status: SignInStatus,
    user_info: Option<UserInfo>,
}

impl Credential {
    /// Credential of a freshly constructed controller.
    pub fn initializing() -> Self {
        Self::without_user(SignInStatus::Initializing)
    }

    pub fn signing_in() -> Self {
        Self::without_user(SignInStatus::SigningIn)
    }

    pub fn signed_out() -> Self {
        Self::without_user(SignInStatus::SignedOut)
    }

    pub fn signed_in(user_info: UserInfo) -> Self {
        Self {
            sign_in_status: SignInStatus::SignedIn,
            user_info: Some(user_info),
        }
    }

    fn without_user(sign_in_status: SignInStatus) -> Self {
        Self {
            sign_in_status,
            user_info: None,
        }
    }

    pub fn sign_in_status(&self) -> SignInStatus {
        self.sign_in_status
    }

    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.sign_in_status == SignInStatus::SignedIn
    }

    /// Token to send to the build service, if signed in.
    pub fn user_token(&self) -> Option<&str> {
        self.user_info.as_ref().map(|u| u.user_token.as_str())
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::initializing()
    }
}

/// What triggered a sign-in; tailors the follow-up once sign-in completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignInReason {
    /// The real-time validation server reported an expired credential.
    CredentialExpiredDuringRealTimeValidation,
    /// A build was triggered before signing in.
    BuildTriggeredBeforeSignIn,
}
