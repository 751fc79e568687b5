//! Error taxonomy for docs-build operations.
//!
//! Every variant maps to a stable [`ErrorCode`] so that observers of the
//! event stream can react to failures without matching on message text.
//! Errors are `Clone` because they travel inside [`crate::DocsEvent`]s.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::DocsRepoType;

/// Stable error codes, serialised in PascalCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Sign in
    GitHubSignInExternalUrlDeclined,
    GitHubSignInTimeOut,
    GitHubSignInFailed,
    AzureDevOpsSignInExternalUrlDeclined,
    AzureDevOpsSignInTimeOut,
    AzureDevOpsSignInFailed,
    CredentialStoreFailed,

    // Build
    TriggerCommandWithUnknownUserType,
    TriggerBuildNonWorkspace,
    TriggerBuildOnAmbiguousWorkspace,
    TriggerBuildBeforeSignIn,
    TriggerBuildInvalidCredential,
    TriggerBuildOnNonDocsRepo,
    TriggerBuildOnV2Repo,
    TriggerBuildOnInvalidDocsRepo,
    TriggerBuildWhenInstanceNotAvailable,
    RunDocfxFailed,
    GenerateReportFailed,
    CancelBuildFailed,

    // Others
    BuildServiceRequestFailed,
    LanguageServerFailed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// docs-build errors.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum DocsError {
    #[error("signing in with {provider} was cancelled: opening the sign-in page was declined")]
    SignInExternalUrlDeclined { provider: DocsRepoType },

    #[error("signing in with {provider} timed out after {timeout_secs} seconds")]
    SignInTimedOut {
        provider: DocsRepoType,
        timeout_secs: u64,
    },

    #[error("signing in with {provider} failed: {message}")]
    SignInFailed {
        provider: DocsRepoType,
        message: String,
    },

    #[error("credential store error: {message}")]
    CredentialStore { message: String },

    #[error("the user type is unknown; choose whether you are a Microsoft employee or a public contributor")]
    UnknownUserType,

    #[error("you can only trigger the build on a workspace folder")]
    NonWorkspace,

    #[error("{count} workspace folders are open; specify which one to build")]
    AmbiguousWorkspace { count: usize },

    #[error("you have to sign in first")]
    NotSignedIn,

    #[error("the credential was rejected by the build service; sign in again")]
    InvalidCredential,

    #[error("cannot find the publish config file in {path}; this is not a docs repository")]
    NonDocsRepo { path: String },

    #[error("the repository is built by the legacy engine '{engine}' which is not supported")]
    LegacyDocsRepo { engine: String },

    #[error("the repository is not a valid docs repository: {message}")]
    InvalidDocsRepo { message: String },

    #[error("a build is already in progress; cancel it or wait for it to finish")]
    InstanceNotAvailable,

    #[error("running the build tool failed")]
    BuildToolRunFailed,

    #[error("generating the build report failed: {message}")]
    ReportGenerationFailed { message: String },

    #[error("cancelling the build failed: {message}")]
    CancelBuildFailed { message: String },

    #[error("build service request failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api { status: Option<u16>, message: String },

    #[error("language server error: {message}")]
    LanguageServer { message: String },
}

impl DocsError {
    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DocsError::SignInExternalUrlDeclined { provider } => match provider {
                DocsRepoType::GitHub => ErrorCode::GitHubSignInExternalUrlDeclined,
                DocsRepoType::AzureDevOps => ErrorCode::AzureDevOpsSignInExternalUrlDeclined,
            },
            DocsError::SignInTimedOut { provider, .. } => match provider {
                DocsRepoType::GitHub => ErrorCode::GitHubSignInTimeOut,
                DocsRepoType::AzureDevOps => ErrorCode::AzureDevOpsSignInTimeOut,
            },
            DocsError::SignInFailed { provider, .. } => match provider {
                DocsRepoType::GitHub => ErrorCode::GitHubSignInFailed,
                DocsRepoType::AzureDevOps => ErrorCode::AzureDevOpsSignInFailed,
            },
            DocsError::CredentialStore { .. } => ErrorCode::CredentialStoreFailed,
            DocsError::UnknownUserType => ErrorCode::TriggerCommandWithUnknownUserType,
            DocsError::NonWorkspace => ErrorCode::TriggerBuildNonWorkspace,
            DocsError::AmbiguousWorkspace { .. } => ErrorCode::TriggerBuildOnAmbiguousWorkspace,
            DocsError::NotSignedIn => ErrorCode::TriggerBuildBeforeSignIn,
            DocsError::InvalidCredential => ErrorCode::TriggerBuildInvalidCredential,
            DocsError::NonDocsRepo { .. } => ErrorCode::TriggerBuildOnNonDocsRepo,
            DocsError::LegacyDocsRepo { .. } => ErrorCode::TriggerBuildOnV2Repo,
            DocsError::InvalidDocsRepo { .. } => ErrorCode::TriggerBuildOnInvalidDocsRepo,
            DocsError::InstanceNotAvailable => ErrorCode::TriggerBuildWhenInstanceNotAvailable,
            DocsError::BuildToolRunFailed => ErrorCode::RunDocfxFailed,
            DocsError::ReportGenerationFailed { .. } => ErrorCode::GenerateReportFailed,
            DocsError::CancelBuildFailed { .. } => ErrorCode::CancelBuildFailed,
            DocsError::Api { .. } => ErrorCode::BuildServiceRequestFailed,
            DocsError::LanguageServer { .. } => ErrorCode::LanguageServerFailed,
        }
    }

    /// Whether the build service rejected the credential (HTTP 401).
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, DocsError::InvalidCredential)
    }

    /// Whether this is a sign-in timeout, which the UI offers to retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DocsError::SignInTimedOut { .. })
    }
}

/// Result type for docs-build operations.
pub type DocsResult<T> = std::result::Result<T, DocsError>;
