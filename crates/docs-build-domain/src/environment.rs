//! Environment, user-type and repository-type enums.

use serde::{Deserialize, Serialize};

/// Build service environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Environment {
    #[default]
    Prod,
    #[serde(rename = "PPE")]
    Ppe,
}

impl Environment {
    /// Name passed to the build tool through `DOCS_ENVIRONMENT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "PROD",
            Environment::Ppe => "PPE",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "ppe" | "sandbox" => Ok(Environment::Ppe),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Who is using the extension. Decides whether signing in is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UserType {
    #[default]
    MicrosoftEmployee,
    PublicContributor,
    Unknown,
}

impl UserType {
    /// Only employees authenticate against the build service.
    pub fn requires_authentication(&self) -> bool {
        matches!(self, UserType::MicrosoftEmployee)
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "microsoftemployee" | "employee" => Ok(UserType::MicrosoftEmployee),
            "publiccontributor" | "public" => Ok(UserType::PublicContributor),
            "unknown" => Ok(UserType::Unknown),
            other => Err(format!("unknown user type: {other}")),
        }
    }
}

/// Hosting of the docs repository; also selects the sign-in provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DocsRepoType {
    #[default]
    GitHub,
    AzureDevOps,
}

impl DocsRepoType {
    /// Provider segment used in sign-in and callback URLs.
    pub fn provider_path(&self) -> &'static str {
        match self {
            DocsRepoType::GitHub => "github",
            DocsRepoType::AzureDevOps => "azuredevops",
        }
    }
}

impl std::fmt::Display for DocsRepoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocsRepoType::GitHub => f.write_str("GitHub"),
            DocsRepoType::AzureDevOps => f.write_str("Azure DevOps"),
        }
    }
}

impl std::str::FromStr for DocsRepoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "github" => Ok(DocsRepoType::GitHub),
            "azuredevops" | "ado" => Ok(DocsRepoType::AzureDevOps),
            other => Err(format!("unknown docs repository type: {other}")),
        }
    }
}
