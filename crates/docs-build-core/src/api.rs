//! Client for the OP build validation API.
//!
//! Every request carries the signed-in user's token in the
//! `X-OP-BuildUserToken` header. A 401 means the token was rejected and is
//! reported as [`DocsError::InvalidCredential`]; lookups answer "not found"
//! with a 404 or an empty body.

use std::sync::Arc;

use async_trait::async_trait;
use docs_build_domain::{DocsError, DocsResult, BUILD_USER_TOKEN_HEADER};
use reqwest::StatusCode;
use tracing::debug;

use crate::config::EnvironmentController;

/// Build service operations the build pipeline depends on.
#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Upstream (provisioned) repository URL for a git remote URL.
    async fn provisioned_repository_url_by_repository_url(
        &self,
        git_repo_url: &str,
        token: Option<&str>,
    ) -> DocsResult<Option<String>>;

    /// Upstream repository URL for a docset published in `locale`.
    async fn provisioned_repository_url_by_docset_name_and_locale(
        &self,
        docset_name: &str,
        locale: &str,
        token: Option<&str>,
    ) -> DocsResult<Option<String>>;

    /// Succeeds when the service accepts `token`.
    async fn validate_credential(&self, token: &str) -> DocsResult<()>;
}

/// reqwest-backed [`BuildApi`]. The base URL follows the current environment.
pub struct OpBuildApiClient {
    environment: Arc<EnvironmentController>,
    http_client: reqwest::Client,
}

impl OpBuildApiClient {
    pub fn new(environment: Arc<EnvironmentController>) -> DocsResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("docs-build/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DocsError::Api {
                status: None,
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            environment,
            http_client,
        })
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> DocsResult<Option<String>> {
        let url = format!("{}{}", self.environment.api_base_url(), path);
        let mut request = self.http_client.get(&url).query(query);
        if let Some(token) = token {
            request = request.header(BUILD_USER_TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| DocsError::Api {
            status: None,
            message: format!("GET {path} failed: {e}"),
        })?;
        let status = response.status();
        debug!(path, status = status.as_u16(), "build service responded");

        match status {
            StatusCode::UNAUTHORIZED => return Err(DocsError::InvalidCredential),
            StatusCode::NOT_FOUND => return Ok(None),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(DocsError::Api {
                    status: Some(s.as_u16()),
                    message: format!("GET {path} returned {s}: {}", body.trim()),
                });
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| DocsError::Api {
            status: Some(status.as_u16()),
            message: format!("failed to read response of GET {path}: {e}"),
        })?;
        Ok(Some(body))
    }
}

/// The lookups answer with a JSON string (or `null`); older deployments
/// answer with the bare URL.
fn parse_repository_url(body: Option<String>) -> Option<String> {
    let body = body?;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = match serde_json::from_str::<Option<String>>(trimmed) {
        Ok(parsed) => parsed?,
        Err(_) => trimmed.to_string(),
    };
    (!url.is_empty()).then_some(url)
}

#[async_trait]
impl BuildApi for OpBuildApiClient {
    async fn provisioned_repository_url_by_repository_url(
        &self,
        git_repo_url: &str,
        token: Option<&str>,
    ) -> DocsResult<Option<String>> {
        let body = self
            .get(
                "/v2/Repositories/ProvisionedRepositoryUrlByRepositoryUrl",
                &[("gitRepoUrl", git_repo_url)],
                token,
            )
            .await?;
        Ok(parse_repository_url(body))
    }

    async fn provisioned_repository_url_by_docset_name_and_locale(
        &self,
        docset_name: &str,
        locale: &str,
        token: Option<&str>,
    ) -> DocsResult<Option<String>> {
        let body = self
            .get(
                "/v2/Repositories/ProvisionedRepositoryUrlByDocsetNameAndLocale",
                &[("docsetName", docset_name), ("locale", locale)],
                token,
            )
            .await?;
        Ok(parse_repository_url(body))
    }

    async fn validate_credential(&self, token: &str) -> DocsResult<()> {
        match self.get("/v1/Users/OpsPermission", &[], Some(token)).await? {
            Some(_) => Ok(()),
            None => Err(DocsError::Api {
                status: Some(404),
                message: "credential validation endpoint not found".to_string(),
            }),
        }
    }
}
