//! Local repository inspection: git root, origin remote, locale and the
//! publish configuration at the repository root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docs_build_domain::{DocsError, DocsResult, OP_CONFIG_FILE_NAME};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;
use url::Url;

/// Build engine name of repositories this tool can build.
pub const SUPPORTED_BUILD_ENGINE: &str = "docfx_v3";

/// Locale assumed when the repository name carries none.
pub const DEFAULT_LOCALE: &str = "en-us";

/// Answers git questions about a local folder.
#[async_trait]
pub trait RepositoryInspector: Send + Sync {
    /// Top-level directory of the repository containing `path`.
    async fn repository_root(&self, path: &Path) -> DocsResult<PathBuf>;

    /// URL of the `origin` remote, normalised.
    async fn remote_url(&self, root: &Path) -> DocsResult<String>;
}

/// [`RepositoryInspector`] that shells out to `git`.
#[derive(Debug, Clone)]
pub struct GitRepositoryInspector {
    git: PathBuf,
}

impl Default for GitRepositoryInspector {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }
}

impl GitRepositoryInspector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> DocsResult<String> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| DocsError::InvalidDocsRepo {
                message: format!("failed to run git {}: {e}", args.join(" ")),
            })?;
        if !output.status.success() {
            return Err(DocsError::InvalidDocsRepo {
                message: format!(
                    "git {} failed in {}: {}",
                    args.join(" "),
                    cwd.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl RepositoryInspector for GitRepositoryInspector {
    async fn repository_root(&self, path: &Path) -> DocsResult<PathBuf> {
        let root = self.git(path, &["rev-parse", "--show-toplevel"]).await?;
        debug!(root = %root, "resolved repository root");
        Ok(PathBuf::from(root))
    }

    async fn remote_url(&self, root: &Path) -> DocsResult<String> {
        let raw = self.git(root, &["config", "--get", "remote.origin.url"]).await?;
        if raw.is_empty() {
            return Err(DocsError::InvalidDocsRepo {
                message: format!("{} has no origin remote", root.display()),
            });
        }
        Ok(normalize_remote_url(&raw))
    }
}

/// Canonical https form of a git remote URL.
///
/// `git@host:org/repo.git` becomes `https://host/org/repo`; credentials
/// embedded in https URLs and a trailing `.git` are dropped.
pub fn normalize_remote_url(raw: &str) -> String {
    let raw = raw.trim();
    let https = match Url::parse(raw) {
        Ok(mut url) => {
            if url.scheme() == "ssh" {
                let host = url.host_str().unwrap_or_default().to_string();
                format!("https://{host}{}", url.path())
            } else {
                let _ = url.set_username("");
                let _ = url.set_password(None);
                url.to_string()
            }
        }
        // scp-like syntax: user@host:path
        Err(_) => match raw.split_once(':') {
            Some((user_host, path)) => {
                let host = user_host.rsplit('@').next().unwrap_or(user_host);
                format!("https://{host}/{}", path.trim_start_matches('/'))
            }
            None => raw.to_string(),
        },
    };
    let trimmed = https.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

/// Locale encoded as a `.<ll-cc>` suffix of the repository name
/// (`azure-docs-pr.zh-cn`), else [`DEFAULT_LOCALE`].
pub fn locale_from_repository_url(url: &str) -> String {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let name = name.strip_suffix(".git").unwrap_or(name);
    name.rsplit_once('.')
        .map(|(_, suffix)| suffix)
        .filter(|suffix| is_locale(suffix))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

fn is_locale(candidate: &str) -> bool {
    match candidate.split_once('-') {
        Some((language, region)) => {
            language.len() == 2
                && (2..=4).contains(&region.len())
                && language.chars().all(|c| c.is_ascii_alphabetic())
                && region.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BuildEngine {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DocsetToPublish {
    #[serde(default)]
    pub docset_name: String,
}

/// The parts of `.openpublishing.publish.config.json` the build relies on.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PublishConfig {
    #[serde(default)]
    pub docs_build_engine: Option<BuildEngine>,
    #[serde(default)]
    pub docsets_to_publish: Vec<DocsetToPublish>,
}

impl PublishConfig {
    /// Read the publish config at `root`. A missing file means `root` is not
    /// a docs repository.
    pub async fn load(root: &Path) -> DocsResult<Self> {
        let path = root.join(OP_CONFIG_FILE_NAME);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocsError::NonDocsRepo {
                    path: root.display().to_string(),
                })
            }
            Err(e) => {
                return Err(DocsError::InvalidDocsRepo {
                    message: format!("failed to read {}: {e}", path.display()),
                })
            }
        };
        serde_json::from_str(&raw).map_err(|e| DocsError::InvalidDocsRepo {
            message: format!("failed to parse {}: {e}", path.display()),
        })
    }

    pub fn engine_name(&self) -> &str {
        self.docs_build_engine
            .as_ref()
            .map(|e| e.name.as_str())
            .unwrap_or_default()
    }

    /// Fails with [`DocsError::LegacyDocsRepo`] unless the repository uses
    /// the supported engine.
    pub fn ensure_supported_engine(&self) -> DocsResult<()> {
        let engine = self.engine_name();
        if engine == SUPPORTED_BUILD_ENGINE {
            Ok(())
        } else {
            Err(DocsError::LegacyDocsRepo {
                engine: engine.to_string(),
            })
        }
    }

    pub fn docset_names(&self) -> impl Iterator<Item = &str> {
        self.docsets_to_publish
            .iter()
            .map(|d| d.docset_name.as_str())
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_remote_url() {
        assert_eq!(
            normalize_remote_url("git@github.com:MicrosoftDocs/azure-docs.git"),
            "https://github.com/MicrosoftDocs/azure-docs"
        );
        assert_eq!(
            normalize_remote_url("https://org@dev.azure.com/org/proj/_git/docs"),
            "https://dev.azure.com/org/proj/_git/docs"
        );
        assert_eq!(
            normalize_remote_url("ssh://git@github.com/me/repo.git"),
            "https://github.com/me/repo"
        );
        assert_eq!(
            normalize_remote_url("https://github.com/me/repo/"),
            "https://github.com/me/repo"
        );
    }

    #[test]
    fn test_locale_from_repository_url() {
        assert_eq!(
            locale_from_repository_url("https://github.com/MicrosoftDocs/azure-docs-pr.zh-CN"),
            "zh-cn"
        );
        assert_eq!(
            locale_from_repository_url("https://github.com/MicrosoftDocs/azure-docs-pr"),
            "en-us"
        );
        assert_eq!(
            locale_from_repository_url("https://github.com/me/docs.v2"),
            "en-us"
        );
        assert_eq!(
            locale_from_repository_url("https://github.com/me/docs.sr-latn-rs"),
            "en-us"
        );
    }

    #[tokio::test]
    async fn test_publish_config_missing_is_non_docs_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = PublishConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, DocsError::NonDocsRepo { .. }));
    }

    #[tokio::test]
    async fn test_publish_config_engine_and_docsets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(OP_CONFIG_FILE_NAME),
            r#"{
                "docs_build_engine": {"name": "docfx_v3"},
                "docsets_to_publish": [
                    {"docset_name": "azure-docs", "build_source_folder": "."},
                    {"docset_name": ""}
                ]
            }"#,
        )
        .unwrap();
        let config = PublishConfig::load(dir.path()).await.unwrap();
        config.ensure_supported_engine().unwrap();
        assert_eq!(config.docset_names().collect::<Vec<_>>(), vec!["azure-docs"]);
    }

    #[test]
    fn test_legacy_engine_is_rejected() {
        let config: PublishConfig =
            serde_json::from_str(r#"{"docs_build_engine": {"name": "docfx_v2"}}"#).unwrap();
        assert_eq!(
            config.ensure_supported_engine(),
            Err(DocsError::LegacyDocsRepo {
                engine: "docfx_v2".to_string()
            })
        );
        let missing = PublishConfig::default();
        assert!(missing.ensure_supported_engine().is_err());
    }

    #[tokio::test]
    async fn test_corrupt_publish_config_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OP_CONFIG_FILE_NAME), "{").unwrap();
        assert!(matches!(
            PublishConfig::load(dir.path()).await,
            Err(DocsError::InvalidDocsRepo { .. })
        ));
    }
}
