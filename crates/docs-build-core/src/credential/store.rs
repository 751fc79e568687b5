//! Secret storage for the signed-in user's credential.
//!
//! `CredentialStore` is get/set/delete by key and nothing more. Three
//! implementations:
//! - `MemoryCredentialStore`: process memory (tests, ephemeral hosts)
//! - `FileCredentialStore`: a JSON document readable only by the owner
//! - `UnavailableCredentialStore`: injected when no secret store exists;
//!   every call fails

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use docs_build_domain::{DocsError, DocsResult, Environment};

/// Store key of the credential for `environment`.
pub fn credential_key(environment: Environment) -> String {
    format!("docs-build-{}", environment.as_str().to_ascii_lowercase())
}

/// Named secret storage.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> DocsResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> DocsResult<()>;

    /// No-op if absent.
    async fn delete(&self, key: &str) -> DocsResult<()>;
}

fn store_error<E: std::fmt::Display>(message: E) -> DocsError {
    DocsError::CredentialStore {
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// MemoryCredentialStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> DocsResult<Option<String>> {
        let secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(secrets.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> DocsResult<()> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> DocsResult<()> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UnavailableCredentialStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCredentialStore;

#[async_trait]
impl CredentialStore for UnavailableCredentialStore {
    async fn get(&self, _key: &str) -> DocsResult<Option<String>> {
        Err(store_error("no secret store is available on this platform"))
    }

    async fn set(&self, _key: &str, _value: &str) -> DocsResult<()> {
        Err(store_error("no secret store is available on this platform"))
    }

    async fn delete(&self, _key: &str) -> DocsResult<()> {
        Err(store_error("no secret store is available on this platform"))
    }
}

// ---------------------------------------------------------------------------
// FileCredentialStore
// ---------------------------------------------------------------------------

/// Secrets kept in one JSON object on disk.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    // Serialises read-modify-write cycles.
    lock: tokio::sync::Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `credentials.json` under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> DocsResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(store_error),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn save(&self, secrets: &BTreeMap<String, String>) -> DocsResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(store_error)?;
        }
        let bytes = serde_json::to_vec_pretty(secrets).map_err(store_error)?;
        tokio::fs::write(&self.path, bytes).await.map_err(store_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(store_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> DocsResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> DocsResult<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.load().await?;
        secrets.insert(key.to_string(), value.to_string());
        self.save(&secrets).await
    }

    async fn delete(&self, key: &str) -> DocsResult<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.load().await?;
        if secrets.remove(key).is_some() {
            self.save(&secrets).await?;
        }
        Ok(())
    }
}
