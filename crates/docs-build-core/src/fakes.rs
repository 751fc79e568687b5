//! In-memory fakes for the host seams and external services (testing only)
//!
//! Provides `MemoryWorkspace`, `MemoryDiagnosticSink`, `ScriptedUriOpener`,
//! `FakeBuildApi`, `FakeRepositoryInspector` and `FakeBuildRunner` that
//! satisfy the trait contracts without an editor, a network or a build tool.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use docs_build_domain::{
    BuildInput, BuildResult, Diagnostic, DocfxExecutionResult, DocsError, DocsResult,
};
use tokio::sync::Notify;
use url::Url;

use crate::api::BuildApi;
use crate::build::BuildRunner;
use crate::credential::CallbackHub;
use crate::host::{DiagnosticSink, ExternalUriOpener, WorkspaceFolder, WorkspaceProvider};
use crate::repository::RepositoryInspector;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryWorkspace
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    folders: Mutex<Vec<WorkspaceFolder>>,
}

impl MemoryWorkspace {
    pub fn new(folders: Vec<WorkspaceFolder>) -> Self {
        Self {
            folders: Mutex::new(folders),
        }
    }

    pub fn set_folders(&self, folders: Vec<WorkspaceFolder>) {
        *lock(&self.folders) = folders;
    }
}

impl WorkspaceProvider for MemoryWorkspace {
    fn workspace_folders(&self) -> Vec<WorkspaceFolder> {
        lock(&self.folders).clone()
    }
}

// ---------------------------------------------------------------------------
// MemoryDiagnosticSink
// ---------------------------------------------------------------------------

/// Diagnostics per file, as an editor would display them.
#[derive(Debug, Default)]
pub struct MemoryDiagnosticSink {
    files: Mutex<BTreeMap<PathBuf, Vec<Diagnostic>>>,
    clears: AtomicUsize,
}

impl MemoryDiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file: &Path) -> Option<Vec<Diagnostic>> {
        lock(&self.files).get(file).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<Diagnostic>> {
        lock(&self.files).clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl DiagnosticSink for MemoryDiagnosticSink {
    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        lock(&self.files).clear();
    }

    fn set(&self, file: &Path, diagnostics: Vec<Diagnostic>) {
        lock(&self.files).insert(file.to_path_buf(), diagnostics);
    }
}

// ---------------------------------------------------------------------------
// ScriptedUriOpener
// ---------------------------------------------------------------------------

/// Records opened URLs; optionally plays the browser by delivering a
/// callback URI to a [`CallbackHub`].
#[derive(Debug, Default)]
pub struct ScriptedUriOpener {
    declines: bool,
    callback: Option<(CallbackHub, Url)>,
    opened: Mutex<Vec<Url>>,
}

impl ScriptedUriOpener {
    /// Opens the URL; the callback never arrives.
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn declining() -> Self {
        Self {
            declines: true,
            ..Self::default()
        }
    }

    /// Opens the URL and immediately redirects to `callback`.
    pub fn delivering(hub: CallbackHub, callback: Url) -> Self {
        Self {
            callback: Some((hub, callback)),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<Url> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl ExternalUriOpener for ScriptedUriOpener {
    async fn open_external(&self, url: &Url) -> bool {
        lock(&self.opened).push(url.clone());
        if self.declines {
            return false;
        }
        if let Some((hub, callback)) = &self.callback {
            hub.deliver(callback.clone());
        }
        true
    }
}

// ---------------------------------------------------------------------------
// FakeBuildApi
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeBuildApi {
    by_repository: HashMap<String, String>,
    by_docset: HashMap<(String, String), String>,
    rejects_credentials: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeBuildApi {
    /// Knows no repository and accepts every token.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(mut self, local_url: &str, upstream_url: &str) -> Self {
        self.by_repository
            .insert(local_url.to_string(), upstream_url.to_string());
        self
    }

    pub fn with_docset(mut self, docset_name: &str, locale: &str, upstream_url: &str) -> Self {
        self.by_docset.insert(
            (docset_name.to_string(), locale.to_string()),
            upstream_url.to_string(),
        );
        self
    }

    /// Answers 401 to every credential validation.
    pub fn rejecting_credentials(mut self) -> Self {
        self.rejects_credentials = true;
        self
    }

    /// Calls made so far, as `method(args)`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl BuildApi for FakeBuildApi {
    async fn provisioned_repository_url_by_repository_url(
        &self,
        git_repo_url: &str,
        _token: Option<&str>,
    ) -> DocsResult<Option<String>> {
        lock(&self.calls).push(format!("by_repository({git_repo_url})"));
        Ok(self.by_repository.get(git_repo_url).cloned())
    }

    async fn provisioned_repository_url_by_docset_name_and_locale(
        &self,
        docset_name: &str,
        locale: &str,
        _token: Option<&str>,
    ) -> DocsResult<Option<String>> {
        lock(&self.calls).push(format!("by_docset({docset_name}, {locale})"));
        Ok(self
            .by_docset
            .get(&(docset_name.to_string(), locale.to_string()))
            .cloned())
    }

    async fn validate_credential(&self, _token: &str) -> DocsResult<()> {
        lock(&self.calls).push("validate_credential".to_string());
        if self.rejects_credentials {
            Err(DocsError::InvalidCredential)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRepositoryInspector
// ---------------------------------------------------------------------------

/// Every folder belongs to one repository at `root` with origin `remote_url`.
#[derive(Debug, Clone)]
pub struct FakeRepositoryInspector {
    root: PathBuf,
    remote_url: String,
}

impl FakeRepositoryInspector {
    pub fn new(root: impl Into<PathBuf>, remote_url: &str) -> Self {
        Self {
            root: root.into(),
            remote_url: remote_url.to_string(),
        }
    }
}

#[async_trait]
impl RepositoryInspector for FakeRepositoryInspector {
    async fn repository_root(&self, _path: &Path) -> DocsResult<PathBuf> {
        Ok(self.root.clone())
    }

    async fn remote_url(&self, _root: &Path) -> DocsResult<String> {
        Ok(self.remote_url.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeBuildRunner
// ---------------------------------------------------------------------------

/// Scripted [`BuildRunner`]. A held runner stays "running" until
/// [`FakeBuildRunner::release`] or a cancel.
#[derive(Debug)]
pub struct FakeBuildRunner {
    result: Mutex<DocfxExecutionResult>,
    held: bool,
    log: Option<String>,
    started: Notify,
    release: Notify,
    runs: AtomicUsize,
    cancels: AtomicUsize,
    inputs: Mutex<Vec<BuildInput>>,
}

impl FakeBuildRunner {
    pub fn with_result(result: DocfxExecutionResult) -> Self {
        Self {
            result: Mutex::new(result),
            held: false,
            log: None,
            started: Notify::new(),
            release: Notify::new(),
            runs: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_result(DocfxExecutionResult::Succeeded)
    }

    /// Runs block until released or canceled.
    pub fn held(mut self) -> Self {
        self.held = true;
        self
    }

    /// Write `content` to the build log during each run.
    pub fn writing_log(mut self, content: &str) -> Self {
        self.log = Some(content.to_string());
        self
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Wait until a run has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<BuildInput> {
        lock(&self.inputs).clone()
    }
}

#[async_trait]
impl BuildRunner for FakeBuildRunner {
    async fn run_build(
        &self,
        _correlation_id: &str,
        input: &BuildInput,
        _user_token: Option<&str>,
    ) -> BuildResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        lock(&self.inputs).push(input.clone());
        if let Some(log) = &self.log {
            if let Some(parent) = input.log_path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let _ = tokio::fs::write(&input.log_path, log).await;
        }
        self.started.notify_one();
        if self.held {
            self.release.notified().await;
        }
        BuildResult::new(*lock(&self.result), false)
    }

    async fn cancel_build(&self) -> DocsResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        *lock(&self.result) = DocfxExecutionResult::Canceled;
        self.release.notify_one();
        Ok(())
    }
}
