//! Seams to the host editor.
//!
//! The editor owns workspace folders, diagnostics rendering and the system
//! browser. docs-build only talks to it through these traits; in-memory
//! implementations live in [`crate::fakes`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docs_build_domain::Diagnostic;

/// An open workspace folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFolder {
    pub name: String,
    pub path: PathBuf,
}

impl WorkspaceFolder {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Folder name taken from the last path component.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { name, path }
    }

    pub fn contains(&self, target: &Path) -> bool {
        target.starts_with(&self.path)
    }
}

/// Lists the folders open in the editor.
pub trait WorkspaceProvider: Send + Sync {
    fn workspace_folders(&self) -> Vec<WorkspaceFolder>;
}

/// Receives diagnostics for display.
pub trait DiagnosticSink: Send + Sync {
    /// Remove every diagnostic previously set.
    fn clear(&self);

    /// Replace the diagnostics of one file.
    fn set(&self, file: &Path, diagnostics: Vec<Diagnostic>);
}

/// Opens URLs outside the editor (the system browser).
#[async_trait]
pub trait ExternalUriOpener: Send + Sync {
    /// Returns `false` when the user declined to open the URL.
    async fn open_external(&self, url: &url::Url) -> bool;
}
