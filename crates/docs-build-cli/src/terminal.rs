//! Terminal implementations of the host seams.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use docs_build_core::{CallbackHub, DiagnosticSink, ExternalUriOpener, WorkspaceFolder, WorkspaceProvider};
use docs_build_domain::{Diagnostic, MessageSeverity};
use tracing::warn;
use url::Url;

/// Prints the sign-in URL and takes the callback URI from stdin, where the
/// user pastes the address the browser was redirected to.
pub struct StdinUriOpener {
    hub: CallbackHub,
}

impl StdinUriOpener {
    pub fn new(hub: CallbackHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ExternalUriOpener for StdinUriOpener {
    async fn open_external(&self, url: &Url) -> bool {
        println!("Open this URL in your browser to sign in:");
        println!();
        println!("  {url}");
        println!();
        println!("Then paste the address you were redirected to and press Enter:");

        // A plain thread: a pending stdin read must not keep the runtime
        // from shutting down after a timeout.
        let hub = self.hub.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            if std::io::stdin().lock().read_line(&mut line).is_err() {
                return;
            }
            match Url::parse(line.trim()) {
                Ok(callback) => {
                    hub.deliver(callback);
                }
                Err(e) => warn!(error = %e, "ignoring invalid callback address"),
            }
        });
        true
    }
}

/// The directory docs-build was started in.
pub struct CurrentDirWorkspace {
    folder: WorkspaceFolder,
}

impl CurrentDirWorkspace {
    pub fn new(path: PathBuf) -> Self {
        Self {
            folder: WorkspaceFolder::from_path(path),
        }
    }
}

impl WorkspaceProvider for CurrentDirWorkspace {
    fn workspace_folders(&self) -> Vec<WorkspaceFolder> {
        vec![self.folder.clone()]
    }
}

/// Collects diagnostics; in live mode also prints each update.
#[derive(Default)]
pub struct TerminalSink {
    live: bool,
    files: Mutex<BTreeMap<PathBuf, Vec<Diagnostic>>>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live() -> Self {
        Self {
            live: true,
            ..Self::default()
        }
    }

    /// Print every file's diagnostics; returns the count per severity.
    pub fn print_all(&self) -> BTreeMap<MessageSeverity, usize> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = BTreeMap::new();
        for (file, diagnostics) in files.iter() {
            for diagnostic in diagnostics {
                *counts.entry(diagnostic.severity).or_insert(0) += 1;
            }
            print_file(file, diagnostics);
        }
        counts
    }
}

impl DiagnosticSink for TerminalSink {
    fn clear(&self) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn set(&self, file: &Path, diagnostics: Vec<Diagnostic>) {
        if self.live {
            print_file(file, &diagnostics);
        }
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file.to_path_buf(), diagnostics);
    }
}

fn print_file(file: &Path, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        println!("{}", format_diagnostic(file, diagnostic));
    }
}

pub fn severity_label(severity: MessageSeverity) -> &'static str {
    match severity {
        MessageSeverity::Error => "error",
        MessageSeverity::Warning => "warning",
        MessageSeverity::Info => "info",
        MessageSeverity::Suggestion => "suggestion",
    }
}

/// `path:line:column: severity [code] message`, one-based.
pub fn format_diagnostic(file: &Path, diagnostic: &Diagnostic) -> String {
    let code = if diagnostic.code.is_empty() {
        String::new()
    } else {
        format!("[{}] ", diagnostic.code)
    };
    format!(
        "{}:{}:{}: {} {}{}",
        file.display(),
        diagnostic.range.start.line + 1,
        diagnostic.range.start.character + 1,
        severity_label(diagnostic.severity),
        code,
        diagnostic.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docs_build_domain::{Position, Range, DIAGNOSTIC_SOURCE};

    fn diagnostic(severity: MessageSeverity, code: &str) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position::new(4, 0),
                end: Position::new(4, 2),
            },
            severity,
            code: code.to_string(),
            message: "Missing H1".to_string(),
            source: DIAGNOSTIC_SOURCE.to_string(),
        }
    }

    #[test]
    fn test_format_diagnostic_is_one_based() {
        let line = format_diagnostic(
            Path::new("docs/index.md"),
            &diagnostic(MessageSeverity::Warning, "h1-missing"),
        );
        assert_eq!(line, "docs/index.md:5:1: warning [h1-missing] Missing H1");
    }

    #[test]
    fn test_sink_counts_by_severity() {
        let sink = TerminalSink::new();
        sink.set(
            Path::new("a.md"),
            vec![
                diagnostic(MessageSeverity::Error, "a"),
                diagnostic(MessageSeverity::Error, "b"),
            ],
        );
        sink.set(Path::new("b.md"), vec![diagnostic(MessageSeverity::Info, "")]);

        let counts = sink.print_all();
        assert_eq!(counts.get(&MessageSeverity::Error), Some(&2));
        assert_eq!(counts.get(&MessageSeverity::Info), Some(&1));

        sink.clear();
        assert!(sink.print_all().is_empty());
    }
}
