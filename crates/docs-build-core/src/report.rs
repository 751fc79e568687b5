//! Build log to editor diagnostics.
//!
//! The build tool writes one JSON record per line. Every record that is not
//! pull-request-only becomes a diagnostic on its source file (the publish
//! config when the record names no file). The caller clears the sink before
//! generating a report; the whole log is parsed before any file is set, so a
//! malformed log publishes nothing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docs_build_domain::{Diagnostic, DocsError, DocsEvent, DocsResult, EventStream, ReportItem};
use tracing::debug;

use crate::host::DiagnosticSink;

/// Publish the diagnostics of the log at `log_path`. A missing log is a
/// build without findings.
pub async fn visualize_build_report(
    repository_path: &Path,
    log_path: &Path,
    sink: &dyn DiagnosticSink,
    events: &EventStream,
) -> DocsResult<()> {
    let raw = match tokio::fs::read_to_string(log_path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            events.post(DocsEvent::BuildProgress {
                message: format!("Log file {} not found; no report generated", log_path.display()),
            });
            return Ok(());
        }
        Err(e) => {
            return Err(DocsError::ReportGenerationFailed {
                message: format!("failed to read {}: {e}", log_path.display()),
            })
        }
    };

    let report = parse_report(repository_path, &raw)?;
    debug!(files = report.len(), "build report parsed");

    for (file, diagnostics) in report {
        sink.set(&file, diagnostics);
    }
    Ok(())
}

/// Diagnostics grouped by absolute file path, in log order within a file.
pub fn parse_report(
    repository_path: &Path,
    raw: &str,
) -> DocsResult<BTreeMap<PathBuf, Vec<Diagnostic>>> {
    let mut report: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: ReportItem =
            serde_json::from_str(line).map_err(|e| DocsError::ReportGenerationFailed {
                message: format!("invalid log record on line {}: {e}", index + 1),
            })?;
        if item.is_pull_request_only() {
            continue;
        }
        report
            .entry(repository_path.join(item.source_file()))
            .or_default()
            .push(item.to_diagnostic());
    }
    Ok(report)
}
