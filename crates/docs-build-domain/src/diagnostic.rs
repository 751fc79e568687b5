//! Build report records and the editor diagnostics derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publish config file at the repository root. Diagnostics without a file
/// are reported against it.
pub const OP_CONFIG_FILE_NAME: &str = ".openpublishing.publish.config.json";

/// `source` attached to every diagnostic produced from the build report.
pub const DIAGNOSTIC_SOURCE: &str = "Docs Validation";

/// Diagnostic severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    Error,
    Warning,
    Info,
    Suggestion,
}

impl MessageSeverity {
    /// Map a severity string from the build log. Unrecognised values
    /// resolve to the lowest level.
    pub fn from_log(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => MessageSeverity::Error,
            "warning" => MessageSeverity::Warning,
            "info" => MessageSeverity::Info,
            _ => MessageSeverity::Suggestion,
        }
    }
}

/// Zero-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Zero-based range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// An editor diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: MessageSeverity,
    pub code: String,
    pub message: String,
    pub source: String,
}

/// One line of the build tool's newline-delimited JSON log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportItem {
    #[serde(default)]
    pub message_severity: String,
    #[serde(default)]
    pub log_item_type: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub file: Option<String>,
    /// 1-based.
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub end_line: Option<i64>,
    #[serde(default)]
    pub column: Option<i64>,
    #[serde(default)]
    pub end_column: Option<i64>,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pull_request_only: Option<bool>,
}

impl ReportItem {
    /// Items that only matter for pull request validation.
    pub fn is_pull_request_only(&self) -> bool {
        self.pull_request_only.unwrap_or(false)
    }

    /// File the diagnostic belongs to, relative to the repository root.
    pub fn source_file(&self) -> &str {
        match self.file.as_deref() {
            Some(file) if !file.trim().is_empty() => file,
            _ => OP_CONFIG_FILE_NAME,
        }
    }

    /// Zero-based range; missing or non-positive coordinates clamp to 0 and
    /// a missing end falls back to the start.
    pub fn range(&self) -> Range {
        let start = Position::new(to_zero_based(self.line), to_zero_based(self.column));
        let end = Position::new(
            to_zero_based(self.end_line.or(self.line)),
            to_zero_based(self.end_column.or(self.column)),
        );
        Range { start, end }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            range: self.range(),
            severity: MessageSeverity::from_log(&self.message_severity),
            code: self.code.clone(),
            message: self.message.clone(),
            source: DIAGNOSTIC_SOURCE.to_string(),
        }
    }
}

fn to_zero_based(value: Option<i64>) -> u32 {
    let value = value.unwrap_or(0).saturating_sub(1).max(0);
    u32::try_from(value).unwrap_or(u32::MAX)
}
