//! Build invocation records.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of build requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildType {
    FullBuild,
    PartialBuild,
}

/// Everything needed to run one build. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInput {
    pub workspace_name: String,
    pub build_type: BuildType,
    pub local_repository_path: PathBuf,
    pub local_repository_url: String,
    /// Provisioned repository the local one was forked or cloned from.
    pub original_repository_url: String,
    pub output_folder: PathBuf,
    pub log_path: PathBuf,
    pub dry_run: bool,
}

/// Terminal outcome of one build-tool phase or of the whole build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocfxExecutionResult {
    Succeeded,
    Failed,
    Canceled,
}

impl DocfxExecutionResult {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, DocfxExecutionResult::Succeeded)
    }
}

impl std::fmt::Display for DocfxExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocfxExecutionResult::Succeeded => f.write_str("Succeeded"),
            DocfxExecutionResult::Failed => f.write_str("Failed"),
            DocfxExecutionResult::Canceled => f.write_str("Canceled"),
        }
    }
}

/// Result of one `run_build` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub result: DocfxExecutionResult,
    pub is_restore_skipped: bool,
    pub restore_time_in_seconds: Option<f64>,
    pub build_time_in_seconds: Option<f64>,
}

impl BuildResult {
    pub fn new(result: DocfxExecutionResult, is_restore_skipped: bool) -> Self {
        Self {
            result,
            is_restore_skipped,
            restore_time_in_seconds: None,
            build_time_in_seconds: None,
        }
    }
}
