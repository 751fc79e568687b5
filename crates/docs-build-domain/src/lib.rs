//! docs-build domain model
//!
//! Value types shared by every docs-build component:
//! - `DocsEvent` / `EventStream`: the typed event backbone
//! - `DocsError` / `ErrorCode`: error taxonomy with stable codes
//! - `Credential` / `UserInfo`: sign-in state
//! - `BuildInput` / `BuildResult`: one build invocation and its outcome
//! - `ReportItem` / `Diagnostic`: build log records and editor diagnostics

pub mod build;
pub mod credential;
pub mod diagnostic;
pub mod environment;
pub mod error;
pub mod events;

pub use build::{BuildInput, BuildResult, BuildType, DocfxExecutionResult};
pub use credential::{
    Credential, SignInReason, SignInStatus, UserInfo, BUILD_USER_TOKEN_HEADER,
};
pub use diagnostic::{
    Diagnostic, MessageSeverity, Position, Range, ReportItem, DIAGNOSTIC_SOURCE,
    OP_CONFIG_FILE_NAME,
};
pub use environment::{DocsRepoType, Environment, UserType};
pub use error::{DocsError, DocsResult, ErrorCode};
pub use events::{drain_events, DocsEvent, EventStream};

/// docs-build domain version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
