//! docs-build core library
//!
//! Re-exports the components that coordinate a documentation build:
//! configuration, credentials, the build pipeline, report generation and
//! the real-time validation bridge.

pub mod api;
pub mod build;
pub mod config;
pub mod credential;
pub mod fakes;
pub mod host;
pub mod language_server;
pub mod obs;
pub mod report;
pub mod repository;
pub mod telemetry;

pub use api::{BuildApi, OpBuildApiClient};

pub use build::{
    BuildController, BuildControllerDeps, BuildExecutor, BuildPhase, BuildRunner, CommandLine,
    HttpSecrets, ToolOptions,
};

pub use config::{default_api_base_url, DocsConfig, EnvironmentController};

pub use credential::{
    CallbackHub, CredentialController, CredentialStore, FileCredentialStore,
    MemoryCredentialStore, UnavailableCredentialStore,
};

pub use host::{DiagnosticSink, ExternalUriOpener, WorkspaceFolder, WorkspaceProvider};

pub use language_server::{
    CredentialExpiryHandler, CredentialSource, LanguageServerDeps, LanguageServerManager,
};

pub use obs::{log_event, spawn_event_logger, CorrelationSpan};

pub use report::visualize_build_report;

pub use repository::{GitRepositoryInspector, PublishConfig, RepositoryInspector};

pub use telemetry::init_tracing;

/// docs-build core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
